use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{LeadSink, SinkDelivery, SinkError};
use crate::config::{DEFAULT_MAIL_PORT, MailConfig};
use crate::models::{LeadSubmission, SinkKind};

// Sends a plain text + HTML notification for every lead over SMTP
pub struct EmailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: String,
}

impl EmailSink {
    // Port 465 speaks TLS from the first byte, anything else upgrades with STARTTLS
    pub fn new(config: &MailConfig) -> Result<Self, SinkError> {
        let builder = if config.port == DEFAULT_MAIL_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| SinkError::Mail(e.to_string()))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        Ok(Self {
            transport,
            from: config.from.clone(),
            to: config.to.clone(),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, SinkError> {
    address
        .parse()
        .map_err(|e| SinkError::Mail(format!("bad address {address:?}: {e}")))
}

pub fn build_message(from: &str, to: &str, lead: &LeadSubmission) -> Result<Message, SinkError> {
    let mut builder = Message::builder()
        .from(mailbox(from)?)
        .to(mailbox(to)?)
        .subject(format!("New lead: {}", lead.name()));
    // the lead's address was only shape-checked, so a reply-to is best effort
    if let Ok(reply_to) = lead.email().parse::<Mailbox>() {
        builder = builder.reply_to(reply_to);
    }

    builder
        .multipart(MultiPart::alternative_plain_html(plain_body(lead), html_body(lead)))
        .map_err(|e| SinkError::Mail(e.to_string()))
}

pub fn plain_body(lead: &LeadSubmission) -> String {
    format!(
        "New lead from the website\n\n\
         Name: {}\nEmail: {}\nPhone: {}\nService: {}\nLanguage: {}\n\n{}\n",
        lead.name(),
        lead.email(),
        lead.phone().unwrap_or("-"),
        lead.service_interest().unwrap_or("-"),
        lead.language(),
        lead.message(),
    )
}

pub fn html_body(lead: &LeadSubmission) -> String {
    let rows = [
        ("Name", lead.name()),
        ("Email", lead.email()),
        ("Phone", lead.phone().unwrap_or("-")),
        ("Service", lead.service_interest().unwrap_or("-")),
        ("Language", lead.language()),
    ]
    .iter()
    .map(|(label, value)| format!("<tr><th align=\"left\">{label}</th><td>{}</td></tr>", escape_html(value)))
    .collect::<String>();

    format!(
        "<h2>New lead from the website</h2><table>{rows}</table><p style=\"white-space:pre-wrap\">{}</p>",
        escape_html(lead.message())
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl LeadSink for EmailSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Email
    }

    async fn deliver(&self, lead: &LeadSubmission) -> Result<SinkDelivery, SinkError> {
        let message = build_message(&self.from, &self.to, lead)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| SinkError::Mail(e.to_string()))?;
        Ok(SinkDelivery::Delivered(None))
    }
}
