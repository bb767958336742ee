// Downstream side effects of an accepted lead. The three sinks run
// concurrently, each in its own task with its own timeout, and every failure
// becomes a SinkResult at that sink's boundary.

mod email;
mod sheets;
mod store;

pub use email::EmailSink;
pub use sheets::SheetsSink;
pub use store::StoreSink;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

use crate::metrics::{FAN_OUT_LATENCY, SINK_RESULTS};
use crate::models::{LeadReceipt, LeadSubmission, SinkKind, SinkResult};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("service account token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("mail: {0}")]
    Mail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkDelivery {
    // optional id of the record that was created
    Delivered(Option<String>),
    Skipped(String),
}

#[async_trait]
pub trait LeadSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    async fn deliver(&self, lead: &LeadSubmission) -> Result<SinkDelivery, SinkError>;
}

// Stands in for a sink whose configuration is incomplete
pub struct DisabledSink {
    kind: SinkKind,
    reason: String,
}

impl DisabledSink {
    pub fn new(kind: SinkKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }
}

#[async_trait]
impl LeadSink for DisabledSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver(&self, _lead: &LeadSubmission) -> Result<SinkDelivery, SinkError> {
        Ok(SinkDelivery::Skipped(self.reason.clone()))
    }
}

#[derive(Clone)]
pub struct Sinks {
    pub store: Arc<dyn LeadSink>,
    pub spreadsheet: Arc<dyn LeadSink>,
    pub email: Arc<dyn LeadSink>,
}

impl Sinks {
    pub fn new(
        store: Arc<dyn LeadSink>,
        spreadsheet: Option<Arc<dyn LeadSink>>,
        email: Option<Arc<dyn LeadSink>>,
    ) -> Self {
        let spreadsheet = spreadsheet.unwrap_or_else(|| {
            info!("spreadsheet sink disabled: SHEETS_* settings incomplete");
            Arc::new(DisabledSink::new(SinkKind::Spreadsheet, "spreadsheet not configured"))
        });
        let email = email.unwrap_or_else(|| {
            info!("email sink disabled: MAIL_* settings incomplete");
            Arc::new(DisabledSink::new(SinkKind::Email, "mail transport not configured"))
        });
        Self { store, spreadsheet, email }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOut {
    pub store: SinkResult,
    pub spreadsheet: SinkResult,
    pub email: SinkResult,
}

impl FanOut {
    pub fn receipt(&self) -> LeadReceipt {
        LeadReceipt::from_results(&self.store, &self.spreadsheet, &self.email)
    }
}

// Starts all three sinks together and waits for every one of them
pub async fn fan_out(
    sinks: &Sinks,
    lead: Arc<LeadSubmission>,
    per_sink: Option<Duration>,
) -> FanOut {
    let start = Instant::now();

    let (store, spreadsheet, email) = tokio::join!(
        run_sink(Arc::clone(&sinks.store), Arc::clone(&lead), per_sink),
        run_sink(Arc::clone(&sinks.spreadsheet), Arc::clone(&lead), per_sink),
        run_sink(Arc::clone(&sinks.email), lead, per_sink),
    );

    FAN_OUT_LATENCY.observe(start.elapsed().as_secs_f64());

    FanOut { store, spreadsheet, email }
}

async fn run_sink(
    sink: Arc<dyn LeadSink>,
    lead: Arc<LeadSubmission>,
    per_sink: Option<Duration>,
) -> SinkResult {
    let kind = sink.kind();

    // own task so a panicking sink only takes itself down
    let task = tokio::spawn(async move {
        match per_sink {
            Some(limit) => match timeout(limit, sink.deliver(&lead)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
            },
            None => sink.deliver(&lead).await.map_err(|e| e.to_string()),
        }
    });

    let result = match task.await {
        Ok(Ok(SinkDelivery::Delivered(id))) => SinkResult::ok(kind, id),
        Ok(Ok(SinkDelivery::Skipped(reason))) => SinkResult::skipped(kind, reason),
        Ok(Err(message)) => {
            warn!(sink = kind.as_str(), error = %message, "sink failed");
            SinkResult::error(kind, message)
        }
        Err(join_err) => {
            warn!(sink = kind.as_str(), error = %join_err, "sink task aborted");
            SinkResult::error(kind, "sink task aborted")
        }
    };

    SINK_RESULTS
        .with_label_values(&[kind.as_str(), result.status.as_str()])
        .inc();

    result
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub enum Behaviour {
        Deliver(Option<&'static str>),
        Fail(&'static str),
        Panic,
    }

    // Sink with a fixed delay and a scripted outcome
    pub struct FakeSink {
        pub kind: SinkKind,
        pub delay: Duration,
        pub behaviour: Behaviour,
    }

    impl FakeSink {
        pub fn new(kind: SinkKind, behaviour: Behaviour) -> Arc<dyn LeadSink> {
            Self::delayed(kind, behaviour, Duration::ZERO)
        }

        pub fn delayed(kind: SinkKind, behaviour: Behaviour, delay: Duration) -> Arc<dyn LeadSink> {
            Arc::new(Self { kind, delay, behaviour })
        }
    }

    #[async_trait]
    impl LeadSink for FakeSink {
        fn kind(&self) -> SinkKind {
            self.kind
        }

        async fn deliver(&self, _lead: &LeadSubmission) -> Result<SinkDelivery, SinkError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.behaviour {
                Behaviour::Deliver(id) => Ok(SinkDelivery::Delivered(id.map(str::to_string))),
                Behaviour::Fail(message) => Err(SinkError::Rejected(message.to_string())),
                Behaviour::Panic => panic!("sink blew up"),
            }
        }
    }
}
