use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::{LeadSink, SinkDelivery, SinkError};
use crate::config::SheetsConfig;
use crate::models::{LeadSubmission, SinkKind};

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
// refresh this long before Google says the token expires
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

// Appends one row per lead through the Sheets values:append API, authenticated
// as a service account (signed JWT exchanged for an access token).
pub struct SheetsSink {
    client: reqwest::Client,
    config: SheetsConfig,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsSink {
    pub fn new(client: reqwest::Client, config: SheetsConfig) -> Self {
        Self {
            client,
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, SinkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let res = self
            .client
            .post(TOKEN_URI)
            .form(&[("grant_type", JWT_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("token endpoint returned {status}: {body}")));
        }
        let token: TokenResponse = res.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn signed_assertion(&self) -> Result<String, SinkError> {
        let key = EncodingKey::from_rsa_pem(self.config.private_key.as_bytes())?;
        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.config.client_email,
            scope: SCOPE,
            aud: TOKEN_URI,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }
}

pub fn append_url(config: &SheetsConfig) -> Result<Url, SinkError> {
    let mut url = Url::parse(SHEETS_API).map_err(|e| SinkError::Rejected(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| SinkError::Rejected("sheets api url cannot be a base".to_string()))?
        .push(&config.spreadsheet_id)
        .push("values")
        .push(&format!("{}:append", config.range));
    url.query_pairs_mut()
        .append_pair("valueInputOption", "USER_ENTERED")
        .append_pair("insertDataOption", "INSERT_ROWS");
    Ok(url)
}

// name, email, phone, service interest, message, language, timestamp
pub fn row(lead: &LeadSubmission, timestamp: &str) -> Vec<String> {
    vec![
        lead.name().to_string(),
        lead.email().to_string(),
        lead.phone().unwrap_or_default().to_string(),
        lead.service_interest().unwrap_or_default().to_string(),
        lead.message().to_string(),
        lead.language().to_string(),
        timestamp.to_string(),
    ]
}

#[async_trait]
impl LeadSink for SheetsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Spreadsheet
    }

    async fn deliver(&self, lead: &LeadSubmission) -> Result<SinkDelivery, SinkError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body = json!({ "values": [row(lead, &timestamp)] });

        let token = self.access_token().await?;
        let res = self
            .client
            .post(append_url(&self.config)?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("sheets append returned {status}: {body}")));
        }
        Ok(SinkDelivery::Delivered(None))
    }
}
