use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// First failing check wins, in this order: name, email, message, email shape
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing name")]
    MissingName,
    #[error("Missing email")]
    MissingEmail,
    #[error("Missing message")]
    MissingMessage,
    #[error("Invalid email")]
    InvalidEmail,
}

// Body fields after string coercion and trimming, before validation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawLead {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub phone: Option<String>,
    pub service_interest: Option<String>,
    pub language: Option<String>,
}

impl RawLead {
    // Anything that is not a JSON object reads as an empty submission
    pub fn from_slice(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::default(),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        Self {
            name: text(value, &["name"]),
            email: text(value, &["email"]),
            message: text(value, &["message"]),
            phone: text(value, &["phone"]),
            service_interest: text(value, &["service_interest", "serviceInterest"]),
            language: text(value, &["language"]),
        }
    }

    pub fn validate(self, default_language: &str) -> Result<LeadSubmission, ValidationError> {
        let name = self.name.ok_or(ValidationError::MissingName)?;
        let email = self.email.ok_or(ValidationError::MissingEmail)?;
        let message = self.message.ok_or(ValidationError::MissingMessage)?;
        if !looks_like_email(&email) {
            return Err(ValidationError::InvalidEmail);
        }

        Ok(LeadSubmission {
            name,
            email,
            message,
            phone: self.phone,
            service_interest: self.service_interest,
            language: self.language.unwrap_or_else(|| default_language.to_string()),
        })
    }
}

// Strings as-is, numbers and booleans printed, anything else absent. Blank is absent.
fn text(value: &Value, keys: &[&str]) -> Option<String> {
    let raw = keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// local@domain.tld: one '@', no whitespace, a dot inside the domain with text on both sides
pub fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

// A validated lead. Only `RawLead::validate` builds one and nothing mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    name: String,
    email: String,
    message: String,
    phone: Option<String>,
    service_interest: Option<String>,
    language: String,
}

impl LeadSubmission {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn service_interest(&self) -> Option<&str> {
        self.service_interest.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Store,
    Spreadsheet,
    Email,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Store => "store",
            SinkKind::Spreadsheet => "spreadsheet",
            SinkKind::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkStatus {
    Ok,
    Skipped,
    Error,
}

impl SinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkStatus::Ok => "ok",
            SinkStatus::Skipped => "skipped",
            SinkStatus::Error => "error",
        }
    }
}

// One per sink per request. `detail` is the record id (ok), the reason (skipped)
// or the error message (error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResult {
    pub sink: SinkKind,
    pub status: SinkStatus,
    pub detail: Option<String>,
}

impl SinkResult {
    pub fn ok(sink: SinkKind, detail: Option<String>) -> Self {
        Self { sink, status: SinkStatus::Ok, detail }
    }

    pub fn skipped(sink: SinkKind, reason: impl Into<String>) -> Self {
        Self { sink, status: SinkStatus::Skipped, detail: Some(reason.into()) }
    }

    pub fn error(sink: SinkKind, message: impl Into<String>) -> Self {
        Self { sink, status: SinkStatus::Error, detail: Some(message.into()) }
    }

    pub fn is_error(&self) -> bool {
        self.status == SinkStatus::Error
    }

    fn error_detail(&self) -> Option<String> {
        if self.is_error() { self.detail.clone() } else { None }
    }
}

// Body of a 200/202 lead response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadReceipt {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firestore_id: Option<String>,
    pub store: SinkStatus,
    pub sheet: SinkStatus,
    pub email: SinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

impl LeadReceipt {
    // `skipped` never degrades the receipt, only `error` does
    pub fn from_results(store: &SinkResult, sheet: &SinkResult, email: &SinkResult) -> Self {
        let degraded = store.is_error() || sheet.is_error() || email.is_error();
        Self {
            ok: !degraded,
            firestore_id: match store.status {
                SinkStatus::Ok => store.detail.clone(),
                _ => None,
            },
            store: store.status,
            sheet: sheet.status,
            email: email.status,
            store_error: store.error_detail(),
            sheet_error: sheet.error_detail(),
            email_error: email.error_detail(),
        }
    }
}
