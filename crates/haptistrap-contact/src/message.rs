use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

pub const NAME_LIMITS: (usize, usize) = (1, 100);
pub const SUBJECT_LIMITS: (usize, usize) = (1, 200);
pub const BODY_LIMITS: (usize, usize) = (10, 5000);

/// Contact form payload as posted by the website.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactRequest {
    pub to: String,
    pub from: String,
    pub name: String,
    pub subject: String,
    pub message: String,
    #[serde(rename = "originalData", default)]
    pub original_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactValidationError {
    #[error("{field} must be a valid email address")]
    InvalidEmail { field: &'static str },
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("{field} must be between {min} and {max} characters (got {actual})")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },
}

/// A submission that passed structural validation. Text fields are kept
/// exactly as submitted; only the addresses are trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactMessage {
    pub recipient: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub body: String,
    pub original_data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ContactMessage {
    pub fn from_request(
        request: ContactRequest,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ContactValidationError> {
        let recipient = email("to", &request.to)?;
        let sender_email = email("from", &request.from)?;
        let sender_name = bounded("name", &request.name, NAME_LIMITS)?;
        let subject = bounded("subject", &request.subject, SUBJECT_LIMITS)?;
        let body = bounded("message", &request.message, BODY_LIMITS)?;

        Ok(Self {
            recipient,
            sender_email,
            sender_name,
            subject,
            body,
            original_data: request.original_data,
            timestamp,
        })
    }
}

fn email(field: &'static str, value: &str) -> Result<String, ContactValidationError> {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ContactValidationError::InvalidEmail { field });
    };
    if local.is_empty() || domain.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ContactValidationError::InvalidEmail { field });
    }
    Ok(value.to_string())
}

fn bounded(
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
) -> Result<String, ContactValidationError> {
    if value.trim().is_empty() {
        return Err(ContactValidationError::Blank { field });
    }
    let actual = value.chars().count();
    if actual < min || actual > max {
        return Err(ContactValidationError::Length {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(value.to_string())
}
