//! Contact form relay: validate a submission, try to email it to the operator,
//! and always keep a plaintext record of it on disk.

pub mod mailer;
pub mod message;
pub mod record;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

pub use mailer::{DEFAULT_SMTP_PORT, DEFAULT_SMTP_TIMEOUT, DeliveryError, Mailer, SmtpSettings};
pub use message::{ContactMessage, ContactRequest, ContactValidationError};
pub use record::{LogWriteError, render_record, write_record};

#[derive(Debug, Clone)]
pub struct ContactConfig {
    pub log_dir: PathBuf,
    pub smtp: Option<SmtpSettings>,
    /// Operator address that receives every submission, regardless of the
    /// `to` field in the request.
    pub recipient: Option<String>,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("contact_logs"),
            smtp: None,
            recipient: None,
        }
    }
}

/// Which channel a valid submission actually went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// `smtp_error` is `None` when SMTP is not configured at all.
    LoggedOnly { smtp_error: Option<String> },
}

#[derive(Debug)]
pub enum RecordOutcome {
    Written(PathBuf),
    Failed(LogWriteError),
}

#[derive(Debug)]
pub struct ContactReceipt {
    pub timestamp: DateTime<Utc>,
    pub delivery: Delivery,
    pub record: RecordOutcome,
}

impl ContactReceipt {
    /// Text shown to the submitter. Both channels count as success.
    pub fn user_message(&self) -> &'static str {
        match self.delivery {
            Delivery::Sent => "Message sent successfully",
            Delivery::LoggedOnly { .. } => "Message received and recorded successfully",
        }
    }
}

#[derive(Debug)]
pub struct ContactService {
    mailer: Option<Mailer>,
    log_dir: PathBuf,
    recipient: Option<String>,
}

impl ContactService {
    pub fn new(
        mailer: Option<Mailer>,
        log_dir: impl Into<PathBuf>,
        recipient: Option<String>,
    ) -> Self {
        Self {
            mailer,
            log_dir: log_dir.into(),
            recipient,
        }
    }

    pub fn from_config(config: &ContactConfig) -> Result<Self, DeliveryError> {
        let mailer = config.smtp.as_ref().map(Mailer::smtp).transpose()?;
        if mailer.is_none() {
            info!("SMTP not configured, contact submissions will be logged only");
        }
        Ok(Self::new(
            mailer,
            config.log_dir.clone(),
            config.recipient.clone(),
        ))
    }

    pub fn is_smtp_configured(&self) -> bool {
        self.mailer.is_some()
    }

    pub async fn submit(
        &self,
        request: ContactRequest,
    ) -> Result<ContactReceipt, ContactValidationError> {
        let message = ContactMessage::from_request(request, Utc::now())?;
        let recipient = self.recipient.as_deref().unwrap_or(&message.recipient);

        let delivery = match &self.mailer {
            None => Delivery::LoggedOnly { smtp_error: None },
            Some(mailer) => match mailer.send(&message, recipient).await {
                Ok(()) => {
                    info!(%recipient, "contact message emailed");
                    Delivery::Sent
                }
                Err(err) => {
                    warn!(error = %err, "contact email failed, falling back to log only");
                    Delivery::LoggedOnly {
                        smtp_error: Some(err.to_string()),
                    }
                }
            },
        };

        let record = match write_record(&self.log_dir, &message, recipient, &delivery).await {
            Ok(path) => {
                info!(path = %path.display(), "contact record written");
                RecordOutcome::Written(path)
            }
            Err(err) => {
                error!(error = %err, "contact record could not be written");
                RecordOutcome::Failed(err)
            }
        };

        Ok(ContactReceipt {
            timestamp: message.timestamp,
            delivery,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use lettre::transport::stub::AsyncStubTransport;

    use super::{
        ContactConfig, ContactRequest, ContactService, Delivery, Mailer, RecordOutcome,
        SmtpSettings,
    };

    fn request() -> ContactRequest {
        ContactRequest {
            to: "someone@example.com".into(),
            from: "maker@example.org".into(),
            name: "Ada Lovelace".into(),
            subject: "TacTight Contact: sizing".into(),
            message: "Which strap width should I print for a 17 cm wrist?".into(),
            original_data: None,
        }
    }

    fn record_files(dir: &Path) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|entry| entry.expect("dir entry").path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn unconfigured_smtp_logs_submission_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let service = ContactService::new(None, &log_dir, None);
        assert!(!service.is_smtp_configured());

        let receipt = service.submit(request()).await.expect("valid submission");

        assert_eq!(receipt.delivery, Delivery::LoggedOnly { smtp_error: None });
        assert_eq!(
            receipt.user_message(),
            "Message received and recorded successfully"
        );
        let files = record_files(&log_dir);
        assert_eq!(files.len(), 1);
        let text = std::fs::read_to_string(&files[0]).expect("read record");
        assert!(text.contains("Ada Lovelace"));
        assert!(text.contains("TacTight Contact: sizing"));
        assert!(text.contains("Which strap width should I print for a 17 cm wrist?"));
    }

    #[tokio::test]
    async fn indented_message_is_recorded_byte_for_byte() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = ContactService::new(None, dir.path(), None);
        let mut indented = request();
        indented.name = "  Ada Lovelace ".into();
        indented.message = "    - line one indented\n    - line two indented\n".into();

        let receipt = service.submit(indented).await.expect("valid submission");

        let RecordOutcome::Written(path) = &receipt.record else {
            panic!("expected record, got {:?}", receipt.record);
        };
        let text = std::fs::read_to_string(path).expect("read record");
        assert!(text.contains("From:   Ada Lovelace  <maker@example.org>\n"));
        assert!(text.contains("Message:\n    - line one indented\n    - line two indented\n"));
    }

    #[tokio::test]
    async fn record_names_the_configured_recipient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = ContactService::new(None, dir.path(), Some("operator@example.com".into()));

        let receipt = service.submit(request()).await.expect("valid submission");

        let RecordOutcome::Written(path) = &receipt.record else {
            panic!("expected record, got {:?}", receipt.record);
        };
        let text = std::fs::read_to_string(path).expect("read record");
        assert!(text.contains("To: operator@example.com\n"));
        assert!(text.contains("Requested recipient: someone@example.com\n"));
    }

    #[tokio::test]
    async fn invalid_submission_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let transport = Arc::new(AsyncStubTransport::new_ok());
        let mailer =
            Mailer::stub(Arc::clone(&transport), "noreply@example.com").expect("mailer");
        let service = ContactService::new(Some(mailer), &log_dir, None);

        let mut bad = request();
        bad.from = "maker.example.org".into();
        assert!(service.submit(bad).await.is_err());

        assert!(record_files(&log_dir).is_empty());
        assert!(transport.messages().await.is_empty());
    }

    #[tokio::test]
    async fn delivered_submission_is_still_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = Arc::new(AsyncStubTransport::new_ok());
        let mailer =
            Mailer::stub(Arc::clone(&transport), "noreply@example.com").expect("mailer");
        let service = ContactService::new(
            Some(mailer),
            dir.path(),
            Some("operator@example.com".into()),
        );

        let receipt = service.submit(request()).await.expect("valid submission");

        assert_eq!(receipt.delivery, Delivery::Sent);
        assert_eq!(receipt.user_message(), "Message sent successfully");
        assert!(matches!(receipt.record, RecordOutcome::Written(_)));
        let sent = transport.messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.to()[0].to_string(), "operator@example.com");
    }

    #[tokio::test]
    async fn failed_send_falls_back_to_log_with_error_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = Arc::new(AsyncStubTransport::new_error());
        let mailer = Mailer::stub(transport, "noreply@example.com").expect("mailer");
        let service = ContactService::new(Some(mailer), dir.path(), None);

        let receipt = service.submit(request()).await.expect("valid submission");

        let Delivery::LoggedOnly {
            smtp_error: Some(error),
        } = &receipt.delivery
        else {
            panic!("expected logged-only with error, got {:?}", receipt.delivery);
        };
        let RecordOutcome::Written(path) = &receipt.record else {
            panic!("expected record, got {:?}", receipt.record);
        };
        let text = std::fs::read_to_string(path).expect("read record");
        assert!(text.contains(&format!("SMTP error: {error}")));
    }

    #[tokio::test]
    async fn unreachable_smtp_server_is_absorbed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ContactConfig {
            log_dir: dir.path().to_path_buf(),
            smtp: Some(SmtpSettings {
                server: "127.0.0.1".into(),
                port: 1,
                username: "user".into(),
                password: "secret".into(),
                from: "noreply@example.com".into(),
                timeout: Duration::from_secs(2),
            }),
            recipient: None,
        };
        let service = ContactService::from_config(&config).expect("service");
        assert!(service.is_smtp_configured());

        let receipt = service.submit(request()).await.expect("valid submission");

        assert!(matches!(
            receipt.delivery,
            Delivery::LoggedOnly {
                smtp_error: Some(_)
            }
        ));
        assert_eq!(record_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn record_failure_keeps_the_delivery_verdict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").expect("write blocker");
        let transport = Arc::new(AsyncStubTransport::new_ok());
        let mailer = Mailer::stub(transport, "noreply@example.com").expect("mailer");
        let service = ContactService::new(Some(mailer), blocker.join("logs"), None);

        let receipt = service.submit(request()).await.expect("valid submission");

        assert_eq!(receipt.delivery, Delivery::Sent);
        assert!(matches!(receipt.record, RecordOutcome::Failed(_)));
    }
}
