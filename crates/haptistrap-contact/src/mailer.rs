use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::stub::AsyncStubTransport;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::message::ContactMessage;

/// Port on which the server expects TLS from the first byte instead of STARTTLS.
pub const SMTPS_PORT: u16 = 465;
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub timeout: Duration,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid SMTP transport settings: {0}")]
    Transport(String),
    #[error("invalid email address {address:?}: {reason}")]
    Address { address: String, reason: String },
    #[error("could not compose email: {0}")]
    Compose(String),
    #[error("SMTP send failed: {0}")]
    Send(String),
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Stub(Arc<AsyncStubTransport>),
}

/// Composes contact emails and hands them to an SMTP relay.
///
/// The stub transport records messages in memory instead of sending them,
/// which is what tests and dry runs use.
pub struct Mailer {
    transport: Transport,
    from: Mailbox,
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.transport {
            Transport::Smtp(_) => "smtp",
            Transport::Stub(_) => "stub",
        };
        f.debug_struct("Mailer")
            .field("transport", &kind)
            .field("from", &self.from.to_string())
            .finish()
    }
}

impl Mailer {
    pub fn smtp(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let builder = if settings.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
        }
        .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(settings.timeout))
            .build();

        Ok(Self {
            transport: Transport::Smtp(transport),
            from: mailbox(None, &settings.from)?,
        })
    }

    pub fn stub(transport: Arc<AsyncStubTransport>, from: &str) -> Result<Self, DeliveryError> {
        Ok(Self {
            transport: Transport::Stub(transport),
            from: mailbox(None, from)?,
        })
    }

    pub async fn send(
        &self,
        message: &ContactMessage,
        recipient: &str,
    ) -> Result<(), DeliveryError> {
        let email = self.compose(message, recipient)?;
        match &self.transport {
            Transport::Smtp(transport) => transport
                .send(email)
                .await
                .map(drop)
                .map_err(|err| DeliveryError::Send(err.to_string())),
            Transport::Stub(transport) => transport
                .send(email)
                .await
                .map_err(|err| DeliveryError::Send(err.to_string())),
        }
    }

    fn compose(&self, message: &ContactMessage, recipient: &str) -> Result<Message, DeliveryError> {
        Message::builder()
            .from(self.from.clone())
            .reply_to(mailbox(
                Some(message.sender_name.clone()),
                &message.sender_email,
            )?)
            .to(mailbox(None, recipient)?)
            .subject(message.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                plain_body(message),
                html_body(message),
            ))
            .map_err(|err| DeliveryError::Compose(err.to_string()))
    }
}

fn mailbox(name: Option<String>, address: &str) -> Result<Mailbox, DeliveryError> {
    let email = address
        .parse::<Address>()
        .map_err(|err| DeliveryError::Address {
            address: address.to_string(),
            reason: err.to_string(),
        })?;
    Ok(Mailbox::new(name, email))
}

fn plain_body(message: &ContactMessage) -> String {
    format!(
        "New contact form submission\n\nFrom: {} <{}>\nSubject: {}\nReceived: {}\n\n{}\n",
        message.sender_name,
        message.sender_email,
        message.subject,
        message.timestamp.to_rfc3339(),
        message.body,
    )
}

fn html_body(message: &ContactMessage) -> String {
    format!(
        "<html><body>\
         <h2>New contact form submission</h2>\
         <p><strong>From:</strong> {} &lt;{}&gt;<br>\
         <strong>Subject:</strong> {}<br>\
         <strong>Received:</strong> {}</p>\
         <p>{}</p>\
         </body></html>",
        escape_html(&message.sender_name),
        escape_html(&message.sender_email),
        escape_html(&message.subject),
        message.timestamp.to_rfc3339(),
        escape_html(&message.body).replace('\n', "<br>"),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
