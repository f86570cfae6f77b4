use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::Delivery;
use crate::message::ContactMessage;

const RECORD_PREFIX: &str = "contact_";
const RECORD_EXTENSION: &str = ".txt";
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Error)]
#[error("could not write contact record in {}: {source}", .dir.display())]
pub struct LogWriteError {
    pub dir: PathBuf,
    pub source: io::Error,
}

/// Writes one plaintext record per submission. Existing records are never
/// touched; a numeric suffix is added if the timestamped name is taken.
///
/// `recipient` is the address the submission was routed to, which may differ
/// from the one in the request.
pub async fn write_record(
    dir: &Path,
    message: &ContactMessage,
    recipient: &str,
    delivery: &Delivery,
) -> Result<PathBuf, LogWriteError> {
    let fail = |source| LogWriteError {
        dir: dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(fail)?;

    let stem = format!(
        "{RECORD_PREFIX}{}",
        message.timestamp.format("%Y%m%d_%H%M%S_%3f")
    );
    let contents = render_record(message, recipient, delivery);

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{stem}{RECORD_EXTENSION}"),
            n => format!("{stem}_{n}{RECORD_EXTENSION}"),
        };
        let path = dir.join(name);
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(fail(err)),
        };
        persist(file, &path, contents.as_bytes())
            .await
            .map_err(fail)?;
        return Ok(path);
    }

    Err(fail(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free record name for {stem}"),
    )))
}

/// Fills a freshly created record. A partial record is removed so a failed
/// write leaves nothing behind.
async fn persist<W>(mut out: W, path: &Path, contents: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match out.write_all(contents).await {
        Ok(()) => out.flush().await,
        Err(err) => Err(err),
    };
    if written.is_err() {
        drop(out);
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

pub fn render_record(message: &ContactMessage, recipient: &str, delivery: &Delivery) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Received: {}", message.timestamp.to_rfc3339());
    let _ = writeln!(out, "To: {recipient}");
    if recipient != message.recipient {
        let _ = writeln!(out, "Requested recipient: {}", message.recipient);
    }
    let _ = writeln!(out, "From: {} <{}>", message.sender_name, message.sender_email);
    let _ = writeln!(out, "Subject: {}", message.subject);
    match delivery {
        Delivery::Sent => {
            let _ = writeln!(out, "Delivery: sent");
        }
        Delivery::LoggedOnly { smtp_error: None } => {
            let _ = writeln!(out, "Delivery: logged only (SMTP not configured)");
        }
        Delivery::LoggedOnly {
            smtp_error: Some(error),
        } => {
            let _ = writeln!(out, "Delivery: logged only");
            let _ = writeln!(out, "SMTP error: {error}");
        }
    }
    let _ = write!(out, "\nMessage:\n{}\n", message.body);
    if let Some(data) = &message.original_data {
        let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        let _ = write!(out, "\nOriginal data:\n{pretty}\n");
    }
    out
}
