use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::generator::Artifact;

#[derive(Debug, Error)]
#[error("could not archive {} into {}: {source}", .artifact.display(), .destination.display())]
pub struct ArchiveError {
    pub artifact: PathBuf,
    pub destination: PathBuf,
    pub source: io::Error,
}

/// Result of the best-effort archive copy. A failure here never fails the
/// request that produced the artifact.
#[derive(Debug)]
pub enum ArchiveOutcome {
    Archived(PathBuf),
    Failed(ArchiveError),
}

impl ArchiveOutcome {
    pub fn is_archived(&self) -> bool {
        matches!(self, ArchiveOutcome::Archived(_))
    }
}

pub async fn archive_artifact(artifact: &Artifact, archive_dir: &Path) -> ArchiveOutcome {
    match copy_into(artifact, archive_dir).await {
        Ok(path) => {
            info!(path = %path.display(), "archived artifact copy");
            ArchiveOutcome::Archived(path)
        }
        Err(err) => {
            warn!(error = %err, "artifact archive failed, continuing without it");
            ArchiveOutcome::Failed(err)
        }
    }
}

async fn copy_into(artifact: &Artifact, archive_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let destination = archive_dir.join(&artifact.filename);
    let fail = |source| ArchiveError {
        artifact: artifact.path.clone(),
        destination: destination.clone(),
        source,
    };

    tokio::fs::create_dir_all(archive_dir).await.map_err(fail)?;
    tokio::fs::copy(&artifact.path, &destination)
        .await
        .map_err(fail)?;
    Ok(destination)
}
