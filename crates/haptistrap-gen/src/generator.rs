use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveOutcome, archive_artifact};
use crate::params::{GenerationParams, ValidationError};

pub const ARTIFACT_PREFIX: &str = "TacTight_";
pub const ARTIFACT_EXTENSION: &str = ".stl";
pub const STL_MEDIA_TYPE: &str = "application/sla";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Program plus any leading arguments, e.g. `xvfb-run -a openscad`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    program: OsString,
    leading_args: Vec<OsString>,
}

impl CompilerCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits a whitespace separated command line. Returns `None` when blank.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::with_args(program, parts))
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn leading_args(&self) -> &[OsString] {
        &self.leading_args
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub compiler: CompilerCommand,
    pub design_file: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Wall-clock limit for one compiler run. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            compiler: CompilerCommand::new("openscad"),
            design_file: PathBuf::from("TacTight.scad"),
            output_dir: PathBuf::from("output"),
            archive_dir: PathBuf::from("generated_stl"),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// A mesh file produced by one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub filename: String,
}

impl Artifact {
    pub fn media_type(&self) -> &'static str {
        STL_MEDIA_TYPE
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("could not prepare output directory {}: {source}", .path.display())]
    OutputDir { path: PathBuf, source: io::Error },
    #[error("could not start OpenSCAD ({program:?}): {source}")]
    Spawn { program: OsString, source: io::Error },
    #[error("OpenSCAD error: {stderr}")]
    CompilerFailed { code: Option<i32>, stderr: String },
    #[error("STL file was not generated")]
    MissingOutput { path: PathBuf },
    #[error("OpenSCAD did not finish within {} seconds", .0.as_secs())]
    TimedOut(Duration),
}

#[derive(Debug)]
pub struct GenerationOutcome {
    pub artifact: Artifact,
    pub archive: ArchiveOutcome,
}

pub fn artifact_filename(at: NaiveDateTime) -> String {
    format!(
        "{ARTIFACT_PREFIX}{}{ARTIFACT_EXTENSION}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Runs the external geometry compiler and keeps artifact names unique.
///
/// Generations for different clients run concurrently; the only shared state
/// is the set of filenames currently being written.
#[derive(Debug)]
pub struct ArtifactGenerator {
    config: GeneratorConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ArtifactGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Compiles the artifact, then archives a copy. Only compilation decides
    /// the result; the archive outcome rides along for reporting.
    pub async fn generate(
        &self,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome, GenerationError> {
        let artifact = self.compile(params).await?;
        let archive = archive_artifact(&artifact, &self.config.archive_dir).await;
        Ok(GenerationOutcome { artifact, archive })
    }

    pub async fn compile(&self, params: &GenerationParams) -> Result<Artifact, GenerationError> {
        params.validate()?;

        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| GenerationError::OutputDir {
                path: output_dir.clone(),
                source,
            })?;

        let reservation = self.reserve(output_dir, Local::now().naive_local()).await;
        let path = output_dir.join(&reservation.filename);

        let compiler = &self.config.compiler;
        let mut command = Command::new(compiler.program());
        command
            .args(compiler.leading_args())
            .arg("-o")
            .arg(&path)
            .arg(format!("-DspringThickness={}", params.spring_thickness()))
            .arg(format!("-DstrapWidth={}", params.strap_width()))
            .arg(&self.config.design_file)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(?command, "spawning compiler");
        let run = command.output();
        let output = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(limit_secs = limit.as_secs(), "compiler timed out, killed");
                    return Err(GenerationError::TimedOut(limit));
                }
            },
            None => run.await,
        }
        .map_err(|source| GenerationError::Spawn {
            program: compiler.program().to_os_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(code = ?output.status.code(), %stderr, "compiler exited with failure");
            return Err(GenerationError::CompilerFailed {
                code: output.status.code(),
                stderr,
            });
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = %path.display(), "compiler exited cleanly without output");
            return Err(GenerationError::MissingOutput { path });
        }

        info!(path = %path.display(), "generated artifact");
        Ok(Artifact {
            path,
            filename: reservation.filename.clone(),
        })
    }

    /// Claims the first free artifact name at or after `at`. The lock only
    /// guards the in-flight set; the disk check runs after the claim.
    async fn reserve(&self, dir: &Path, mut at: NaiveDateTime) -> Reservation {
        loop {
            let filename = artifact_filename(at);
            if let Some(reservation) = self.claim(&filename) {
                let taken = tokio::fs::try_exists(dir.join(&filename))
                    .await
                    .unwrap_or(false);
                if !taken {
                    return reservation;
                }
            }
            debug!(%filename, "artifact name taken, advancing one second");
            at += TimeDelta::seconds(1);
        }
    }

    fn claim(&self, filename: &str) -> Option<Reservation> {
        if !lock(&self.in_flight).insert(filename.to_owned()) {
            return None;
        }
        Some(Reservation {
            filename: filename.to_owned(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Reservation {
    filename: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.filename);
    }
}
