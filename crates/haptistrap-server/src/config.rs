use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use haptistrap_contact::{ContactConfig, DEFAULT_SMTP_PORT, DEFAULT_SMTP_TIMEOUT, SmtpSettings};
use haptistrap_gen::{CompilerCommand, DEFAULT_WINDOW, GeneratorConfig};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub generator: GeneratorConfig,
    pub contact: ContactConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            allowed_origins: Vec::new(),
            rate_limit_window: DEFAULT_WINDOW,
            generator: GeneratorConfig::default(),
            contact: ContactConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let defaults = Config::default();

        let compiler = match vars.get("COMPILER_COMMAND") {
            Some(line) => CompilerCommand::parse(&line).unwrap_or(defaults.generator.compiler),
            None => defaults.generator.compiler,
        };
        let timeout_secs: u64 = vars.parse("COMPILER_TIMEOUT_SECS", 120)?;

        let generator = GeneratorConfig {
            compiler,
            design_file: vars.path("DESIGN_FILE", defaults.generator.design_file),
            output_dir: vars.path("OUTPUT_DIR", defaults.generator.output_dir),
            archive_dir: vars.path("ARCHIVE_DIR", defaults.generator.archive_dir),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };

        let contact = ContactConfig {
            log_dir: vars.path("CONTACT_LOG_DIR", defaults.contact.log_dir),
            smtp: smtp_settings(&vars)?,
            recipient: vars.get("CONTACT_RECIPIENT"),
        };

        Ok(Self {
            host: vars.parse("HAPTISTRAP_HOST", defaults.host)?,
            port: vars.parse("PORT", defaults.port)?,
            allowed_origins: vars
                .get("CORS_ALLOWED_ORIGINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_window: vars.secs("RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW)?,
            generator,
            contact,
        })
    }
}

fn smtp_settings(vars: &Vars<'_>) -> Result<Option<SmtpSettings>, ConfigError> {
    let server = vars.get("SMTP_SERVER");
    let username = vars.get("SMTP_USERNAME");
    let password = vars.get("SMTP_PASSWORD");

    let (server, username, password) = match (server, username, password) {
        (Some(server), Some(username), Some(password)) => (server, username, password),
        (None, None, None) => return Ok(None),
        _ => {
            warn!(
                "SMTP partially configured; SMTP_SERVER, SMTP_USERNAME and SMTP_PASSWORD are all required"
            );
            return Ok(None);
        }
    };

    let from = vars.get("SMTP_FROM").unwrap_or_else(|| username.clone());
    Ok(Some(SmtpSettings {
        server,
        port: vars.parse("SMTP_PORT", DEFAULT_SMTP_PORT)?,
        username,
        password,
        from,
        timeout: vars.secs("SMTP_TIMEOUT_SECS", DEFAULT_SMTP_TIMEOUT)?,
    }))
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn path(&self, key: &str, default: PathBuf) -> PathBuf {
        self.get(key).map(PathBuf::from).unwrap_or(default)
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        let Some(value) = self.get(key) else {
            info!("{key} not set, using default: {default}");
            return Ok(default);
        };
        value.parse().map_err(|err: T::Err| ConfigError {
            key,
            reason: err.to_string(),
            value,
        })
    }

    /// Whole seconds that must be non-zero.
    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.parse(key, default.as_secs())? {
            0 => Err(ConfigError {
                key,
                value: "0".into(),
                reason: "must be greater than zero".into(),
            }),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}
