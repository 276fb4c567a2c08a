// The `config` module builds the immutable configuration value the scanner
// runs from. No ambient globals: the value is constructed once, from the
// environment or programmatically, and handed to the orchestrator.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_NAV_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLICK_TIMEOUT: Duration = Duration::from_secs(10);

/// The `ConfigError` enum defines the possible configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required configuration '{0}'")]
    Missing(&'static str),
    /// A variable is present but cannot be parsed.
    #[error("invalid value for '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Immutable scanner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IMAP server host.
    pub imap_host: String,
    /// IMAP server port.
    pub imap_port: u16,
    /// Mailbox login.
    pub email: String,
    /// Mailbox password or app-specific password.
    pub password: String,
    /// Substring the subject of a message must contain to be acted on.
    pub subject: String,
    /// Visible text of the on-page element to click after opening a link.
    /// When unset, links are only opened.
    pub element_text: Option<String>,
    /// When set, only links whose anchor text contains this substring
    /// (case-insensitively) are considered.
    pub link_filter_text: Option<String>,
    /// Sleep between scan cycles.
    pub poll_interval: Duration,
    /// Upper bound on a single page navigation.
    pub nav_timeout: Duration,
    /// Upper bound on waiting for the clickable element to appear.
    pub click_timeout: Duration,
    /// Location of the processed-message ledger file.
    pub ledger_path: PathBuf,
    /// Run the browser without a visible window.
    pub headless: bool,
}

impl Config {
    /// Starts a builder with the three required values.
    pub fn builder(
        email: impl Into<String>,
        password: impl Into<String>,
        subject: impl Into<String>,
    ) -> ConfigBuilder {
        ConfigBuilder::new(email, password, subject)
    }

    /// Builds the configuration from `MAILCLICK_*` environment variables.
    /// Call `dotenv` before this if a `.env` file should be honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::new(
            require_var("MAILCLICK_EMAIL")?,
            require_var("MAILCLICK_PASSWORD")?,
            require_var("MAILCLICK_SUBJECT")?,
        );

        if let Some(host) = optional_var("MAILCLICK_IMAP_HOST") {
            builder = builder.with_imap_host(host);
        }
        if let Some(port) = optional_var("MAILCLICK_IMAP_PORT") {
            let port = port.parse().map_err(|_| ConfigError::Invalid {
                name: "MAILCLICK_IMAP_PORT",
                reason: format!("'{port}' is not a port number"),
            })?;
            builder = builder.with_imap_port(port);
        }
        if let Some(text) = optional_var("MAILCLICK_ELEMENT_TEXT") {
            builder = builder.with_element_text(text);
        }
        if let Some(filter) = optional_var("MAILCLICK_LINK_FILTER") {
            builder = builder.with_link_filter_text(filter);
        }
        if let Some(raw) = optional_var("MAILCLICK_POLL_INTERVAL") {
            builder = builder.with_poll_interval(parse_duration("MAILCLICK_POLL_INTERVAL", &raw)?);
        }
        if let Some(raw) = optional_var("MAILCLICK_NAV_TIMEOUT") {
            builder = builder.with_nav_timeout(parse_duration("MAILCLICK_NAV_TIMEOUT", &raw)?);
        }
        if let Some(raw) = optional_var("MAILCLICK_CLICK_TIMEOUT") {
            builder = builder.with_click_timeout(parse_duration("MAILCLICK_CLICK_TIMEOUT", &raw)?);
        }
        if let Some(path) = optional_var("MAILCLICK_LEDGER") {
            builder = builder.with_ledger_path(path);
        }
        if let Some(raw) = optional_var("MAILCLICK_HEADLESS") {
            builder = builder.with_headless(parse_bool("MAILCLICK_HEADLESS", &raw)?);
        }

        Ok(builder.build())
    }
}

/// A builder for [`Config`].
pub struct ConfigBuilder {
    email: String,
    password: String,
    subject: String,
    imap_host: String,
    imap_port: u16,
    element_text: Option<String>,
    link_filter_text: Option<String>,
    poll_interval: Duration,
    nav_timeout: Duration,
    click_timeout: Duration,
    ledger_path: PathBuf,
    headless: bool,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder` with defaults for everything optional.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            subject: subject.into(),
            imap_host: DEFAULT_IMAP_HOST.to_string(),
            imap_port: DEFAULT_IMAP_PORT,
            element_text: None,
            link_filter_text: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            nav_timeout: DEFAULT_NAV_TIMEOUT,
            click_timeout: DEFAULT_CLICK_TIMEOUT,
            ledger_path: default_ledger_path(),
            headless: false,
        }
    }

    pub fn with_imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = host.into();
        self
    }

    pub fn with_imap_port(mut self, port: u16) -> Self {
        self.imap_port = port;
        self
    }

    pub fn with_element_text(mut self, text: impl Into<String>) -> Self {
        self.element_text = Some(text.into());
        self
    }

    pub fn with_link_filter_text(mut self, filter: impl Into<String>) -> Self {
        self.link_filter_text = Some(filter.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_nav_timeout(mut self, timeout: Duration) -> Self {
        self.nav_timeout = timeout;
        self
    }

    pub fn with_click_timeout(mut self, timeout: Duration) -> Self {
        self.click_timeout = timeout;
        self
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Builds the immutable `Config`.
    pub fn build(self) -> Config {
        Config {
            imap_host: self.imap_host,
            imap_port: self.imap_port,
            email: self.email,
            password: self.password,
            subject: self.subject,
            element_text: self.element_text,
            link_filter_text: self.link_filter_text,
            poll_interval: self.poll_interval,
            nav_timeout: self.nav_timeout,
            click_timeout: self.click_timeout,
            ledger_path: self.ledger_path,
            headless: self.headless,
        }
    }
}

fn default_ledger_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mailclick")
        .join("processed.json")
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name).ok_or(ConfigError::Missing(name))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_duration(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    // Accepts both "5s"-style humantime values and bare seconds.
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = Config::builder("me@example.com", "secret", "Invoice").build();

        assert_eq!(config.imap_host, DEFAULT_IMAP_HOST);
        assert_eq!(config.imap_port, DEFAULT_IMAP_PORT);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(config.element_text.is_none());
        assert!(config.link_filter_text.is_none());
        assert!(!config.headless);
        assert!(config.ledger_path.ends_with(".mailclick/processed.json"));
    }

    #[test]
    fn builder_overrides_stick() {
        let config = Config::builder("me@example.com", "secret", "Invoice")
            .with_imap_host("imap.fastmail.com")
            .with_imap_port(1993)
            .with_element_text("Accept")
            .with_link_filter_text("Go to task")
            .with_poll_interval(Duration::from_secs(30))
            .with_headless(true)
            .with_ledger_path("/tmp/ledger.json")
            .build();

        assert_eq!(config.imap_host, "imap.fastmail.com");
        assert_eq!(config.imap_port, 1993);
        assert_eq!(config.element_text.as_deref(), Some("Accept"));
        assert_eq!(config.link_filter_text.as_deref(), Some("Go to task"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert!(config.headless);
        assert_eq!(config.ledger_path, PathBuf::from("/tmp/ledger.json"));
    }

    #[test]
    fn durations_parse_bare_seconds_and_humantime() {
        assert_eq!(parse_duration("X", "7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("X", "2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("X", "soon").is_err());
    }

    #[test]
    fn booleans_parse_loosely() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
