//! Configuration management
//!
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Token secrets
//! have no default and must be provided before the server starts.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token and cookie configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Outgoing mail configuration
    #[serde(default)]
    pub mail: MailConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the web client, cookies are sent with credentials)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Where the browser lands after following an activation link
    #[serde(default = "default_client_url")]
    pub client_url: String,
    /// Public base URL of this API, used to build activation links
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            client_url: default_client_url(),
            api_url: default_api_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4444
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_client_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_url() -> String {
    "http://localhost:4444".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/agora.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Token signing and refresh cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    #[serde(default)]
    pub access_secret: String,
    /// HMAC secret for refresh tokens, must differ from the access secret
    #[serde(default)]
    pub refresh_secret: String,
    /// Access token lifetime
    #[serde(default = "default_access_ttl_minutes")]
    pub access_ttl_minutes: i64,
    /// Refresh token lifetime, also the refresh cookie max-age
    #[serde(default = "default_refresh_ttl_days")]
    pub refresh_ttl_days: i64,
    /// Mark the refresh cookie `Secure`
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_ttl_minutes: default_access_ttl_minutes(),
            refresh_ttl_days: default_refresh_ttl_days(),
            secure_cookie: false,
        }
    }
}

fn default_access_ttl_minutes() -> i64 {
    30
}

fn default_refresh_ttl_days() -> i64 {
    30
}

/// SMTP configuration for activation mail
///
/// When `smtp_host` is unset, activation mail is logged instead of sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Sender address; falls back to the SMTP username when empty
    #[serde(default)]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            from: String::new(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

impl MailConfig {
    /// Address used in the `From` header
    pub fn sender(&self) -> &str {
        if self.from.is_empty() {
            &self.smtp_username
        } else {
            &self.from
        }
    }
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `AGORA_<SECTION>_<KEY>`:
    /// - AGORA_SERVER_HOST, AGORA_SERVER_PORT, AGORA_SERVER_CORS_ORIGIN
    /// - AGORA_SERVER_CLIENT_URL, AGORA_SERVER_API_URL
    /// - AGORA_DATABASE_DRIVER, AGORA_DATABASE_URL
    /// - AGORA_AUTH_ACCESS_SECRET, AGORA_AUTH_REFRESH_SECRET
    /// - AGORA_AUTH_ACCESS_TTL_MINUTES, AGORA_AUTH_REFRESH_TTL_DAYS
    /// - AGORA_AUTH_SECURE_COOKIE
    /// - AGORA_MAIL_SMTP_HOST, AGORA_MAIL_SMTP_PORT, AGORA_MAIL_SMTP_USERNAME
    /// - AGORA_MAIL_SMTP_PASSWORD, AGORA_MAIL_FROM
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("AGORA_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("AGORA_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("AGORA_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }
        if let Ok(client_url) = std::env::var("AGORA_SERVER_CLIENT_URL") {
            self.server.client_url = client_url;
        }
        if let Ok(api_url) = std::env::var("AGORA_SERVER_API_URL") {
            self.server.api_url = api_url;
        }

        // Database configuration
        if let Ok(driver) = std::env::var("AGORA_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("AGORA_DATABASE_URL") {
            self.database.url = url;
        }

        // Auth configuration
        if let Ok(secret) = std::env::var("AGORA_AUTH_ACCESS_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("AGORA_AUTH_REFRESH_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Ok(ttl) = std::env::var("AGORA_AUTH_ACCESS_TTL_MINUTES") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.access_ttl_minutes = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("AGORA_AUTH_REFRESH_TTL_DAYS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.refresh_ttl_days = ttl;
            }
        }
        if let Ok(secure) = std::env::var("AGORA_AUTH_SECURE_COOKIE") {
            match secure.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.auth.secure_cookie = true,
                "false" | "0" | "no" => self.auth.secure_cookie = false,
                _ => {}
            }
        }

        // Mail configuration
        if let Ok(host) = std::env::var("AGORA_MAIL_SMTP_HOST") {
            self.mail.smtp_host = if host.trim().is_empty() { None } else { Some(host) };
        }
        if let Ok(port) = std::env::var("AGORA_MAIL_SMTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.mail.smtp_port = port;
            }
        }
        if let Ok(username) = std::env::var("AGORA_MAIL_SMTP_USERNAME") {
            self.mail.smtp_username = username;
        }
        if let Ok(password) = std::env::var("AGORA_MAIL_SMTP_PASSWORD") {
            self.mail.smtp_password = password;
        }
        if let Ok(from) = std::env::var("AGORA_MAIL_FROM") {
            self.mail.from = from;
        }
    }

    /// Check the settings the server cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.access_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.access_secret must be set".to_string(),
            ));
        }
        if self.auth.refresh_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.refresh_secret must be set".to_string(),
            ));
        }
        if self.auth.access_secret == self.auth.refresh_secret {
            return Err(ConfigError::ValidationError(
                "auth.access_secret and auth.refresh_secret must differ".to_string(),
            ));
        }
        if self.auth.access_ttl_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.access_ttl_minutes must be positive".to_string(),
            ));
        }
        if self.auth.refresh_ttl_days <= 0 {
            return Err(ConfigError::ValidationError(
                "auth.refresh_ttl_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by `tests` and `property_tests`, both touch process-wide env vars.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_VARS: &[&str] = &[
    "AGORA_SERVER_HOST",
    "AGORA_SERVER_PORT",
    "AGORA_SERVER_CORS_ORIGIN",
    "AGORA_SERVER_CLIENT_URL",
    "AGORA_SERVER_API_URL",
    "AGORA_DATABASE_DRIVER",
    "AGORA_DATABASE_URL",
    "AGORA_AUTH_ACCESS_SECRET",
    "AGORA_AUTH_REFRESH_SECRET",
    "AGORA_AUTH_ACCESS_TTL_MINUTES",
    "AGORA_AUTH_REFRESH_TTL_DAYS",
    "AGORA_AUTH_SECURE_COOKIE",
    "AGORA_MAIL_SMTP_HOST",
    "AGORA_MAIL_SMTP_PORT",
    "AGORA_MAIL_SMTP_USERNAME",
    "AGORA_MAIL_SMTP_PASSWORD",
    "AGORA_MAIL_FROM",
];

#[cfg(test)]
fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}
