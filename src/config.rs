use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::CredentialKeys;

/// Rental Client - command line access to the rental backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://localhost:3000/api")]
    pub base_url: String,

    /// Request timeout in milliseconds
    #[arg(short, long, env = "API_TIMEOUT", default_value = "30000")]
    pub timeout: u64,

    /// Path to the local storage database
    #[arg(short = 's', long, env = "STORAGE_FILE")]
    pub storage_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session credentials
    Login {
        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and remove the stored credentials
    Logout,

    /// Show the logged-in user
    Whoami,

    /// GET a backend path and print the JSON response
    Get {
        path: String,

        /// Total attempts (1 = no retry)
        #[arg(long, default_value = "1")]
        retries: u32,

        /// Base retry delay in milliseconds
        #[arg(long, default_value = "1000")]
        retry_delay: u64,
    },

    /// Validate a payment card number (Luhn check)
    CheckCard { number: String },
}

impl Command {
    /// Whether a 401 during this command should prompt the user to log in again.
    /// Logging out discards the session anyway.
    pub fn reports_auth_failures(&self) -> bool {
        !matches!(self, Command::Logout | Command::CheckCard { .. })
    }
}

impl CliArgs {
    /// Parse CLI arguments after loading `.env`, so env-backed flags see it
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub api_timeout: Duration,

    // Storage
    pub storage_file: PathBuf,
    pub access_token_key: String,
    pub refresh_token_key: String,

    // Navigation target reported on authentication failure
    pub login_path: String,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

/// Settings the HTTP client is built from
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub login_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout: Duration::from_millis(30_000),
            login_path: "/login".to_string(),
        }
    }
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Self {
        Config {
            api_base_url: args.base_url.clone(),
            api_timeout: Duration::from_millis(args.timeout),

            storage_file: args
                .storage_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_storage_file),

            access_token_key: std::env::var("ACCESS_TOKEN_KEY")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "access_token".to_string()),

            refresh_token_key: std::env::var("REFRESH_TOKEN_KEY")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "refresh_token".to_string()),

            login_path: std::env::var("LOGIN_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/login".to_string()),

            log_level: args.log_level.clone(),
            log_json: args.log_json,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;

        if self.api_timeout.is_zero() {
            anyhow::bail!("API_TIMEOUT must be greater than zero");
        }

        if self.access_token_key == self.refresh_token_key {
            anyhow::bail!(
                "ACCESS_TOKEN_KEY and REFRESH_TOKEN_KEY must differ (both are '{}')",
                self.access_token_key
            );
        }

        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_base_url.clone(),
            timeout: self.api_timeout,
            login_path: self.login_path.clone(),
        }
    }

    pub fn credential_keys(&self) -> CredentialKeys {
        CredentialKeys {
            access_token: self.access_token_key.clone(),
            refresh_token: self.refresh_token_key.clone(),
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// `<data dir>/rental-client/storage.sqlite3`, or the working directory if there is none
fn default_storage_file() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("rental-client"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storage.sqlite3")
}
