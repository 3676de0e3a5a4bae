// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Hot tickers the ingestor subscribes to and the backfill loop sweeps.
pub const HOT_TICKERS: &[&str] = &[
    "SPY", "QQQ", "IWM", "AAPL", "TSLA", "NVDA", "AMD", "MSFT", "META", "AMZN",
];

pub const DEFAULT_PORT: u16 = 5000;
pub const REST_BASE_URL: &str = "https://api.massive.com";
pub const OPTIONS_WS_URL: &str = "wss://socket.polygon.io/options";

/// Deployment target for the binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment {
                value: other.to_string(),
            }),
        }
    }
}

/// Process configuration assembled from the shell environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: Environment,
    pub port: u16,
    pub frontend_url: Option<String>,
    pub api_key: String,
    pub rest_base_url: String,
    pub options_ws_url: String,
    pub hot_tickers: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_name = env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
        let env = Environment::from_str(&env_name)?;
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value: raw })?,
            Err(_) => DEFAULT_PORT,
        };
        let api_key = env::var("POLYGON_API_KEY")
            .or_else(|_| env::var("MASSIVE_API_KEY"))
            .map_err(|_| ConfigError::MissingApiKey)?;
        Ok(Self {
            env,
            port,
            frontend_url: env::var("FRONTEND_URL").ok().filter(|s| !s.is_empty()),
            api_key,
            rest_base_url: REST_BASE_URL.to_string(),
            options_ws_url: OPTIONS_WS_URL.to_string(),
            hot_tickers: HOT_TICKERS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn env_label(&self) -> &'static str {
        match self.env {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// CORS origins the outer router should allow. Localhost origins are
    /// auto-allowed in development.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = Vec::new();
        if let Some(url) = &self.frontend_url {
            origins.push(url.clone());
        }
        if self.env == Environment::Development {
            origins.push("http://localhost:3000".to_string());
            origins.push("http://127.0.0.1:3000".to_string());
        }
        origins
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown environment '{value}' (expected 'development' or 'production')")]
    UnknownEnvironment { value: String },
    #[error("invalid PORT value '{value}'")]
    InvalidPort { value: String },
    #[error("missing POLYGON_API_KEY / MASSIVE_API_KEY")]
    MissingApiKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parse_is_case_insensitive() {
        assert_eq!(
            Environment::from_str("Production").unwrap(),
            Environment::Production
        );
        assert!(Environment::from_str("staging").is_err());
    }

    #[test]
    fn development_allows_localhost() {
        let config = AppConfig {
            env: Environment::Development,
            port: DEFAULT_PORT,
            frontend_url: Some("https://app.example.com".to_string()),
            api_key: "k".to_string(),
            rest_base_url: REST_BASE_URL.to_string(),
            options_ws_url: OPTIONS_WS_URL.to_string(),
            hot_tickers: vec![],
        };
        let origins = config.allowed_origins();
        assert!(origins.contains(&"https://app.example.com".to_string()));
        assert!(origins.iter().any(|o| o.contains("localhost")));
    }

    #[test]
    fn production_only_allows_frontend_url() {
        let config = AppConfig {
            env: Environment::Production,
            port: DEFAULT_PORT,
            frontend_url: Some("https://app.example.com".to_string()),
            api_key: "k".to_string(),
            rest_base_url: REST_BASE_URL.to_string(),
            options_ws_url: OPTIONS_WS_URL.to_string(),
            hot_tickers: vec![],
        };
        assert_eq!(config.allowed_origins().len(), 1);
    }
}
