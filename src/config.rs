use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_HEALTH_POLL_INTERVAL_SECS, DEFAULT_HTTP_PROBE_TIMEOUT_SECS};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_path: String,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    /// Shared HMAC key used by the deployment backend to sign events
    pub app_secret_key: String,
    /// Pepper mixed into hashed consent visitor identifiers
    pub visitor_id_pepper: String,
    pub admin_secret_key: Option<String>,
    pub health_poll_interval_secs: u64,
    pub http_probe_timeout_secs: u64,
    /// Base URL of the serverless functions, e.g. `https://x.supabase.co/functions/v1`
    pub functions_base_url: Option<String>,
    pub functions_api_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub alert_email_from: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "Invalid SERVER_PORT")?;

        let database_path = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/author-platform.db".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let app_secret_key = env::var("APP_SECRET_KEY")
            .map_err(|_| "APP_SECRET_KEY must be set for deployment event signatures")?;

        let visitor_id_pepper = env::var("VISITOR_ID_PEPPER")
            .map_err(|_| "VISITOR_ID_PEPPER must be set for consent logging")?;

        let admin_secret_key = optional_var("ADMIN_SECRET_KEY");

        let health_poll_interval_secs = env::var("HEALTH_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_HEALTH_POLL_INTERVAL_SECS.to_string())
            .parse()
            .map_err(|_| "Invalid HEALTH_POLL_INTERVAL_SECS")?;

        let http_probe_timeout_secs = env::var("HTTP_PROBE_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_HTTP_PROBE_TIMEOUT_SECS.to_string())
            .parse()
            .map_err(|_| "Invalid HTTP_PROBE_TIMEOUT_SECS")?;

        let functions_base_url =
            optional_var("FUNCTIONS_BASE_URL").map(|url| url.trim_end_matches('/').to_string());
        let functions_api_key = optional_var("FUNCTIONS_API_KEY");
        let resend_api_key = optional_var("RESEND_API_KEY");

        let alert_email_from = env::var("ALERT_EMAIL_FROM")
            .unwrap_or_else(|_| "security@authorplatform.local".to_string());

        Ok(Config {
            server_host,
            server_port,
            database_path,
            allowed_origins,
            environment,
            app_secret_key,
            visitor_id_pepper,
            admin_secret_key,
            health_poll_interval_secs,
            http_probe_timeout_secs,
            functions_base_url,
            functions_api_key,
            resend_api_key,
            alert_email_from,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs.max(1))
    }

    pub fn http_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.http_probe_timeout_secs.max(1))
    }
}

/// Read an env var, treating unset and empty the same
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 9000,
            database_path: String::new(),
            allowed_origins: vec![],
            environment: "test".to_string(),
            app_secret_key: "k".to_string(),
            visitor_id_pepper: "p".to_string(),
            admin_secret_key: None,
            health_poll_interval_secs: 0,
            http_probe_timeout_secs: 3,
            functions_base_url: None,
            functions_api_key: None,
            resend_api_key: None,
            alert_email_from: "a@b.c".to_string(),
        }
    }

    #[test]
    fn test_server_address() {
        assert_eq!(sample().server_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        assert_eq!(sample().health_poll_interval(), Duration::from_secs(1));
        assert_eq!(sample().http_probe_timeout(), Duration::from_secs(3));
    }
}
