use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub presence_ttl_secs: u64,
    pub presence_timeout_ms: u64,
    pub auth_timeout_secs: u64,
    pub max_message_length: usize,
    pub max_subject_length: usize,
    pub max_attachments: usize,
    pub notification_queue_capacity: usize,
    pub log_level: String,
    pub stats_log_path: String,
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            ws_path: "/messaging".to_string(),
            database_url: "sqlite:data/ruggine_messaging.db".to_string(),
            redis_url: None,
            jwt_secret: String::new(),
            jwt_issuer: None,
            presence_ttl_secs: 300,
            presence_timeout_ms: 500,
            auth_timeout_secs: 30,
            max_message_length: 5000,
            max_subject_length: 255,
            max_attachments: 10,
            notification_queue_capacity: 256,
            log_level: "info".to_string(),
            stats_log_path: "data/ruggine_messaging_stats.log".to_string(),
            stats_interval_secs: 120,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let jwt_secret = non_empty("JWT_SECRET")
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET must be set to verify bearer tokens"))?;

        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: parsed("SERVER_PORT", defaults.port),
            ws_path: env::var("WS_PATH").unwrap_or(defaults.ws_path),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: non_empty("REDIS_URL"),
            jwt_secret,
            jwt_issuer: non_empty("JWT_ISSUER"),
            presence_ttl_secs: parsed("PRESENCE_TTL_SECS", defaults.presence_ttl_secs),
            presence_timeout_ms: parsed("PRESENCE_TIMEOUT_MS", defaults.presence_timeout_ms),
            auth_timeout_secs: parsed("AUTH_TIMEOUT_SECS", defaults.auth_timeout_secs),
            max_message_length: parsed("MAX_MESSAGE_LENGTH", defaults.max_message_length),
            max_subject_length: parsed("MAX_SUBJECT_LENGTH", defaults.max_subject_length),
            max_attachments: parsed("MAX_ATTACHMENTS", defaults.max_attachments),
            notification_queue_capacity: parsed("NOTIFICATION_QUEUE_CAPACITY", defaults.notification_queue_capacity),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            stats_log_path: env::var("STATS_LOG_PATH").unwrap_or(defaults.stats_log_path),
            stats_interval_secs: parsed("STATS_INTERVAL_SECS", defaults.stats_interval_secs),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.presence_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.ws_path, "/messaging");
        assert_eq!(cfg.bind_addr(), "127.0.0.1:5001");
        assert!(cfg.redis_url.is_none());
    }
}
