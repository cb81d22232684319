//! Configuration for Strandgate

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrandgateConfig {
    #[serde(default)]
    pub ldap: LdapListenerConfig,

    #[serde(default)]
    pub ldaps: LdapsListenerConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl StrandgateConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("STRANDGATE_LDAP_ADDRESS") {
            config.ldap.bind_address = addr;
        }
        if let Ok(addr) = std::env::var("STRANDGATE_LDAPS_ADDRESS") {
            config.ldaps.bind_address = addr;
        }
        if std::env::var("STRANDGATE_LDAPS_ENABLED")
            .map(|v| v == "false")
            .unwrap_or(false)
        {
            config.ldaps.enabled = false;
        }
        if let Ok(cert) = std::env::var("STRANDGATE_TLS_CERT") {
            config.ldaps.cert_file = PathBuf::from(cert);
        }
        if let Ok(key) = std::env::var("STRANDGATE_TLS_KEY") {
            config.ldaps.key_file = PathBuf::from(key);
        }
        if let Ok(url) = std::env::var("STRANDGATE_DECISION_URL") {
            config.decision.base_url = url;
        }
        if let Ok(timeout) = std::env::var("STRANDGATE_DECISION_TIMEOUT") {
            if let Some(t) = parse_env_secs("STRANDGATE_DECISION_TIMEOUT", &timeout) {
                config.decision.timeout_secs = t;
            }
        }
        if let Ok(level) = std::env::var("STRANDGATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRANDGATE_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(addr) = std::env::var("STRANDGATE_METRICS_ADDRESS") {
            config.metrics.enabled = true;
            config.metrics.bind_address = addr;
        }

        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.ldap.bind_address.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "ldap.bind_address must not be empty".into(),
            ));
        }
        self.ldaps.validate()?;
        self.decision.validate()?;
        Ok(())
    }
}

/// Parse a whole number of seconds from an environment variable, warning
/// and keeping the default when it does not parse
fn parse_env_secs(var: &str, value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(e) => {
            warn!(var, value, error = %e, "ignoring invalid environment value");
            None
        }
    }
}

/// Plaintext LDAP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapListenerConfig {
    pub bind_address: String,
}

impl Default for LdapListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: crate::DEFAULT_LDAP_ADDRESS.to_string(),
        }
    }
}

/// LDAPS (TLS) listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapsListenerConfig {
    /// Start the TLS listener
    pub enabled: bool,
    pub bind_address: String,
    /// Path to certificate chain (PEM format)
    pub cert_file: PathBuf,
    /// Path to private key (PEM format)
    pub key_file: PathBuf,
}

impl Default for LdapsListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: crate::DEFAULT_LDAPS_ADDRESS.to_string(),
            cert_file: PathBuf::from("./data/certificate.pem"),
            key_file: PathBuf::from("./data/key.pem"),
        }
    }
}

impl LdapsListenerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.bind_address.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "ldaps.bind_address must not be empty".into(),
            ));
        }
        if !self.cert_file.exists() {
            return Err(crate::Error::InvalidConfig(format!(
                "Certificate file not found: {:?}",
                self.cert_file
            )));
        }
        if !self.key_file.exists() {
            return Err(crate::Error::InvalidConfig(format!(
                "Key file not found: {:?}",
                self.key_file
            )));
        }
        Ok(())
    }
}

/// External decision service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Base URL; `/bind` and `/search` are appended
    pub base_url: String,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            base_url: crate::DEFAULT_DECISION_URL.to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> crate::Result<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            crate::Error::InvalidConfig(format!("Invalid decision.base_url {:?}: {}", self.base_url, e))
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(crate::Error::InvalidConfig(format!(
                "decision.base_url must use http or https, got {}",
                other
            ))),
        }
    }

    pub fn bind_url(&self) -> String {
        self.endpoint("bind")
    }

    pub fn search_url(&self) -> String {
        self.endpoint("search")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Prometheus metrics endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_deployment() {
        let config = StrandgateConfig::default();
        assert_eq!(config.ldap.bind_address, "0.0.0.0:3389");
        assert_eq!(config.ldaps.bind_address, "0.0.0.0:6636");
        assert_eq!(config.ldaps.cert_file, PathBuf::from("./data/certificate.pem"));
        assert_eq!(config.ldaps.key_file, PathBuf::from("./data/key.pem"));
        assert_eq!(config.decision.bind_url(), "http://localhost:25565/bind");
        assert_eq!(config.decision.search_url(), "http://localhost:25565/search");
    }

    #[test]
    fn test_partial_toml() {
        let config = StrandgateConfig::from_toml(
            r#"
            [decision]
            base_url = "http://authority:8080/"
            timeout_secs = 5
            connect_timeout_secs = 1

            [ldaps]
            enabled = false
            bind_address = "127.0.0.1:6636"
            cert_file = "cert.pem"
            key_file = "key.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.ldap.bind_address, "0.0.0.0:3389");
        assert!(!config.ldaps.enabled);
        assert_eq!(config.decision.bind_url(), "http://authority:8080/bind");
        assert_eq!(config.decision.timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let err = StrandgateConfig::from_toml("[ldap\nbind_address = 1").unwrap_err();
        assert_eq!(err.code(), "InvalidConfig");
    }

    #[test]
    fn test_decision_url_validation() {
        let mut decision = DecisionConfig::default();
        assert!(decision.validate().is_ok());

        decision.base_url = "ftp://authority".to_string();
        assert!(decision.validate().is_err());

        decision.base_url = "not a url".to_string();
        assert!(decision.validate().is_err());
    }

    #[test]
    fn test_ldaps_requires_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut ldaps = LdapsListenerConfig {
            cert_file: dir.path().join("cert.pem"),
            key_file: dir.path().join("key.pem"),
            ..Default::default()
        };
        assert!(ldaps.validate().is_err());

        std::fs::write(&ldaps.cert_file, "cert").unwrap();
        std::fs::write(&ldaps.key_file, "key").unwrap();
        assert!(ldaps.validate().is_ok());

        ldaps.enabled = false;
        ldaps.cert_file = PathBuf::from("/nonexistent");
        assert!(ldaps.validate().is_ok());
    }

    #[test]
    fn test_env_seconds_parsing() {
        assert_eq!(parse_env_secs("STRANDGATE_DECISION_TIMEOUT", "5"), Some(5));
        assert_eq!(parse_env_secs("STRANDGATE_DECISION_TIMEOUT", " 12 "), Some(12));
        assert_eq!(parse_env_secs("STRANDGATE_DECISION_TIMEOUT", "30s"), None);
        assert_eq!(parse_env_secs("STRANDGATE_DECISION_TIMEOUT", "-1"), None);
    }
}
