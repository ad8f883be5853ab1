use std::time::Duration;

use crate::error::CloseCategory;

/// One entry of `AllowedOrigins`: an exact origin, a bare hostname, a
/// `host:port` pair, a `*.host` wildcard, or the literal `null` origin
/// some browser contexts send (sandboxed iframes, local files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    Exact(String),
    Host(String),
    HostPort(String, u16),
    WildcardHost(String),
    Null,
}

impl AllowedOrigin {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "null" {
            return Self::Null;
        }
        if let Some(suffix) = spec.strip_prefix("*.") {
            return Self::WildcardHost(suffix.to_string());
        }
        if spec.contains("://") {
            return Self::Exact(spec.to_string());
        }
        if let Some((host, port)) = spec.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Self::HostPort(host.to_string(), port);
            }
        }
        Self::Host(spec.to_string())
    }

    /// Matches a parsed `Origin` header value (scheme stripped, so the
    /// caller is expected to have already separated scheme from
    /// host[:port]; the `Exact` variant compares the full header
    /// verbatim instead).
    pub fn matches(&self, origin_header: &str, host: &str, port: Option<u16>) -> bool {
        match self {
            Self::Null => origin_header == "null",
            Self::Exact(expected) => origin_header == expected,
            Self::Host(expected) => host == expected && port.is_none(),
            Self::HostPort(expected_host, expected_port) => {
                host == expected_host && port == Some(*expected_port)
            }
            Self::WildcardHost(suffix) => {
                host == suffix || host.strip_suffix(suffix).map(|p| p.ends_with('.')) == Some(true)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("AllowedOrigins must contain at least one non-whitespace entry")]
    EmptyAllowedOrigins,
    #[error("MaxWriteQueueBytes ({write_queue}) must be >= MaxRecordBytes ({record})")]
    WriteQueueSmallerThanRecord { write_queue: usize, record: usize },
    #[error("TunnelAudience must not be empty")]
    EmptyAudience,
    #[error("TunnelIssuer must not be empty")]
    EmptyIssuer,
    #[error("IssuerKeysFile must not be empty")]
    EmptyIssuerKeysFile,
    #[error("failed to load issuer keyset: {0}")]
    KeysetLoad(#[from] flowersec_token::TokenError),
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub path: String,
    pub tunnel_audience: String,
    pub tunnel_issuer: String,
    pub issuer_keys_file: String,
    pub allowed_origins: Vec<AllowedOrigin>,
    pub allow_no_origin: bool,

    pub max_attach_bytes: usize,
    pub max_record_bytes: usize,
    pub max_pending_bytes: usize,
    pub max_total_pending_bytes: usize,
    pub max_channels: usize,
    pub max_conns: usize,

    pub idle_timeout: Duration,
    pub clock_skew: Duration,
    pub cleanup_interval: Duration,
    pub write_timeout: Duration,
    pub max_write_queue_bytes: usize,

    pub replace_cooldown: Duration,
    pub replace_window: Duration,
    pub max_replaces_per_window: u32,
    pub replace_close_category: CloseCategory,
}

impl TunnelConfig {
    pub fn new(
        tunnel_audience: impl Into<String>,
        tunnel_issuer: impl Into<String>,
        issuer_keys_file: impl Into<String>,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            path: "/ws".to_string(),
            tunnel_audience: tunnel_audience.into(),
            tunnel_issuer: tunnel_issuer.into(),
            issuer_keys_file: issuer_keys_file.into(),
            allowed_origins: allowed_origins.iter().map(|s| AllowedOrigin::parse(s)).collect(),
            allow_no_origin: false,
            max_attach_bytes: 8 * 1024,
            max_record_bytes: 1024 * 1024,
            max_pending_bytes: 256 * 1024,
            max_total_pending_bytes: 256 * 1024 * 1024,
            max_channels: 6000,
            max_conns: 12000,
            idle_timeout: Duration::from_secs(60),
            clock_skew: Duration::from_secs(30),
            cleanup_interval: Duration::from_millis(500),
            write_timeout: Duration::from_secs(10),
            max_write_queue_bytes: 1024 * 1024,
            replace_cooldown: Duration::ZERO,
            replace_window: Duration::from_secs(10),
            max_replaces_per_window: 5,
            replace_close_category: CloseCategory::TryAgainLater,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel_audience.is_empty() {
            return Err(ConfigError::EmptyAudience);
        }
        if self.tunnel_issuer.is_empty() {
            return Err(ConfigError::EmptyIssuer);
        }
        if self.issuer_keys_file.is_empty() {
            return Err(ConfigError::EmptyIssuerKeysFile);
        }
        // `AllowedOrigin::parse` trims its input, so a whitespace-only
        // entry (`"   "`) survives `is_empty()` as a non-empty vec
        // holding `Host("")`. Treat that the same as an empty vec: every
        // entry collapsing to an empty host means there was no real
        // origin configured.
        let has_real_origin = self
            .allowed_origins
            .iter()
            .any(|origin| !matches!(origin, AllowedOrigin::Host(host) if host.is_empty()));
        if !has_real_origin {
            return Err(ConfigError::EmptyAllowedOrigins);
        }
        if self.max_write_queue_bytes < self.max_record_bytes {
            return Err(ConfigError::WriteQueueSmallerThanRecord {
                write_queue: self.max_write_queue_bytes,
                record: self.max_record_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TunnelConfig {
        TunnelConfig::new("aud", "iss", "keys.json", vec!["https://example.com".to_string()])
    }

    #[test]
    fn default_config_validates() {
        base().validate().unwrap();
    }

    #[test]
    fn empty_allowed_origins_rejected() {
        let mut cfg = base();
        cfg.allowed_origins.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyAllowedOrigins)));
    }

    #[test]
    fn write_queue_smaller_than_record_rejected() {
        let mut cfg = base();
        cfg.max_write_queue_bytes = cfg.max_record_bytes - 1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WriteQueueSmallerThanRecord { .. })
        ));
    }

    #[test]
    fn wildcard_origin_matches_subdomain() {
        let origin = AllowedOrigin::parse("*.example.com");
        assert!(origin.matches("", "api.example.com", None));
        assert!(origin.matches("", "example.com", None));
        assert!(!origin.matches("", "evilexample.com", None));
    }

    #[test]
    fn host_port_origin_requires_exact_port() {
        let origin = AllowedOrigin::parse("localhost:8080");
        assert!(origin.matches("", "localhost", Some(8080)));
        assert!(!origin.matches("", "localhost", Some(8081)));
    }

    #[test]
    fn null_origin_parses_and_matches() {
        let origin = AllowedOrigin::parse("null");
        assert_eq!(origin, AllowedOrigin::Null);
        assert!(origin.matches("null", "", None));
    }
}
