//! Gatekeeper Configuration Settings
//!
//! Configuration types for the gatekeeper, loaded from environment variables.

use std::path::PathBuf;

use crate::domain::access::{AccessControlList, AclError};

/// Inline ACL JSON.
pub const ACL_ENV: &str = "GATEKEEPER_ACL";
/// Path to an ACL JSON file, read when `GATEKEEPER_ACL` is unset.
pub const ACL_FILE_ENV: &str = "GATEKEEPER_ACL_FILE";

/// Telemetry hub capacity settings.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Capacity of the publish queue feeding the dispatch loop.
    pub publish_queue_capacity: usize,
    /// Undelivered items buffered per subscriber.
    pub subscriber_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            publish_queue_capacity: 4096,
            subscriber_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 50051,
            health_port: 8083,
        }
    }
}

/// Complete gatekeeper configuration.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    /// Access-control list, validated.
    pub acl: AccessControlList,
    /// Server port settings.
    pub server: ServerSettings,
    /// Telemetry hub settings.
    pub hub: HubSettings,
}

impl GatekeeperConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no ACL is configured or it fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if no ACL is configured or it fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let acl_json = match lookup(ACL_ENV) {
            Some(inline) => inline,
            None => {
                let path = lookup(ACL_FILE_ENV)
                    .ok_or_else(|| ConfigError::MissingEnvVar(format!("{ACL_ENV} or {ACL_FILE_ENV}")))?;
                if path.is_empty() {
                    return Err(ConfigError::EmptyValue(ACL_FILE_ENV.to_string()));
                }
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::AclFile { path, source })?
            }
        };

        if acl_json.trim().is_empty() {
            return Err(ConfigError::EmptyValue(ACL_ENV.to_string()));
        }

        let acl = AccessControlList::from_json(&acl_json)?;

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            grpc_port: parse_or(&lookup, "GATEKEEPER_GRPC_PORT", server_defaults.grpc_port),
            health_port: parse_or(&lookup, "GATEKEEPER_HEALTH_PORT", server_defaults.health_port),
        };

        let hub_defaults = HubSettings::default();
        let hub = HubSettings {
            publish_queue_capacity: parse_or(
                &lookup,
                "GATEKEEPER_PUBLISH_QUEUE_CAPACITY",
                hub_defaults.publish_queue_capacity,
            ),
            subscriber_capacity: parse_or(
                &lookup,
                "GATEKEEPER_SUBSCRIBER_CAPACITY",
                hub_defaults.subscriber_capacity,
            ),
        };

        Ok(Self { acl, server, hub })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// The ACL file could not be read.
    #[error("failed to read ACL file {}: {source}", path.display())]
    AclFile {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The ACL payload is malformed.
    #[error("invalid ACL: {0}")]
    Acl(#[from] AclError),
}

fn parse_or<T: std::str::FromStr + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(
            key,
            value = %raw,
            default = %default,
            "Unparseable setting, using default"
        );
        default
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    const ACL: &str = r#"{"biz_user": ["/main.Biz/Check"], "admin": ["/main.Admin/*"]}"#;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn inline_acl_with_defaults() {
        let config = GatekeeperConfig::from_lookup(lookup(&[(ACL_ENV, ACL)])).unwrap();
        assert_eq!(config.acl.len(), 2);
        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.hub.publish_queue_capacity, 4096);
        assert_eq!(config.hub.subscriber_capacity, 1024);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = GatekeeperConfig::from_lookup(lookup(&[
            (ACL_ENV, ACL),
            ("GATEKEEPER_GRPC_PORT", "6000"),
            ("GATEKEEPER_HEALTH_PORT", "6001"),
            ("GATEKEEPER_PUBLISH_QUEUE_CAPACITY", "16"),
            ("GATEKEEPER_SUBSCRIBER_CAPACITY", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.server.grpc_port, 6000);
        assert_eq!(config.server.health_port, 6001);
        assert_eq!(config.hub.publish_queue_capacity, 16);
        assert_eq!(config.hub.subscriber_capacity, 1024);
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = GatekeeperConfig::from_lookup(lookup(&[
            (ACL_ENV, ACL),
            ("GATEKEEPER_GRPC_PORT", "99999"),
            ("GATEKEEPER_HEALTH_PORT", " 7000 "),
            ("GATEKEEPER_PUBLISH_QUEUE_CAPACITY", "-1"),
            ("GATEKEEPER_SUBSCRIBER_CAPACITY", ""),
        ]))
        .unwrap();
        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.server.health_port, 7000);
        assert_eq!(config.hub.publish_queue_capacity, 4096);
        assert_eq!(config.hub.subscriber_capacity, 1024);
    }

    #[test]
    fn acl_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ACL.as_bytes()).unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let config = GatekeeperConfig::from_lookup(lookup(&[(ACL_FILE_ENV, &path)])).unwrap();
        assert_eq!(config.acl.len(), 2);
    }

    #[test]
    fn missing_acl_is_an_error() {
        let err = GatekeeperConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn unreadable_acl_file_is_an_error() {
        let err = GatekeeperConfig::from_lookup(lookup(&[(ACL_FILE_ENV, "/nonexistent/acl.json")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::AclFile { .. }));
    }

    #[test]
    fn malformed_acl_is_fatal() {
        let err = GatekeeperConfig::from_lookup(lookup(&[(ACL_ENV, r#"{"x": ["nodot"]}"#)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Acl(_)));

        let err = GatekeeperConfig::from_lookup(lookup(&[(ACL_ENV, "not json")])).unwrap_err();
        assert!(matches!(err, ConfigError::Acl(_)));
    }

    #[test]
    fn blank_inline_acl_is_rejected() {
        let err = GatekeeperConfig::from_lookup(lookup(&[(ACL_ENV, "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }
}
