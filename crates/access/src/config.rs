//! Configuration for the access point and its registries.
//!
//! [`AccessPointConfig`] is deserializable so an embedding service can load
//! it from its own configuration file; durations use `humantime` notation
//! (`"1h"`, `"5m"`, `"30days"`).

use std::time::Duration;

use certplane_storage::ConfigError;
use serde::{Deserialize, Serialize};

use crate::keys::validate_name;

/// Default grace period during which a rotated-out CA key still verifies (1 hour).
pub const DEFAULT_ROTATION_GRACE_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of the signing grant produced by a token redemption (5 minutes).
pub const DEFAULT_PROVISIONING_GRANT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum validity of a host certificate (30 days).
pub const DEFAULT_MAX_HOST_CERT_VALIDITY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default maximum validity of a user certificate (12 hours).
pub const DEFAULT_MAX_USER_CERT_VALIDITY: Duration = Duration::from_secs(12 * 60 * 60);

/// Default maximum lifetime of a provisioning token (24 hours).
pub const DEFAULT_MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Configuration for [`BackendAccessPoint`](crate::BackendAccessPoint).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use certplane_access::AccessPointConfig;
///
/// let config = AccessPointConfig::builder()
///     .cluster_name("cluster-a")
///     .rotation_grace_period(Duration::from_secs(600))
///     .build()?;
///
/// assert_eq!(config.cluster_name(), "cluster-a");
/// assert_eq!(config.max_token_ttl(), Duration::from_secs(24 * 60 * 60));
/// # Ok::<(), certplane_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessPointConfig {
    /// Cluster identifier stamped into authorities and certificates.
    pub(crate) cluster_name: String,

    /// How long the previous CA public key keeps verifying after a rotation.
    #[serde(with = "humantime_serde", default = "default_rotation_grace_period")]
    pub(crate) rotation_grace_period: Duration,

    /// Lifetime of the signing grant returned by a successful redemption.
    #[serde(with = "humantime_serde", default = "default_provisioning_grant_ttl")]
    pub(crate) provisioning_grant_ttl: Duration,

    /// Upper bound on requested host certificate validity.
    #[serde(with = "humantime_serde", default = "default_max_host_cert_validity")]
    pub(crate) max_host_cert_validity: Duration,

    /// Upper bound on requested user certificate validity.
    #[serde(with = "humantime_serde", default = "default_max_user_cert_validity")]
    pub(crate) max_user_cert_validity: Duration,

    /// Upper bound on provisioning token lifetime.
    #[serde(with = "humantime_serde", default = "default_max_token_ttl")]
    pub(crate) max_token_ttl: Duration,
}

fn default_rotation_grace_period() -> Duration {
    DEFAULT_ROTATION_GRACE_PERIOD
}

fn default_provisioning_grant_ttl() -> Duration {
    DEFAULT_PROVISIONING_GRANT_TTL
}

fn default_max_host_cert_validity() -> Duration {
    DEFAULT_MAX_HOST_CERT_VALIDITY
}

fn default_max_user_cert_validity() -> Duration {
    DEFAULT_MAX_USER_CERT_VALIDITY
}

fn default_max_token_ttl() -> Duration {
    DEFAULT_MAX_TOKEN_TTL
}

#[bon::bon]
impl AccessPointConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `rotation_grace_period` - default 1 hour; zero disables the grace period.
    /// * `provisioning_grant_ttl` - default 5 minutes.
    /// * `max_host_cert_validity` - default 30 days.
    /// * `max_user_cert_validity` - default 12 hours.
    /// * `max_token_ttl` - default 24 hours.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(into)] cluster_name: String,
        #[builder(default = DEFAULT_ROTATION_GRACE_PERIOD)] rotation_grace_period: Duration,
        #[builder(default = DEFAULT_PROVISIONING_GRANT_TTL)] provisioning_grant_ttl: Duration,
        #[builder(default = DEFAULT_MAX_HOST_CERT_VALIDITY)] max_host_cert_validity: Duration,
        #[builder(default = DEFAULT_MAX_USER_CERT_VALIDITY)] max_user_cert_validity: Duration,
        #[builder(default = DEFAULT_MAX_TOKEN_TTL)] max_token_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            cluster_name,
            rotation_grace_period,
            provisioning_grant_ttl,
            max_host_cert_validity,
            max_user_cert_validity,
            max_token_ttl,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field. Call this after deserializing.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Empty`] if `cluster_name` is empty.
    /// - [`ConfigError::BelowMinimum`] if `cluster_name` is not a valid path segment, or if
    ///   any lifetime other than the grace period is shorter than one second.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::Empty { field: "cluster_name" });
        }
        if let Err(err) = validate_name("cluster_name", &self.cluster_name) {
            return Err(ConfigError::BelowMinimum {
                field: "cluster_name",
                min: "a path-safe name".into(),
                value: err.to_string(),
            });
        }

        for (field, value) in [
            ("provisioning_grant_ttl", self.provisioning_grant_ttl),
            ("max_host_cert_validity", self.max_host_cert_validity),
            ("max_user_cert_validity", self.max_user_cert_validity),
            ("max_token_ttl", self.max_token_ttl),
        ] {
            if value < ONE_SECOND {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1s".into(),
                    value: format!("{value:?}"),
                });
            }
        }

        Ok(())
    }

    /// Returns the cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the CA rotation grace period.
    #[must_use]
    pub fn rotation_grace_period(&self) -> Duration {
        self.rotation_grace_period
    }

    /// Returns the lifetime of provisioning grants.
    #[must_use]
    pub fn provisioning_grant_ttl(&self) -> Duration {
        self.provisioning_grant_ttl
    }

    /// Returns the maximum host certificate validity.
    #[must_use]
    pub fn max_host_cert_validity(&self) -> Duration {
        self.max_host_cert_validity
    }

    /// Returns the maximum user certificate validity.
    #[must_use]
    pub fn max_user_cert_validity(&self) -> Duration {
        self.max_user_cert_validity
    }

    /// Returns the maximum provisioning token lifetime.
    #[must_use]
    pub fn max_token_ttl(&self) -> Duration {
        self.max_token_ttl
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AccessPointConfig::builder().cluster_name("example").build().unwrap();

        assert_eq!(config.cluster_name(), "example");
        assert_eq!(config.rotation_grace_period(), DEFAULT_ROTATION_GRACE_PERIOD);
        assert_eq!(config.provisioning_grant_ttl(), DEFAULT_PROVISIONING_GRANT_TTL);
        assert_eq!(config.max_host_cert_validity(), DEFAULT_MAX_HOST_CERT_VALIDITY);
        assert_eq!(config.max_user_cert_validity(), DEFAULT_MAX_USER_CERT_VALIDITY);
        assert_eq!(config.max_token_ttl(), DEFAULT_MAX_TOKEN_TTL);
    }

    #[test]
    fn test_empty_cluster_name() {
        let err = AccessPointConfig::builder().cluster_name("").build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "cluster_name" });
    }

    #[test]
    fn test_cluster_name_must_be_path_safe() {
        let err = AccessPointConfig::builder().cluster_name("a/b").build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "cluster_name", .. }));
    }

    #[test]
    fn test_sub_second_lifetimes_rejected() {
        let err = AccessPointConfig::builder()
            .cluster_name("example")
            .max_token_ttl(Duration::from_millis(500))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_token_ttl", .. }));
    }

    #[test]
    fn test_zero_grace_period_allowed() {
        let config = AccessPointConfig::builder()
            .cluster_name("example")
            .rotation_grace_period(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.rotation_grace_period(), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let json = r#"{
            "cluster_name": "cluster-b",
            "rotation_grace_period": "10m",
            "max_token_ttl": "2h"
        }"#;
        let config: AccessPointConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.rotation_grace_period(), Duration::from_secs(600));
        assert_eq!(config.max_token_ttl(), Duration::from_secs(7200));
        assert_eq!(config.provisioning_grant_ttl(), DEFAULT_PROVISIONING_GRANT_TTL);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = r#"{ "cluster_name": "c", "grace": "1m" }"#;
        assert!(serde_json::from_str::<AccessPointConfig>(json).is_err());
    }
}
