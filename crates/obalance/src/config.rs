//! Configuration for the balancer.
//!
//! Loaded from a TOML file: a list of services (each a private key
//! path plus backend instance addresses) and a handful of timing
//! tunables. Defaults match long-standing deployment practice; most
//! configurations only need the `[[services]]` entries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::err::ConfigError;

/// Complete balancer configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct Config {
    /// Number of replicas (independent descriptor IDs) to publish per
    /// service and time period.
    #[serde(default = "default_replicas")]
    pub replicas: u8,

    /// Maximum number of introduction points in any one descriptor.
    #[serde(default = "default_max_intro_points")]
    pub max_intro_points: usize,

    /// How long a published descriptor stays valid.
    #[serde(default = "default_validity_period", with = "humantime_serde")]
    pub descriptor_validity_period: Duration,

    /// How close to a descriptor-ID rollover we also publish under the
    /// next period's ID.
    #[serde(default = "default_overlap_period", with = "humantime_serde")]
    pub descriptor_overlap_period: Duration,

    /// Re-upload the master descriptor after this long even if nothing
    /// changed. Also the staleness bound for instance descriptors.
    #[serde(default = "default_upload_period", with = "humantime_serde")]
    pub descriptor_upload_period: Duration,

    /// How often to request fresh instance descriptors.
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// How often to evaluate whether each service needs a publish.
    #[serde(default = "default_publish_check_interval", with = "humantime_serde")]
    pub publish_check_interval: Duration,

    /// Delay between the staggered first runs of the scheduled jobs.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Number of responsible HSDirs per descriptor ID.
    #[serde(default = "default_hsdir_set")]
    pub hsdir_set: usize,

    /// Publish a distinct descriptor per responsible HSDir when more
    /// introduction points are available than fit in one descriptor.
    #[serde(default)]
    pub distinct_descriptors: bool,

    /// Where to listen for status connections, if anywhere.
    #[serde(default)]
    pub status_socket_location: Option<PathBuf>,

    /// The services to balance.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Configuration for one front-facing service.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct ServiceConfig {
    /// Path to the service's PEM-encoded RSA private key.
    pub key: PathBuf,
    /// The backend instances serving this address.
    pub instances: Vec<InstanceConfig>,
}

/// Configuration for one backend instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct InstanceConfig {
    /// The instance's onion address, without the `.onion` suffix.
    pub address: String,
    /// Authentication cookie for the instance's descriptor, carried
    /// opaquely.
    #[serde(default)]
    pub auth: Option<String>,
}

/// Default replica count.
fn default_replicas() -> u8 {
    2
}
/// Default introduction-point cap.
fn default_max_intro_points() -> usize {
    10
}
/// Default descriptor validity period.
fn default_validity_period() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}
/// Default descriptor-ID overlap period.
fn default_overlap_period() -> Duration {
    Duration::from_secs(60 * 60)
}
/// Default re-upload period.
fn default_upload_period() -> Duration {
    Duration::from_secs(60 * 60)
}
/// Default instance-descriptor refresh interval.
fn default_refresh_interval() -> Duration {
    Duration::from_secs(10 * 60)
}
/// Default publish-check interval.
fn default_publish_check_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
/// Default inter-job delay for the staggered first run.
fn default_initial_delay() -> Duration {
    Duration::from_secs(45)
}
/// Default responsible-HSDir set size.
fn default_hsdir_set() -> usize {
    3
}

impl Config {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_owned(),
            error: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check tunables for values we refuse to run with.
    ///
    /// (Key loading and per-service checks happen later, when the
    /// services are actually built.)
    fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas == 0 {
            return Err(ConfigError::InvalidValue {
                field: "replicas",
                problem: "must be at least 1",
            });
        }
        if self.max_intro_points == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_intro_points",
                problem: "must be at least 1",
            });
        }
        if self.hsdir_set == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hsdir_set",
                problem: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            replicas: default_replicas(),
            max_intro_points: default_max_intro_points(),
            descriptor_validity_period: default_validity_period(),
            descriptor_overlap_period: default_overlap_period(),
            descriptor_upload_period: default_upload_period(),
            refresh_interval: default_refresh_interval(),
            publish_check_interval: default_publish_check_interval(),
            initial_delay: default_initial_delay(),
            hsdir_set: default_hsdir_set(),
            distinct_descriptors: false,
            status_socket_location: None,
            services: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.replicas, 2);
        assert_eq!(config.max_intro_points, 10);
        assert_eq!(
            config.descriptor_validity_period,
            Duration::from_secs(86400)
        );
        assert_eq!(config.descriptor_overlap_period, Duration::from_secs(3600));
        assert_eq!(config.descriptor_upload_period, Duration::from_secs(3600));
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.publish_check_interval, Duration::from_secs(300));
        assert_eq!(config.initial_delay, Duration::from_secs(45));
        assert_eq!(config.hsdir_set, 3);
        assert!(!config.distinct_descriptors);
        assert!(config.services.is_empty());
    }

    #[test]
    fn full_file() {
        let config = Config::from_toml(
            r#"
            replicas = 3
            max_intro_points = 8
            refresh_interval = "2m 30s"
            distinct_descriptors = true
            status_socket_location = "/var/run/obalance/control"

            [[services]]
            key = "/etc/obalance/front.key"
            instances = [
                { address = "r523s7jx65ckitf4" },
                { address = "v2q7ujuleky7odph", auth = "0GaFhnbunp0TxZuxjeCdxg" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.replicas, 3);
        assert_eq!(config.refresh_interval, Duration::from_secs(150));
        assert!(config.distinct_descriptors);
        assert_eq!(config.services.len(), 1);
        let service = &config.services[0];
        assert_eq!(service.instances.len(), 2);
        assert_eq!(service.instances[0].address, "r523s7jx65ckitf4");
        assert_eq!(service.instances[0].auth, None);
        assert_eq!(
            service.instances[1].auth.as_deref(),
            Some("0GaFhnbunp0TxZuxjeCdxg")
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            Config::from_toml("descriptor_flavor = \"v9\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_zero_replicas() {
        assert!(matches!(
            Config::from_toml("replicas = 0"),
            Err(ConfigError::InvalidValue {
                field: "replicas",
                ..
            })
        ));
    }
}
