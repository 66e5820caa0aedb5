//! Declare error types for the balancer.

use std::path::PathBuf;

use thiserror::Error;

/// An error originated by the balancer while running.
///
/// Almost everything that can go wrong at runtime is logged and
/// retried on the next scheduled cycle; the variants here are the ones
/// that callers may want to act on.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration was unusable. Fatal at startup.
    #[error("Configuration error")]
    Config(#[from] ConfigError),

    /// We need a consensus to pick responsible HSDirs, and don't have
    /// one.
    #[error("Could not determine the responsible HSDirs: no consensus available")]
    NoConsensus,

    /// The control transport reported a failure.
    #[error("Control transport error")]
    Transport(#[from] crate::ctrl::TransportError),

    /// A descriptor could not be built or understood.
    #[error("Descriptor error")]
    Netdoc(#[from] obalance_netdoc::Error),
}

/// An error encountered while loading or validating the configuration.
///
/// All of these are fatal: the process must not start balancing with a
/// half-usable configuration.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file couldn't be read.
    #[error("Unable to read config file {path:?}: {error}")]
    Io {
        /// The file we tried to read.
        path: PathBuf,
        /// What went wrong while reading it.
        error: String,
    },

    /// The configuration file couldn't be parsed.
    #[error("Unable to parse config file: {0}")]
    Parse(String),

    /// A service's private key could not be loaded.
    #[error("Private key {path:?} could not be loaded")]
    Key {
        /// The configured key path.
        path: PathBuf,
        /// Why loading failed.
        #[source]
        source: obalance_crypto::KeyError,
    },

    /// A service was configured with no backend instances.
    #[error("No instances configured for service {address}.onion")]
    NoInstances {
        /// The service's onion address.
        address: String,
    },

    /// The configuration defines no services at all.
    #[error("No services configured")]
    NoServices,

    /// Tried to run a scheduler with no jobs registered.
    #[error("No scheduled jobs found")]
    NoJobs,

    /// A tunable had a value we refuse to run with.
    #[error("Invalid value for {field}: {problem}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// What was wrong with it.
        problem: &'static str,
    },
}
