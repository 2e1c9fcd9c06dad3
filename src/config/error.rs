use std::path::PathBuf;

use thiserror::Error;

/// Failures while turning host parameters into a device directory.
///
/// Every variant is terminal for the resolve call that produced it: nothing
/// from a failed resolve is applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("neither `devfile` nor `devlist` is configured")]
    NoDeviceSource,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse devfile {path}: {source}")]
    Devfile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("devfile {0} is missing the `devices` section")]
    MissingDevices(PathBuf),

    #[error("invalid devfile {path}: {reason}")]
    InvalidDevfile { path: PathBuf, reason: String },

    #[error("failed to parse devlist: {0}")]
    Devlist(#[from] serde_json::Error),

    #[error("devlist must be a device object or a list of device objects")]
    InvalidDevlist,

    #[error("failed to parse parameter file: {0}")]
    Params(#[from] toml::de::Error),
}
