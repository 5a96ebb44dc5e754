pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ConfigFile, FileProbeConfig, Header, ReadinessConfig, RunConfig, TargetConfig, WarmupBudget,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
