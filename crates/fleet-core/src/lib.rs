pub mod config;
pub mod duration;

pub use config::{ConfigError, FleetConfig, LockConfig, LogFormat, MAX_DURATION, RedisConfig};
pub use duration::parse_duration;
