//! Configuration Module
//!
//! Configuration loading for the gatekeeper service.

mod settings;

pub use settings::{
    ACL_ENV, ACL_FILE_ENV, ConfigError, GatekeeperConfig, HubSettings, ServerSettings,
};
