pub mod config;
pub mod daemon;
pub mod domains;
pub mod error;
pub mod generation_fsm;
pub mod interfaces;
pub mod logging;
pub mod providers;
pub mod runtime_paths;
pub mod services;

pub type Result<T> = std::result::Result<T, error::ChaiRelayError>;

pub const GIT_SHA: &str = env!("CHAI_RELAY_GIT_SHA");
