pub mod manager;
pub mod server;

pub use manager::{ConfigStore, SaveOutcome};
pub use server::start_config_server;
