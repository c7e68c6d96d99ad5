// Frameworks layer: runtime bootstrap, configuration and level file loading.

pub mod config;
pub mod level_config;
pub mod server;
