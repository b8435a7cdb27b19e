//! CLI-specific functionality
//!
//! Argument parsing and the configuration discovery report printed by
//! `sts show-config`.

pub mod args;

pub use args::{Args, Commands};

use crate::config::{ConfigDiscovery, ServiceConfig};

/// Print where configuration would be loaded from and the effective values.
pub fn show_discovery_info(config: &ServiceConfig) {
    println!("Configuration discovery:");
    match ConfigDiscovery::find_config_file() {
        Some(path) => println!("  file: {}", path.display()),
        None => println!("  file: none found, using defaults"),
    }
    println!();
    match config.to_toml_string() {
        Ok(rendered) => print!("{}", rendered),
        Err(e) => println!("  failed to render configuration: {}", e),
    }
}
