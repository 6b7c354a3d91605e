//! `idc-groups version`

use crate::cmd::update;
use crate::config::ConfigManager;
use colored::Colorize;

pub fn run(config: &ConfigManager) {
    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").cyan().bold(),
        env!("CARGO_PKG_VERSION").bold()
    );
    println!("  platform: {}", update::asset_name().dimmed());
    println!("  config:   {}", config.config_file().display());
    if let Ok(dir) = config.log_dir() {
        println!("  logs:     {}", dir.display());
    }
}
