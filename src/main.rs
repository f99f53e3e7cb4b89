use std::process;

use clap::Parser;

use splice::config::{Cli, Config};
use splice::logging::AreaLogger;

fn main() {
    let config = Config::from(Cli::parse());
    AreaLogger::new(config.log_areas.clone(), config.log_priority).install();

    if let Err(e) = splice::repl::run(config) {
        eprintln!("Failed to initialize session: {}", e);
        process::exit(1);
    }
}
