mod cli;

use std::process::ExitCode;

use clap::Parser;
use colorbook::logger::{self, LogConfig};
use colorbook::settings::ColoringSettings;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Held until exit so buffered log lines are flushed.
    let _log_guard = logger::init(&LogConfig {
        verbose: args.verbose,
        ..LogConfig::default()
    });

    let mut settings = match &args.config {
        Some(path) => ColoringSettings::load_from(path),
        None => ColoringSettings::load(),
    };
    if let Some(store) = &args.store {
        settings.store_dir = store.clone();
    }

    cli::run(args, settings)
}
