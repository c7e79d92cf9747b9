mod app;
mod commands;
mod output;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    // First Ctrl+C asks the running guest to stop; the second exits immediately
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
        eprintln!("\nStopping emulation...");
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show droidemu info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("droidemu", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Token {
            library,
            device_id,
            max_instructions,
            timeout_ms,
        } => commands::token::run(
            library,
            &commands::token::TokenOptions {
                device_id,
                max_instructions: *max_instructions,
                timeout_ms: *timeout_ms,
                cancel,
                global: &cli.global,
            },
        ),
        Command::Info { library } => commands::info::run(library, &cli.global),
    }
}
