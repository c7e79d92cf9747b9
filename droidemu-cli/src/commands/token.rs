use std::{
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::Instant,
};

use anyhow::Context;
use droidemu::{
    android::{AppProfile, TokenGenerator},
    emulation::{EmulationConfig, SessionBuilder},
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{abbreviate, file_display_name},
    output::print_output,
};

/// Options for the `token` subcommand.
pub struct TokenOptions<'a> {
    pub device_id: &'a str,
    pub max_instructions: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub cancel: Arc<AtomicBool>,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
struct TokenOutput {
    token: String,
    elapsed_ms: u128,
}

pub fn run(library: &Path, opts: &TokenOptions<'_>) -> anyhow::Result<()> {
    let mut config = EmulationConfig::token();
    if let Some(max) = opts.max_instructions {
        config.limits.max_instructions = max;
    }
    if let Some(ms) = opts.timeout_ms {
        config.limits.timeout_ms = ms;
    }

    let builder = SessionBuilder::new()
        .library_file(library)
        .config(config)
        .cancel_flag(Arc::clone(&opts.cancel));
    let generator = TokenGenerator::with_builder(builder, AppProfile::default(), 1)
        .with_context(|| format!("failed to load {}", file_display_name(library)))?;

    log::info!("Device ID: {}", abbreviate(opts.device_id, 30));
    let start = Instant::now();
    let token = generator
        .generate_token(opts.device_id)
        .context("getToken failed")?;
    let output = TokenOutput {
        token,
        elapsed_ms: start.elapsed().as_millis(),
    };
    log::info!("Generated token in {}ms", output.elapsed_ms);

    print_output(&output, opts.global, |out| {
        println!("X-App-Token: {}", out.token);
    })
}
