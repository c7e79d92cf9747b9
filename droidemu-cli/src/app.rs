use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Device identifier used when `--device-id` is not given.
pub const DEFAULT_DEVICE_ID: &str = "sxWduByOxADMuITM5ADNy4SQzEVQgszREZjTQZENwMjMgsTat9WYphFI7kWbvFWaYByOgsDI7AyOwc2d3gXY1pVMvNFSsZTR5pUZE5mM2oWQvpnc3IkSWh0aEVFR";

/// droidemu - run AArch64 Android libraries on any host
#[derive(Debug, Parser)]
#[command(name = "droidemu", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate an X-App-Token by calling AuthUtils.getToken in libauth.so.
    Token {
        /// Path to libauth.so (arm64-v8a).
        #[arg(short, long, value_name = "FILE")]
        library: PathBuf,

        /// Device identifier passed to getToken.
        #[arg(short, long, default_value = DEFAULT_DEVICE_ID)]
        device_id: String,

        /// Override the instruction budget per call.
        #[arg(long, value_name = "COUNT")]
        max_instructions: Option<u64>,

        /// Override the wall-clock budget per call.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Display image overview: base, segments, imports and exports.
    Info {
        /// Path to the shared object.
        #[arg(short, long, value_name = "FILE")]
        library: PathBuf,
    },
}
