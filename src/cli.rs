use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bugtap::TriggerSpec;
use bugtap::report::DEFAULT_TAIL_BYTES;

#[derive(Parser)]
#[command(name = "bugtapd", about = "Gesture-triggered bug report capture")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch the focused window and capture a report when the trigger fires
    Watch {
        /// Trigger, e.g. key:Super+Shift+B (see `bugtapd triggers`)
        #[arg(long, default_value = "key:Super+Shift+B")]
        trigger: TriggerSpec,

        /// Log file to snapshot into each report (repeatable)
        #[arg(long = "log", required = true)]
        logs: Vec<PathBuf>,

        /// Directory report bundles are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Bytes captured from the end of each log
        #[arg(long, default_value_t = DEFAULT_TAIL_BYTES)]
        tail_bytes: u64,
    },

    /// Print a report bundle
    Inspect {
        /// Path to a .msgpack bundle
        bundle: PathBuf,
    },

    /// List trigger forms
    Triggers,
}
