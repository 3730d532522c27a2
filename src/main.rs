mod cli;
mod watch;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

use bugtap::report::bundle::{print_bundle, read_bundle};
use bugtap::trigger::{DEFAULT_LONG_PRESS_MS, MAX_TAPS, MAX_TOUCHES};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Watch {
            trigger,
            logs,
            out,
            tail_bytes,
        } => {
            let opts = watch::WatchOptions {
                trigger,
                logs,
                out_dir: out,
                tail_bytes,
            };
            if let Err(e) = watch::run(opts).await {
                tracing::error!(error = %e, "watch failed");
                eprintln!("bugtapd watch: {e}");
                std::process::exit(1);
            }
        }
        Command::Inspect { bundle } => match read_bundle(&bundle).await {
            Ok(b) => print_bundle(&b),
            Err(e) => {
                eprintln!("bugtapd inspect: {}: {e}", bundle.display());
                std::process::exit(1);
            }
        },
        Command::Triggers => print_triggers(),
    }
}

fn print_triggers() {
    println!("{:<28} {:<8} DESCRIPTION", "FORM", "X11");
    println!("{}", "-".repeat(72));
    let rows = [
        (
            "key:<Mod+...+Key>".to_string(),
            "yes",
            "key chord on the focused window".to_string(),
        ),
        (
            "long-press:<touches>[:<ms>]".to_string(),
            "no",
            format!("press and hold, default {DEFAULT_LONG_PRESS_MS}ms"),
        ),
        (
            "tap:<touches>x<taps>".to_string(),
            "no",
            format!("up to {MAX_TOUCHES} touches, {MAX_TAPS} taps"),
        ),
        (
            "swipe:<touches>:<dir>".to_string(),
            "no",
            "dir is up, down, left or right".to_string(),
        ),
    ];
    for (form, x11, desc) in rows {
        println!("{form:<28} {x11:<8} {desc}");
    }
}
