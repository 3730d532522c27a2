//! `bugtapd watch` — the X11 daemon.
//!
//! Installs the global registry on an X11 shell, registers one
//! [`BundleReporter`] against the configured trigger, and pumps X11
//! events on the main thread until a signal arrives. The runtime is
//! current-thread, so the main thread is the registry's UI thread and
//! every fire is delivered there.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal as tokio_signal};

use bugtap::registry::install_global;
use bugtap::report::BundleConfig;
use bugtap::shell::x11::X11Shell;
use bugtap::{BundleReporter, RegistryError, ReporterRef, ShellError, TriggerSpec};

/// Quiet period before an unmatched key release ends the gesture.
const SETTLE_DELAY: Duration = Duration::from_millis(30);

/// Watch daemon errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("X11: {0}")]
    Shell(#[from] ShellError),
    #[error("registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("X11 event thread exited unexpectedly")]
    EventThreadDied,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for [`run`], straight from the command line.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub trigger: TriggerSpec,
    pub logs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub tail_bytes: u64,
}

/// Run until SIGINT/SIGTERM.
pub async fn run(opts: WatchOptions) -> Result<(), WatchError> {
    let shell = Arc::new(X11Shell::connect()?);
    let registry = install_global(shell.clone());

    let bundles = Arc::new(BundleReporter::new(
        BundleConfig {
            logs: opts.logs,
            out_dir: opts.out_dir,
            tail_bytes: opts.tail_bytes,
            trigger: opts.trigger.to_string(),
        },
        tokio::runtime::Handle::current(),
    ));
    let reporter = ReporterRef::from_arc(bundles.clone());

    let handle = registry.register(&reporter, opts.trigger)?;
    tracing::info!(
        reporter = %reporter.id(),
        recognizer = %handle.id(),
        trigger = %handle.spec(),
        logs = reporter.log_store_count(),
        out = %bundles.config().out_dir.display(),
        "watching"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let (mut event_rx, x11_thread) = shell.spawn_events(Arc::clone(&stop))?;

    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;

    let mut thread_died = false;
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::error!("X11 event thread died, shutting down");
                    thread_died = true;
                    break;
                };

                shell.handle_event(&event);
                while let Ok(event) = event_rx.try_recv() {
                    shell.handle_event(&event);
                }
                shell.settle();
            }

            _ = tokio::time::sleep(SETTLE_DELAY), if shell.has_pending_release() => {
                shell.settle();
            }

            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);

    // Releases the key grab.
    registry.unregister(&reporter)?;
    bundles.flush().await;

    if let Err(e) = x11_thread.join() {
        tracing::warn!("X11 event thread panicked: {e:?}");
    }

    tracing::info!("watch stopped");

    if thread_died {
        return Err(WatchError::EventThreadDied);
    }
    Ok(())
}
