//! Shutdown hook: turns a process termination signal into a container
//! shutdown, then waits a bounded time for the run loop to finish. Past the
//! grace period `Container::run` stops waiting on the run loop and releases
//! its stages.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::container::control::ContainerControl;

/// Resolves when the process is asked to terminate.
pub type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// SIGINT, SIGTERM or SIGQUIT on unix; Ctrl-C elsewhere.
pub fn termination_signal() -> ShutdownSignal {
    Box::pin(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let signals = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
                signal(SignalKind::quit()),
            );
            match signals {
                (Ok(mut int), Ok(mut term), Ok(mut quit)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT"),
                        _ = term.recv() => info!("Received SIGTERM"),
                        _ = quit.recv() => info!("Received SIGQUIT"),
                    }
                    return;
                }
                _ => warn!("Failed to install unix signal handlers, falling back to Ctrl-C"),
            }
        }
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C; shutdown hook disabled");
            std::future::pending::<()>().await;
        }
    })
}

pub(crate) struct ShutdownHook {
    handle: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownHook {
    pub(crate) fn install(
        control: Arc<ContainerControl>,
        signal: ShutdownSignal,
        grace: Duration,
    ) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let handle = tokio::spawn(async move {
            signal.await;
            flag.store(true, Ordering::SeqCst);
            info!("Shutdown hook fired");
            control.request_shutdown();

            let mut done = control.subscribe_run_loop_done();
            let finished = tokio::time::timeout(grace, done.wait_for(|d| *d))
                .await
                .is_ok();
            if finished {
                info!("Container run loop finished within the shutdown grace period");
            } else {
                error!(
                    grace_ms = grace.as_millis() as u64,
                    dump = %control.diagnostic_dump(),
                    "Timed out waiting for the run loop to finish; proceeding with shutdown"
                );
                control.expire_grace();
            }
        });
        Self { handle, fired }
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// A hook that already fired is left to finish its wait.
    pub(crate) fn remove(self) {
        if !self.has_fired() {
            self.handle.abort();
        }
    }
}
