use std::io;
#[cfg(not(unix))]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
#[cfg(not(unix))]
use tracing::error;
use tracing::info;

/// Process-wide shutdown signal.
///
/// Wraps a single [`CancellationToken`] that is handed to every blocking call.
/// It is triggered at most once, either by an OS signal or programmatically.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token to pass into cancellable calls.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutting down...");
            self.token.cancel();
        }
    }

    /// Installs SIGINT/SIGTERM handlers; the first signal triggers shutdown.
    ///
    /// Handlers are registered before this returns; installation errors go to
    /// the caller.
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        let mut signals = Signals::install()?;
        let shutdown = self.clone();
        Ok(tokio::spawn(async move {
            tokio::select! {
                name = signals.recv() => {
                    info!(signal = name, "Received termination signal");
                    shutdown.trigger();
                }
                _ = shutdown.token.cancelled() => {}
            }
        }))
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: unix::Signal,
    terminate: unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: unix::signal(unix::SignalKind::interrupt())?,
            terminate: unix::signal(unix::SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}
