//! The lifecycle supervisor (section 4.14): starts the long-running
//! services, funnels a single cancellation context to all of them, and
//! waits for a clean shutdown on SIGINT/SIGTERM or on any service's early
//! exit.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::health::HealthReporter;

/// Owns the single `CancellationToken` shared by every spawned service and
/// the `JoinSet` collecting their handles.
pub struct Supervisor {
    cancel: CancellationToken,
    health: HealthReporter,
    tasks: JoinSet<(&'static str, anyhow::Result<()>)>,
}

impl Supervisor {
    pub fn new(health: HealthReporter) -> Self {
        Self {
            cancel: CancellationToken::new(),
            health,
            tasks: JoinSet::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn health(&self) -> HealthReporter {
        self.health.clone()
    }

    /// Registers a service under `name`; its future receives no arguments
    /// directly and is expected to watch `cancellation_token()` itself.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move { (name, future.await) });
    }

    /// Runs until a termination signal arrives or a service exits early,
    /// then cancels every remaining service and waits for them to finish
    /// their current work (cooperative, not forced).
    pub async fn run(mut self) -> anyhow::Result<()> {
        tokio::select! {
            _ = wait_for_shutdown_signal() => {
                tracing::info!(event = "supervisor", "shutdown signal received");
            }
            result = self.tasks.join_next() => {
                if let Some(Ok((name, Err(e)))) = result {
                    tracing::error!(event = "supervisor", service = name, error = %e, "service exited with an error");
                } else if let Some(Ok((name, Ok(())))) = result {
                    tracing::warn!(event = "supervisor", service = name, "service exited early");
                }
            }
        }

        self.cancel.cancel();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::info!(event = "supervisor", service = name, "service stopped");
                }
                Ok((name, Err(e))) => {
                    tracing::error!(event = "supervisor", service = name, error = %e, "service stopped with an error");
                }
                Err(e) => {
                    tracing::error!(event = "supervisor", error = %e, "service task panicked");
                }
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(event = "supervisor", error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceState;

    #[tokio::test]
    async fn test_cancellation_token_propagates_to_spawned_services() {
        let mut supervisor = Supervisor::new(HealthReporter::new());
        let token = supervisor.cancellation_token();
        supervisor.health().set("probe", ServiceState::Running);

        supervisor.spawn("probe", async move {
            token.cancelled().await;
            Ok(())
        });

        // Cancel immediately rather than waiting on a real OS signal.
        supervisor.cancel.cancel();
        supervisor.run().await.unwrap();
    }
}
