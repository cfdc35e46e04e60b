//! InstanceCleanupQueue (section 2 item 1) and its single consumer,
//! SpaceReclaimer (section 4.8).

use camino::Utf8PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::health::{HealthReporter, ServiceState};

/// An unbounded FIFO of staged file paths awaiting deletion. Cloning the
/// handle is cheap; every clone shares the same channel.
#[derive(Clone)]
pub struct InstanceCleanupQueue {
    sender: UnboundedSender<Utf8PathBuf>,
}

impl InstanceCleanupQueue {
    pub fn new() -> (Self, UnboundedReceiver<Utf8PathBuf>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Pushes a path for eventual deletion. The queue is unbounded so this
    /// never blocks; an error here means the reclaimer has already shut
    /// down, which is fine during process exit.
    pub fn push(&self, path: Utf8PathBuf) {
        let _ = self.sender.send(path);
    }
}

/// Drains `receiver`, best-effort deleting each path. A path that no
/// longer exists is treated as already-reclaimed, not an error.
pub async fn space_reclaimer(
    mut receiver: UnboundedReceiver<Utf8PathBuf>,
    health: HealthReporter,
    cancel: CancellationToken,
) {
    health.set("SpaceReclaimer", ServiceState::Running);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => {
                match next {
                    Some(path) => reclaim_one(&path).await,
                    None => break,
                }
            }
        }
    }
    health.set("SpaceReclaimer", ServiceState::Stopped);
}

async fn reclaim_one(path: &Utf8PathBuf) {
    match fs_err::tokio::remove_file(path).await {
        Ok(()) => tracing::debug!(event = "reclaim", path = %path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(event = "reclaim", path = %path, error = %e, "failed to delete"),
    }
}
