//! The per-group time-window state machine (section 4.4):
//! `Idle -> Accumulating -> Emitting -> Idle`, modeled as a map of group-key
//! to accumulated instances plus a reset-in-place deadline (section 9:
//! "the job-processor timer is a per-group scheduled wake, cancellable on
//! new-instance arrival ... by letting the timer expire and re-enqueue" —
//! here the timer task itself re-reads the deadline rather than being
//! cancelled, which is the reset-in-place variant).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::model::InstanceStorageInfo;

struct GroupState {
    instances: Vec<InstanceStorageInfo>,
    deadline: Instant,
}

/// Shared accumulator for every group key of one LocalAE's processor.
/// `timeout` is the per-processor window length; arrival of an instance
/// for an existing group resets its deadline to `now + timeout`
/// (Accumulating -> Accumulating in the state diagram).
pub struct GroupAccumulator {
    timeout: Duration,
    groups: Mutex<HashMap<String, GroupState>>,
}

impl GroupAccumulator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Records `info` under `group_key`. Returns `true` if this is the
    /// first instance of a new window (Idle -> Accumulating), meaning the
    /// caller must spawn the window's timer task.
    pub fn record(&self, group_key: &str, info: InstanceStorageInfo) -> bool {
        let mut groups = self.groups.lock().unwrap();
        let deadline = Instant::now() + self.timeout;
        match groups.get_mut(group_key) {
            Some(state) => {
                state.instances.push(info);
                state.deadline = deadline;
                false
            }
            None => {
                groups.insert(
                    group_key.to_string(),
                    GroupState {
                        instances: vec![info],
                        deadline,
                    },
                );
                true
            }
        }
    }

    fn current_deadline(&self, group_key: &str) -> Option<Instant> {
        self.groups
            .lock()
            .unwrap()
            .get(group_key)
            .map(|s| s.deadline)
    }

    /// Removes and returns the group's accumulated instances if `now` is at
    /// or past its deadline (Emitting -> Idle); `None` if the deadline has
    /// since been pushed out by a late arrival, in which case the caller
    /// should keep waiting on the new deadline.
    fn take_if_expired(&self, group_key: &str, now: Instant) -> Option<Vec<InstanceStorageInfo>> {
        let mut groups = self.groups.lock().unwrap();
        let expired = groups.get(group_key).is_some_and(|s| s.deadline <= now);
        if expired {
            groups.remove(group_key).map(|s| s.instances)
        } else {
            None
        }
    }

    /// Runs until the window has genuinely expired (following every
    /// reset), then emits the accumulated instance list via `emit`.
    /// Exits early, emitting nothing, if `cancel` fires first.
    pub async fn run_window(
        self: Arc<Self>,
        group_key: String,
        cancel: tokio_util::sync::CancellationToken,
        emit: impl FnOnce(Vec<InstanceStorageInfo>),
    ) {
        loop {
            let Some(deadline) = self.current_deadline(&group_key) else {
                return;
            };
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            if let Some(instances) = self.take_if_expired(&group_key, Instant::now()) {
                emit(instances);
                return;
            }
        }
    }
}
