//! InstanceNotificationBus (section 2 item 3): published to only after an
//! instance has been durably written (write-then-publish, section 5).

use crate::model::InstanceStorageInfo;
use crate::notification_bus::{Bus, Subscription};

#[derive(Default)]
pub struct InstanceNotificationBus {
    bus: Bus<InstanceStorageInfo>,
}

impl InstanceNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<InstanceStorageInfo>
    where
        F: Fn(&InstanceStorageInfo) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn publish(&self, info: InstanceStorageInfo) {
        self.bus.publish(&info);
    }
}
