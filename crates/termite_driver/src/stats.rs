//! Resource accounting for tasks, statements and reply buffers.
//!
//! Every acquisition hands out a [`ReleaseToken`]; dropping the token
//! records the release, so counters balance on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Task,
    Statement,
    Reply,
}

#[derive(Debug, Default)]
pub struct ResourceStats {
    tasks_started: AtomicU64,
    tasks_freed: AtomicU64,
    statements_prepared: AtomicU64,
    statements_finalized: AtomicU64,
    replies_built: AtomicU64,
    replies_released: AtomicU64,
    prepare_failures: AtomicU64,
    unknown_commands: AtomicU64,
    delivery_failures: AtomicU64,
}

impl ResourceStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count an acquisition; the returned token counts the release on drop.
    pub fn acquire(self: &Arc<Self>, resource: Resource) -> ReleaseToken {
        self.acquired(resource).fetch_add(1, Ordering::Relaxed);
        ReleaseToken {
            stats: Arc::clone(self),
            resource,
        }
    }

    pub fn record_prepare_failure(&self) {
        self.prepare_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_command(&self) {
        self.unknown_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_freed: self.tasks_freed.load(Ordering::Relaxed),
            statements_prepared: self.statements_prepared.load(Ordering::Relaxed),
            statements_finalized: self.statements_finalized.load(Ordering::Relaxed),
            replies_built: self.replies_built.load(Ordering::Relaxed),
            replies_released: self.replies_released.load(Ordering::Relaxed),
            prepare_failures: self.prepare_failures.load(Ordering::Relaxed),
            unknown_commands: self.unknown_commands.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }

    fn acquired(&self, resource: Resource) -> &AtomicU64 {
        match resource {
            Resource::Task => &self.tasks_started,
            Resource::Statement => &self.statements_prepared,
            Resource::Reply => &self.replies_built,
        }
    }

    fn released(&self, resource: Resource) -> &AtomicU64 {
        match resource {
            Resource::Task => &self.tasks_freed,
            Resource::Statement => &self.statements_finalized,
            Resource::Reply => &self.replies_released,
        }
    }
}

/// Records the release of one acquired resource when dropped.
#[derive(Debug)]
pub struct ReleaseToken {
    stats: Arc<ResourceStats>,
    resource: Resource,
}

impl ReleaseToken {
    pub fn resource(&self) -> Resource {
        self.resource
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.stats
            .released(self.resource)
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub tasks_started: u64,
    pub tasks_freed: u64,
    pub statements_prepared: u64,
    pub statements_finalized: u64,
    pub replies_built: u64,
    pub replies_released: u64,
    pub prepare_failures: u64,
    pub unknown_commands: u64,
    pub delivery_failures: u64,
}

impl ResourceSnapshot {
    /// True when everything acquired has been released.
    pub fn is_balanced(&self) -> bool {
        self.tasks_started == self.tasks_freed
            && self.statements_prepared == self.statements_finalized
            && self.replies_built == self.replies_released
    }
}
