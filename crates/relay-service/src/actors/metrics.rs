//! Mailbox monitoring for the registry actor.
//!
//! | Level    | Depth      |
//! |----------|------------|
//! | Normal   | <= 100     |
//! | Warning  | 101-500    |
//! | Critical | > 500      |
//!
//! Depth is published as `relay_registry_mailbox_depth`. Every join, relay,
//! key exchange and disconnect passes through the registry mailbox, so a
//! growing depth is the earliest sign the relay is falling behind.

use crate::observability::metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Depth up to which the mailbox is considered healthy.
pub const REGISTRY_MAILBOX_NORMAL: usize = 100;

/// Depth above which the mailbox is critical.
pub const REGISTRY_MAILBOX_WARNING: usize = 500;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// At or below the normal threshold.
    Normal,
    /// Between the normal and warning thresholds.
    Warning,
    /// Above the warning threshold.
    Critical,
}

impl MailboxLevel {
    /// Classify a depth.
    #[must_use]
    pub const fn for_depth(depth: usize) -> Self {
        if depth > REGISTRY_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > REGISTRY_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Tracks queue depth between the handle (enqueue) and the actor (dequeue).
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a monitor with zero depth.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message sent to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_registry_mailbox_depth(new_depth);

        match MailboxLevel::for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "relay.actor.mailbox",
                    depth = new_depth,
                    threshold = REGISTRY_MAILBOX_WARNING,
                    "Registry mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == REGISTRY_MAILBOX_NORMAL + 1 => {
                debug!(
                    target: "relay.actor.mailbox",
                    depth = new_depth,
                    "Registry mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message taken off the mailbox and processed.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_registry_mailbox_depth(previous.saturating_sub(1));
    }

    /// Record a message that never reached the actor (send failed).
    pub fn record_send_failed(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    /// Current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Peak depth since creation.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Current level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::for_depth(self.current_depth())
    }
}
