use tracing::debug;

/// The two coupled sub-queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    L4s,
    Classic,
}

/// Inter-queue scheduling policy. `select_queue` never names an empty
/// queue; `apply_credit_change` is invoked once per successfully returned
/// packet, never after a drop.
pub trait Scheduler: Send {
    fn select_queue(&self, l4s_empty: bool, classic_empty: bool) -> Option<QueueKind>;

    fn apply_credit_change(&mut self, _served: QueueKind) {}
}

/// Serve L4S whenever it has a packet.
#[derive(Debug, Default)]
pub struct StrictPriority;

impl Scheduler for StrictPriority {
    fn select_queue(&self, l4s_empty: bool, classic_empty: bool) -> Option<QueueKind> {
        if !l4s_empty {
            Some(QueueKind::L4s)
        } else if !classic_empty {
            Some(QueueKind::Classic)
        } else {
            None
        }
    }
}

/// Weighted round-robin over the two queues, driven by a single signed
/// credit counter: serving L4S spends its quantum, serving Classic earns
/// the Classic quantum back. While both queues are backlogged the service
/// ratio converges to `classic_quantum : l4s_quantum`.
#[derive(Debug)]
pub struct WrrScheduler {
    credit: i64,
    l4s_quantum: i64,
    classic_quantum: i64,
}

impl WrrScheduler {
    pub fn new(l4s_quantum: usize, classic_quantum: usize) -> Self {
        debug!(l4s_quantum, classic_quantum, "New WrrScheduler");
        Self {
            credit: 0,
            l4s_quantum: l4s_quantum as i64,
            classic_quantum: classic_quantum as i64,
        }
    }

    // Bounding the credit keeps a long one-sided backlog from buying the
    // other queue an unbounded burst later.
    fn credit_limit(&self) -> i64 {
        self.l4s_quantum + self.classic_quantum
    }
}

impl Scheduler for WrrScheduler {
    fn select_queue(&self, l4s_empty: bool, classic_empty: bool) -> Option<QueueKind> {
        match (l4s_empty, classic_empty) {
            (true, true) => None,
            (false, true) => Some(QueueKind::L4s),
            (true, false) => Some(QueueKind::Classic),
            (false, false) => {
                if self.credit >= 0 {
                    Some(QueueKind::L4s)
                } else {
                    Some(QueueKind::Classic)
                }
            }
        }
    }

    fn apply_credit_change(&mut self, served: QueueKind) {
        let limit = self.credit_limit();
        self.credit = match served {
            QueueKind::L4s => (self.credit - self.l4s_quantum).max(-limit),
            QueueKind::Classic => (self.credit + self.classic_quantum).min(limit),
        };
    }
}
