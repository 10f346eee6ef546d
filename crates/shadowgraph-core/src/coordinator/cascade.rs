// ── Cascade budget ──
//
// Hooks may write back to the store they watch, and each write comes back
// as another notification carrying the same correlation id. The budget
// caps how many notifications one correlation id may trigger inside a
// sliding window.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

/// Entries are swept once the table grows past this many ids.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    count: u32,
}

/// Per-correlation-id notification counter. A limit of 0 disables it.
#[derive(Debug)]
pub(crate) struct CascadeBudget {
    limit: u32,
    window: Duration,
    seen: DashMap<String, Window>,
}

impl CascadeBudget {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            seen: DashMap::new(),
        }
    }

    /// Count one notification; `false` once the id is over budget.
    pub(crate) fn admit(&self, correlation_id: Option<&str>) -> bool {
        let Some(id) = correlation_id else {
            return true;
        };
        if self.limit == 0 {
            return true;
        }

        let now = Instant::now();
        if self.seen.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let mut entry = self.seen.entry(id.to_owned()).or_insert(Window {
            opened: now,
            count: 0,
        });
        if now.duration_since(entry.opened) > self.window {
            *entry = Window {
                opened: now,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit
    }

    fn sweep(&self, now: Instant) {
        let before = self.seen.len();
        self.seen
            .retain(|_, window| now.duration_since(window.opened) <= self.window);
        debug!(before, after = self.seen.len(), "cascade budget swept");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncorrelated_events_are_always_admitted() {
        let budget = CascadeBudget::new(1, Duration::from_secs(60));
        assert!((0..10).all(|_| budget.admit(None)));
    }

    #[test]
    fn zero_limit_disables_the_budget() {
        let budget = CascadeBudget::new(0, Duration::from_secs(60));
        assert!((0..10).all(|_| budget.admit(Some("req-1"))));
    }

    #[test]
    fn over_budget_ids_are_refused() {
        let budget = CascadeBudget::new(2, Duration::from_secs(60));
        assert!(budget.admit(Some("req-1")));
        assert!(budget.admit(Some("req-1")));
        assert!(!budget.admit(Some("req-1")));
        assert!(budget.admit(Some("req-2")));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_count() {
        let budget = CascadeBudget::new(1, Duration::from_secs(10));
        assert!(budget.admit(Some("req-1")));
        assert!(!budget.admit(Some("req-1")));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(budget.admit(Some("req-1")));
    }
}
