//! Service metrics and health reporting.
//!
//! Counters are plain `AtomicU64`s rendered by hand into Prometheus text
//! exposition format; no metrics framework dependency.

use crate::jackpot::store::JackpotStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for the settlement, jackpot, and gateway paths.
pub struct MetricsRegistry {
    pub callbacks_total: AtomicU64,
    pub callback_replays_total: AtomicU64,
    pub callback_errors_total: AtomicU64,
    pub rounds_settled_total: AtomicU64,
    pub settlement_conflicts_total: AtomicU64,
    pub insufficient_funds_total: AtomicU64,
    pub jackpot_contributions_total: AtomicU64,
    pub jackpot_wins_total: AtomicU64,
    pub launch_requests_total: AtomicU64,
    started_at: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            callbacks_total: AtomicU64::new(0),
            callback_replays_total: AtomicU64::new(0),
            callback_errors_total: AtomicU64::new(0),
            rounds_settled_total: AtomicU64::new(0),
            settlement_conflicts_total: AtomicU64::new(0),
            insufficient_funds_total: AtomicU64::new(0),
            jackpot_contributions_total: AtomicU64::new(0),
            jackpot_wins_total: AtomicU64::new(0),
            launch_requests_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Render the full registry in Prometheus text format. Jackpot pool
    /// gauges are read live from the store; a read failure drops the gauge
    /// from this scrape rather than failing it.
    pub fn to_prometheus_format(&self, jackpots: &JackpotStore) -> String {
        let mut output = String::with_capacity(2048);

        let counters: [(&str, &str, &AtomicU64); 9] = [
            (
                "cashdesk_callbacks_total",
                "Aggregator callbacks received",
                &self.callbacks_total,
            ),
            (
                "cashdesk_callback_replays_total",
                "Callbacks answered from the idempotency store",
                &self.callback_replays_total,
            ),
            (
                "cashdesk_callback_errors_total",
                "Callbacks answered with an error envelope",
                &self.callback_errors_total,
            ),
            (
                "cashdesk_rounds_settled_total",
                "Rounds committed to the wallet ledger",
                &self.rounds_settled_total,
            ),
            (
                "cashdesk_settlement_conflicts_total",
                "Optimistic-lock conflicts retried during settlement",
                &self.settlement_conflicts_total,
            ),
            (
                "cashdesk_insufficient_funds_total",
                "Settlements rejected for insufficient balance",
                &self.insufficient_funds_total,
            ),
            (
                "cashdesk_jackpot_contributions_total",
                "Jackpot tier contributions applied",
                &self.jackpot_contributions_total,
            ),
            (
                "cashdesk_jackpot_wins_total",
                "Jackpot wins recorded",
                &self.jackpot_wins_total,
            ),
            (
                "cashdesk_launch_requests_total",
                "Outbound game-launch requests",
                &self.launch_requests_total,
            ),
        ];

        for (name, help, counter) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP cashdesk_uptime_seconds Seconds since process start\n\
             # TYPE cashdesk_uptime_seconds gauge\n\
             cashdesk_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        match jackpots.all() {
            Ok(rows) => {
                output.push_str(
                    "# HELP cashdesk_jackpot_pool Current pooled amount per tier (USD)\n\
                     # TYPE cashdesk_jackpot_pool gauge\n",
                );
                for row in rows {
                    output.push_str(&format!(
                        "cashdesk_jackpot_pool{{tier=\"{}\"}} {}\n",
                        row.tier, row.current
                    ));
                }
                output.push('\n');
            }
            Err(e) => {
                tracing::warn!(error = %e, "Jackpot gauges unavailable for scrape");
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
