//! Fire-and-forget settlement event bus.
//!
//! A broadcast channel decouples settlement from its observers: publishers
//! never block, lagging receivers skip ahead, and a publish with nobody
//! listening is not an error. Event emission failures never affect the
//! already-committed settlement.

use crate::currency::Currency;
use crate::jackpot::types::JackpotWin;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// Every committed round.
    RoundSettled {
        user_id: String,
        game_id: String,
        round_id: uuid::Uuid,
        currency: Currency,
        bet_amount: Decimal,
        win_amount: Decimal,
        new_balance: Decimal,
        settled_at: DateTime<Utc>,
    },
    /// Wins past the configured multiplier and USD floor; feeds the
    /// social-proof surface.
    BigWin {
        user_id: String,
        game_id: String,
        round_id: uuid::Uuid,
        currency: Currency,
        win_amount: Decimal,
        multiplier: Decimal,
    },
    JackpotWon { win: JackpotWin },
}

#[derive(Debug, Clone, Copy)]
pub struct EventBusStats {
    pub published: u64,
    pub receivers: usize,
}

pub struct EventBus {
    sender: broadcast::Sender<SettlementEvent>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            published: AtomicU64::new(0),
        })
    }

    /// Publish without waiting for or caring about receivers.
    pub fn publish(&self, event: SettlementEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // Err here only means no receiver is subscribed right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.published.load(Ordering::Relaxed),
            receivers: self.sender.receiver_count(),
        }
    }

    /// Spawn the logging drain. Keeps one receiver alive for the process
    /// lifetime so events always land in the logs.
    pub fn start_logging_drain(self: &Arc<Self>) {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(SettlementEvent::RoundSettled {
                        user_id,
                        game_id,
                        round_id,
                        bet_amount,
                        win_amount,
                        ..
                    }) => {
                        tracing::debug!(
                            %user_id, %game_id, %round_id, %bet_amount, %win_amount,
                            "Round settled"
                        );
                    }
                    Ok(SettlementEvent::BigWin {
                        user_id,
                        game_id,
                        win_amount,
                        multiplier,
                        ..
                    }) => {
                        tracing::info!(%user_id, %game_id, %win_amount, %multiplier, "Big win");
                    }
                    Ok(SettlementEvent::JackpotWon { win }) => {
                        tracing::info!(
                            tier = %win.tier,
                            user_id = %win.user_id,
                            amount = %win.amount,
                            "Jackpot won"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event drain lagged, skipping");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
