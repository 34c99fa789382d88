// Adjudication snapshotter: freeze the registry when the clerk opens the
// confirmation view and resolve the winning bid from that frozen copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{Amount, BidOrigin, TabId};
use crate::registry::{BiddingRegistry, RegistrySnapshot};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdjudicationError {
    #[error("live bids on two tabs: tab {first} at {first_amount}, tab {second} at {second_amount}")]
    MultipleLiveBids {
        first: TabId,
        first_amount: Amount,
        second: TabId,
        second_amount: Amount,
    },
    #[error("local bid {local_amount} on tab {local_tab} exceeds live bid {live_amount} on tab {live_tab}")]
    LocalExceedsLive {
        live_tab: TabId,
        live_amount: Amount,
        local_tab: TabId,
        local_amount: Amount,
    },
    #[error("no active tab shows a bid")]
    NoBid,
    #[error("no adjudication review is open")]
    NoReview,
    #[error("confirmed snapshot differs from the one under review")]
    SnapshotChanged,
}

/// The bid a lot would be adjudicated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub tab_id: TabId,
    pub group: String,
    pub origin: BidOrigin,
    pub amount: Amount,
    pub live_bidder_id: Option<String>,
}

/// What the confirmation view shows next to the frozen registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjudicationVerdict {
    Ready { winner: Winner },
    Blocked { message: String },
}

impl From<Result<Winner, AdjudicationError>> for AdjudicationVerdict {
    fn from(result: Result<Winner, AdjudicationError>) -> Self {
        match result {
            Ok(winner) => AdjudicationVerdict::Ready { winner },
            Err(e) => AdjudicationVerdict::Blocked {
                message: e.to_string(),
            },
        }
    }
}

/// Registry state frozen at the moment the clerk opened adjudication.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjudicationSnapshot {
    pub taken_at: DateTime<Utc>,
    pub registry: RegistrySnapshot,
}

impl AdjudicationSnapshot {
    pub fn capture(registry: &BiddingRegistry, now: DateTime<Utc>) -> Self {
        Self {
            taken_at: now,
            registry: registry.snapshot(),
        }
    }

    pub fn resolve_winner(&self) -> Result<Winner, AdjudicationError> {
        resolve_winner(&self.registry)
    }

    pub fn verdict(&self) -> AdjudicationVerdict {
        self.resolve_winner().into()
    }

    /// Check the snapshot the clerk confirmed against this frozen one and
    /// resolve the winner from the frozen copy.
    pub fn confirm(&self, confirmed: &RegistrySnapshot) -> Result<Winner, AdjudicationError> {
        if *confirmed != self.registry {
            return Err(AdjudicationError::SnapshotChanged);
        }
        self.resolve_winner()
    }
}

/// Pick the winning bid among the active tabs of `snapshot`.
///
/// A single live bid wins unless a floor bid exceeds it. Without a live
/// bid the highest floor bid wins, ties going to the first in registry
/// order. Two live bids are contradictory whatever their amounts.
pub fn resolve_winner(snapshot: &RegistrySnapshot) -> Result<Winner, AdjudicationError> {
    let mut live: Option<Winner> = None;
    let mut best_local: Option<Winner> = None;

    for (group, tab_id, state) in snapshot.entries() {
        if !state.is_active {
            continue;
        }
        let (Some(origin), Some(amount)) = (state.last_bid_origin, state.last_amount) else {
            continue;
        };
        let candidate = Winner {
            tab_id,
            group: group.to_string(),
            origin,
            amount,
            live_bidder_id: state.live_bidder_id.clone(),
        };
        match origin {
            BidOrigin::Live => {
                if let Some(first) = &live {
                    return Err(AdjudicationError::MultipleLiveBids {
                        first: first.tab_id,
                        first_amount: first.amount,
                        second: tab_id,
                        second_amount: amount,
                    });
                }
                live = Some(candidate);
            }
            BidOrigin::Local => {
                if best_local.as_ref().map_or(true, |b| amount > b.amount) {
                    best_local = Some(candidate);
                }
            }
        }
    }

    match (live, best_local) {
        (Some(live), Some(local)) if local.amount > live.amount => {
            Err(AdjudicationError::LocalExceedsLive {
                live_tab: live.tab_id,
                live_amount: live.amount,
                local_tab: local.tab_id,
                local_amount: local.amount,
            })
        }
        (Some(live), _) => Ok(live),
        (None, Some(local)) => Ok(local),
        (None, None) => Err(AdjudicationError::NoBid),
    }
}
