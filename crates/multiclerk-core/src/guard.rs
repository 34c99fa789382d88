// Synchronization guard: pure decisions over registry state.
//
// Nothing here mutates the registry. The dispatcher and the ingestor ask
// these functions before acting and apply the result themselves.

use crate::protocol::{Amount, BidOrigin, StatusReport, TabId};
use crate::registry::{BiddingRegistry, TabBiddingState};

/// Why a floor bid must not be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Another tab already shows a settled live bid covering the amount.
    LiveBidCovers { tab_id: TabId, amount: Amount },
    /// Another tab is waiting for a higher bid to land.
    PendingHigherBid { tab_id: TabId, expected: Amount },
    /// Another tab is waiting for a higher starting price to land.
    PendingHigherStartingPrice { tab_id: TabId, expected: Amount },
}

/// First reason, in registry order, that blocks pushing a floor bid of
/// `amount` to every tab but `excluded`. Only other active tabs count.
pub fn blocking_reason(
    registry: &BiddingRegistry,
    excluded: TabId,
    amount: Amount,
) -> Option<BlockReason> {
    registry
        .entries()
        .filter(|(_, tab_id, state)| *tab_id != excluded && state.is_active)
        .find_map(|(_, tab_id, state)| tab_blocks(tab_id, state, amount))
}

/// `true` when a floor bid of `amount` must not be propagated.
pub fn should_block_local_bid(registry: &BiddingRegistry, excluded: TabId, amount: Amount) -> bool {
    blocking_reason(registry, excluded, amount).is_some()
}

fn tab_blocks(tab_id: TabId, state: &TabBiddingState, amount: Amount) -> Option<BlockReason> {
    if state.last_bid_origin == Some(BidOrigin::Live) && !state.has_pending_expectation() {
        if let Some(live) = state.last_amount {
            if live >= amount {
                return Some(BlockReason::LiveBidCovers {
                    tab_id,
                    amount: live,
                });
            }
        }
    }
    if let Some(expected) = state.expected_amount {
        if expected > amount {
            return Some(BlockReason::PendingHigherBid { tab_id, expected });
        }
    }
    if let Some(expected) = state.expected_starting_price {
        if expected > amount {
            return Some(BlockReason::PendingHigherStartingPrice { tab_id, expected });
        }
    }
    None
}

/// The tab already shows exactly this bid, so re-sending it would be an echo.
pub fn is_redundant_bid(state: &TabBiddingState, amount: Amount, origin: BidOrigin) -> bool {
    state.last_amount == Some(amount) && state.last_bid_origin == Some(origin)
}

/// Pending expectations that survive an incoming status report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expectations {
    pub amount: Option<Amount>,
    pub starting_price: Option<Amount>,
}

impl Expectations {
    pub fn of(state: &TabBiddingState) -> Self {
        Self {
            amount: state.expected_amount,
            starting_price: state.expected_starting_price,
        }
    }
}

/// Carry expectations across a report. Only an exact echo clears one;
/// anything else, including a missing field, leaves it outstanding.
pub fn reconcile_expectations(previous: &TabBiddingState, report: &StatusReport) -> Expectations {
    let mut kept = Expectations::of(previous);
    if kept.amount.is_some() && report.amount == kept.amount {
        kept.amount = None;
    }
    if kept.starting_price.is_some() && report.starting_price == kept.starting_price {
        kept.starting_price = None;
    }
    kept
}
