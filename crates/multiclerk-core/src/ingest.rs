// Update ingestor: folds one tab's status report into the registry and
// decides whether the report should be mirrored to the other tabs.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::colors::BidderColors;
use crate::guard;
use crate::protocol::{Amount, BidOrigin, StatusReport, TabId};
use crate::registry::{BiddingRegistry, TabBiddingState};

/// What an ingested report did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The registry entry was rewritten; the display layer should refresh.
    pub changed: bool,
    /// Floor bid to push to every other active tab.
    pub propagate: Option<Amount>,
}

/// Apply `report` from `tab_id`.
///
/// Liveness-only reports and reports from untracked tabs are no-ops. The
/// entry is replaced wholesale by the reported state, keeping the tab's
/// active flag and any expectation the report does not echo.
pub fn ingest_status_report(
    registry: &mut BiddingRegistry,
    colors: &mut BidderColors,
    tab_id: TabId,
    report: &StatusReport,
    now: DateTime<Utc>,
) -> IngestOutcome {
    if report.is_liveness_only() {
        trace!("Liveness report from tab {tab_id}");
        return IngestOutcome::default();
    }

    let Some(previous) = registry.get(tab_id).cloned() else {
        debug!("Status report from untracked tab {tab_id} ignored");
        return IngestOutcome::default();
    };
    let group = match registry.group_of(tab_id) {
        Ok(group) => group.name.clone(),
        Err(e) => {
            debug!("Status report dropped: {e}");
            return IngestOutcome::default();
        }
    };

    let is_live = report.origin == Some(BidOrigin::Live);
    let live_bidder_id = if is_live {
        report.live_bidder_id.clone()
    } else {
        None
    };
    let live_bidder_color = live_bidder_id.as_deref().map(|id| colors.color_for(id));
    let kept = guard::reconcile_expectations(&previous, report);

    let state = TabBiddingState {
        last_update: now,
        last_amount: report.amount,
        last_bid_origin: report.origin,
        live_bidder_id,
        live_bidder_color,
        next_bid_amount_suggestion: report.next_bid_suggestion,
        starting_price: report.starting_price,
        current_lot: report.lot.clone(),
        current_lot_description: report.lot_description.clone(),
        is_active: previous.is_active,
        expected_amount: kept.amount,
        expected_starting_price: kept.starting_price,
    };
    registry.upsert(&group, tab_id, state);

    let propagate = report
        .live_bid()
        .filter(|_| previous.is_active)
        .filter(|amount| match guard::blocking_reason(registry, tab_id, *amount) {
            Some(reason) => {
                debug!("Live bid {amount} from tab {tab_id} not propagated: {reason:?}");
                false
            }
            None => true,
        });

    IngestOutcome {
        changed: true,
        propagate,
    }
}
