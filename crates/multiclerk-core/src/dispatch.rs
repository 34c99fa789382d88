// Action dispatcher: fans one action out to every eligible tab.
//
// Tabs are visited in registry order. Bids and starting prices are paced
// one tab per scheduler tick and record the expected echo on the target
// before the adapter is called.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::guard;
use crate::protocol::{Amount, BidOrigin, TabAction, TabId};
use crate::registry::{BiddingRegistry, RegistrySnapshot};

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no platform adapter reachable for tab {0}")]
    Unreachable(TabId),
    #[error("bridge channel closed")]
    ChannelClosed,
}

/// Executes actions inside one platform tab.
///
/// The production implementation forwards to the browser bridge; tests
/// record calls.
#[async_trait]
pub trait TabAdapter: Send + Sync {
    async fn execute(&self, tab_id: TabId, action: &TabAction) -> Result<(), AdapterError>;
}

/// Best-effort sink told about every delivered adjudication.
pub trait AdjudicationLog: Send {
    fn record(&mut self, url: &str);
}

/// Discards adjudication records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl AdjudicationLog for NoopLog {
    fn record(&mut self, _url: &str) {}
}

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// How long to wait before each sequenced per-tab dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Run back to back. Used by tests.
    Immediate,
    /// Yield to the scheduler once.
    #[default]
    Yield,
    /// Sleep for a fixed stagger.
    Delay(Duration),
}

impl Pacing {
    /// `0` means yield only.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Pacing::Yield
        } else {
            Pacing::Delay(Duration::from_millis(ms))
        }
    }

    pub async fn wait(&self) {
        match self {
            Pacing::Immediate => {}
            Pacing::Yield => tokio::task::yield_now().await,
            Pacing::Delay(d) => tokio::time::sleep(*d).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Who asked for an action. Only core-originated bids get echo suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Operator,
    Core,
}

/// Per-tab result of one fan-out, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<TabId>,
    pub skipped: Vec<TabId>,
    pub failed: Vec<TabId>,
}

pub struct Dispatcher<A> {
    adapter: A,
    pacing: Pacing,
    log: Box<dyn AdjudicationLog>,
}

impl<A: TabAdapter> Dispatcher<A> {
    pub fn new(adapter: A, pacing: Pacing) -> Self {
        Self {
            adapter,
            pacing,
            log: Box::new(NoopLog),
        }
    }

    pub fn with_log(mut self, log: Box<dyn AdjudicationLog>) -> Self {
        self.log = log;
        self
    }

    /// Deliver `action` to every tracked tab except `excluded`.
    ///
    /// Inactive tabs are left out unless the action is a status refresh.
    /// Adapter failures skip the tab and never abort the fan-out.
    pub async fn dispatch(
        &mut self,
        registry: &mut BiddingRegistry,
        action: &TabAction,
        source: ActionSource,
        excluded: Option<TabId>,
    ) -> DispatchReport {
        let targets: Vec<TabId> = registry
            .entries()
            .filter(|(_, tab_id, state)| {
                Some(*tab_id) != excluded && (state.is_active || action.ignores_active_flag())
            })
            .map(|(_, tab_id, _)| tab_id)
            .collect();

        let mut report = DispatchReport::default();
        for tab_id in targets {
            if action.is_sequenced() {
                self.pacing.wait().await;
            }

            let Some(state) = registry.get_mut(tab_id) else {
                report.skipped.push(tab_id);
                continue;
            };
            let previous = (state.expected_amount, state.expected_starting_price);

            match action {
                TabAction::PlaceBid { amount, origin } => {
                    if source == ActionSource::Core
                        && guard::is_redundant_bid(state, *amount, *origin)
                    {
                        debug!("Tab {tab_id} already shows {amount} ({origin:?}), skipping");
                        report.skipped.push(tab_id);
                        continue;
                    }
                    state.expect_amount(*amount);
                }
                TabAction::SetStartingPrice { amount } => state.expect_starting_price(*amount),
                _ => {}
            }

            match self.adapter.execute(tab_id, action).await {
                Ok(()) => report.delivered.push(tab_id),
                Err(e) => {
                    warn!("Dispatch of {} to tab {tab_id} failed: {e}", action.label());
                    // Nothing was sent, so nothing will echo back.
                    if let Some(state) = registry.get_mut(tab_id) {
                        state.expected_amount = previous.0;
                        state.expected_starting_price = previous.1;
                    }
                    report.failed.push(tab_id);
                }
            }
        }

        debug!(
            "{} fan-out: {} delivered, {} skipped, {} failed",
            action.label(),
            report.delivered.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Adjudicate every active tab of a frozen snapshot at the bid that tab
    /// showed when the snapshot was taken.
    ///
    /// Tabs closed since the snapshot are skipped. Each delivery is passed
    /// to the adjudication log with the tab's current URL.
    pub async fn adjudicate(
        &mut self,
        registry: &BiddingRegistry,
        snapshot: &RegistrySnapshot,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (_, tab_id, frozen) in snapshot.entries() {
            if !frozen.is_active {
                continue;
            }
            let (Some(origin), Some(amount)) = (frozen.last_bid_origin, frozen.last_amount) else {
                report.skipped.push(tab_id);
                continue;
            };
            if !registry.contains(tab_id) {
                info!("Tab {tab_id} closed since the adjudication snapshot, skipping");
                report.skipped.push(tab_id);
                continue;
            }

            let action = TabAction::Adjudicate { origin, amount };
            match self.adapter.execute(tab_id, &action).await {
                Ok(()) => {
                    report.delivered.push(tab_id);
                    if let Some(url) = registry.url_of(tab_id) {
                        self.log.record(url);
                    }
                }
                Err(e) => {
                    warn!("Adjudication of tab {tab_id} failed: {e}");
                    report.failed.push(tab_id);
                }
            }
        }
        report
    }
}

/// Propagation of a live bid as a floor bid, as dispatched to other tabs.
pub fn floor_bid(amount: Amount) -> TabAction {
    TabAction::PlaceBid {
        amount,
        origin: BidOrigin::Local,
    }
}
