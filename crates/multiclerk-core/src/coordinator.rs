// Coordination process: the single owner of the bidding registry.
//
// Every inbound event (tab lifecycle, status report, operator command) goes
// through one `&mut self` method, so events are handled strictly one at a
// time and nothing else ever touches the registry. Each method returns the
// messages the display layer should receive.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adjudication::{AdjudicationError, AdjudicationSnapshot, AdjudicationVerdict};
use crate::colors::BidderColors;
use crate::db::Database;
use crate::dispatch::{floor_bid, ActionSource, DispatchReport, Dispatcher, TabAdapter};
use crate::ingest::ingest_status_report;
use crate::protocol::{CoreMessage, OperatorCommand, StatusReport, TabAction, TabId, TabInfo};
use crate::registry::{BiddingRegistry, RegistrySnapshot, TrackChange};

pub struct Coordinator<A> {
    registry: BiddingRegistry,
    colors: BidderColors,
    dispatcher: Dispatcher<A>,
    db: Arc<Database>,
    review: Option<AdjudicationSnapshot>,
}

impl<A: TabAdapter> Coordinator<A> {
    pub fn new(
        registry: BiddingRegistry,
        colors: BidderColors,
        dispatcher: Dispatcher<A>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            registry,
            colors,
            dispatcher,
            db,
            review: None,
        }
    }

    pub fn registry(&self) -> &BiddingRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// The snapshot currently shown in the adjudication view, if open.
    pub fn pending_review(&self) -> Option<&AdjudicationSnapshot> {
        self.review.as_ref()
    }

    fn tabs_update(&self) -> CoreMessage {
        CoreMessage::TabsUpdate {
            snapshot: self.registry.snapshot(),
        }
    }

    // -----------------------------------------------------------------------
    // Persisted flags
    // -----------------------------------------------------------------------

    /// Global enable switch. A store failure counts as enabled.
    pub fn extension_enabled(&self) -> bool {
        self.db.extension_enabled().unwrap_or_else(|e| {
            warn!("Failed to read enable flag, assuming enabled: {e:#}");
            true
        })
    }

    fn persisted_active(&self, tab_id: TabId) -> bool {
        match self.db.tab_active(tab_id) {
            Ok(flag) => flag.unwrap_or(true),
            Err(e) => {
                warn!("Failed to read active flag of tab {tab_id}: {e:#}");
                true
            }
        }
    }

    fn persist_active(&self, tab_id: TabId, active: bool) {
        if let Err(e) = self.db.set_tab_active(tab_id, active) {
            warn!("Failed to persist active flag of tab {tab_id}: {e:#}");
        }
    }

    // -----------------------------------------------------------------------
    // Tab lifecycle
    // -----------------------------------------------------------------------

    /// Rebuild the registry from a full tab enumeration and ask every
    /// tracked tab for a fresh status report.
    pub async fn initialize(&mut self, tabs: &[TabInfo]) -> Vec<CoreMessage> {
        self.registry.reset();
        self.review = None;
        let now = Utc::now();

        for tab in tabs {
            let active = self.persisted_active(tab.tab_id);
            if let TrackChange::Joined(_) = self.registry.track_url(tab.tab_id, &tab.url, active, now)
            {
                self.persist_active(tab.tab_id, active);
            }
        }

        let open: Vec<TabId> = tabs.iter().map(|t| t.tab_id).collect();
        match self.db.retain_tab_flags(&open) {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {n} stale tab flags"),
            Err(e) => warn!("Failed to prune tab flags: {e:#}"),
        }

        info!(
            "Registry initialized: {} of {} tabs tracked",
            self.registry.len(),
            tabs.len()
        );

        self.dispatcher
            .dispatch(
                &mut self.registry,
                &TabAction::RefreshStatus,
                ActionSource::Core,
                None,
            )
            .await;

        vec![
            self.tabs_update(),
            CoreMessage::ExtensionEnabled {
                enabled: self.extension_enabled(),
            },
        ]
    }

    pub fn tab_navigated(&mut self, tab_id: TabId, url: &str) -> Vec<CoreMessage> {
        let active = self.persisted_active(tab_id);
        match self.registry.track_url(tab_id, url, active, Utc::now()) {
            TrackChange::Joined(_) => {
                self.persist_active(tab_id, active);
                vec![self.tabs_update()]
            }
            TrackChange::Left => vec![self.tabs_update()],
            TrackChange::Unchanged | TrackChange::Untracked | TrackChange::Rejected => vec![],
        }
    }

    pub fn tab_closed(&mut self, tab_id: TabId) -> Vec<CoreMessage> {
        if let Err(e) = self.db.remove_tab_flag(tab_id) {
            warn!("Failed to delete flag of closed tab {tab_id}: {e:#}");
        }
        if self.registry.remove(tab_id).is_some() {
            info!("Tab {tab_id} closed");
            vec![self.tabs_update()]
        } else {
            vec![]
        }
    }

    // -----------------------------------------------------------------------
    // Status reports
    // -----------------------------------------------------------------------

    /// Fold a status report in and push a fresh live bid to the other tabs.
    pub async fn status_report(&mut self, tab_id: TabId, report: &StatusReport) -> Vec<CoreMessage> {
        let outcome = ingest_status_report(
            &mut self.registry,
            &mut self.colors,
            tab_id,
            report,
            Utc::now(),
        );

        if let Some(amount) = outcome.propagate {
            if self.extension_enabled() {
                info!("Propagating live bid {amount} from tab {tab_id}");
                self.dispatcher
                    .dispatch(
                        &mut self.registry,
                        &floor_bid(amount),
                        ActionSource::Core,
                        Some(tab_id),
                    )
                    .await;
            } else {
                debug!("Live bid {amount} from tab {tab_id} not propagated: coordination disabled");
            }
        }

        if outcome.changed {
            vec![self.tabs_update()]
        } else {
            vec![]
        }
    }

    // -----------------------------------------------------------------------
    // Operator commands
    // -----------------------------------------------------------------------

    pub async fn operator_command(&mut self, command: OperatorCommand) -> Vec<CoreMessage> {
        if let Some(action) = command.as_tab_action() {
            return match self.operator_action(&action).await {
                Some(_) => vec![self.tabs_update()],
                None => vec![],
            };
        }

        match command {
            OperatorCommand::OpenAdjudication => vec![self.open_adjudication()],
            OperatorCommand::Adjudicate { snapshot } => self.adjudicate(snapshot).await,
            OperatorCommand::SetTabActive { tab_id, active } => self.set_tab_active(tab_id, active),
            OperatorCommand::GoToTab { tab_id } => {
                if self.registry.contains(tab_id) {
                    vec![CoreMessage::FocusTab { tab_id }]
                } else {
                    debug!("GoToTab for untracked tab {tab_id} ignored");
                    vec![]
                }
            }
            OperatorCommand::SetExtensionEnabled { enabled } => {
                if let Err(e) = self.db.set_extension_enabled(enabled) {
                    warn!("Failed to persist enable flag: {e:#}");
                }
                info!("Coordination {}", if enabled { "enabled" } else { "disabled" });
                vec![CoreMessage::ExtensionEnabled {
                    enabled: self.extension_enabled(),
                }]
            }
            OperatorCommand::RequestExtensionEnabledState => vec![CoreMessage::ExtensionEnabled {
                enabled: self.extension_enabled(),
            }],
            OperatorCommand::RequestTabsSnapshot => {
                if self.registry.is_empty() {
                    info!("Snapshot requested with an empty registry; the bridge should re-enumerate tabs");
                }
                vec![self.tabs_update()]
            }
            // Covered by `as_tab_action` above.
            OperatorCommand::PlaceBid { .. }
            | OperatorCommand::SetStartingPrice { .. }
            | OperatorCommand::RemoveLastBid
            | OperatorCommand::UnsoldLot
            | OperatorCommand::FairWarning
            | OperatorCommand::SetFixedIncrement { .. }
            | OperatorCommand::SetAutoIncrement => vec![],
        }
    }

    /// Fan an operator action out to every active tab. `None` when the
    /// global switch is off.
    pub async fn operator_action(&mut self, action: &TabAction) -> Option<DispatchReport> {
        if !self.extension_enabled() {
            debug!("{} ignored: coordination disabled", action.label());
            return None;
        }
        Some(
            self.dispatcher
                .dispatch(&mut self.registry, action, ActionSource::Operator, None)
                .await,
        )
    }

    pub fn set_tab_active(&mut self, tab_id: TabId, active: bool) -> Vec<CoreMessage> {
        if !self.registry.set_active(tab_id, active) {
            debug!("SetTabActive for untracked tab {tab_id} ignored");
            return vec![];
        }
        self.persist_active(tab_id, active);
        vec![self.tabs_update()]
    }

    // -----------------------------------------------------------------------
    // Adjudication
    // -----------------------------------------------------------------------

    /// Freeze the registry for the confirmation view.
    pub fn open_adjudication(&mut self) -> CoreMessage {
        if self.registry.is_empty() {
            info!("Adjudication opened with no tracked tabs");
        }
        let frozen = AdjudicationSnapshot::capture(&self.registry, Utc::now());
        let message = CoreMessage::AdjudicationReview {
            snapshot: frozen.registry.clone(),
            verdict: frozen.verdict(),
        };
        self.review = Some(frozen);
        message
    }

    /// Adjudicate every tab against the frozen review the clerk confirmed.
    ///
    /// The confirmed snapshot must be the one `open_adjudication` sent out.
    /// A missing review, an altered snapshot or contradictory bid state
    /// withholds the action entirely and sends the blocking reason back.
    pub async fn adjudicate(&mut self, confirmed: RegistrySnapshot) -> Vec<CoreMessage> {
        if !self.extension_enabled() {
            debug!("Adjudication ignored: coordination disabled");
            return vec![];
        }

        let Some(frozen) = self.review.take() else {
            return withheld(confirmed, AdjudicationError::NoReview);
        };
        if let Err(e) = frozen.confirm(&confirmed) {
            // The review stays open so the clerk can confirm it again.
            let snapshot = frozen.registry.clone();
            self.review = Some(frozen);
            return withheld(snapshot, e);
        }

        let report = self
            .dispatcher
            .adjudicate(&self.registry, &frozen.registry)
            .await;
        info!(
            "Adjudication sent to {} tabs ({} skipped, {} failed)",
            report.delivered.len(),
            report.skipped.len(),
            report.failed.len()
        );
        vec![self.tabs_update()]
    }
}

fn withheld(snapshot: RegistrySnapshot, reason: AdjudicationError) -> Vec<CoreMessage> {
    warn!("Adjudication withheld: {reason}");
    vec![CoreMessage::AdjudicationReview {
        snapshot,
        verdict: AdjudicationVerdict::Blocked {
            message: reason.to_string(),
        },
    }]
}
