// Integration tests for the coordination core.
//
// These drive a `Coordinator` through its public API with an in-memory
// database and a recording tab adapter, and check the cross-tab behaviour
// end to end: live bid propagation, echo handling, operator fan-out, the
// enable switch and adjudication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use multiclerk_core::adjudication::AdjudicationVerdict;
use multiclerk_core::colors::{BidderColors, CyclingPalette};
use multiclerk_core::coordinator::Coordinator;
use multiclerk_core::db::Database;
use multiclerk_core::dispatch::{AdapterError, Dispatcher, Pacing, TabAdapter};
use multiclerk_core::platform::PlatformGroup;
use multiclerk_core::protocol::*;
use multiclerk_core::registry::BiddingRegistry;

// ===========================================================================
// Test helpers
// ===========================================================================

const G1: &str = "https://g1.example/clerk/";
const G2: &str = "https://g2.example/clerk/";
const G3: &str = "https://g3.example/clerk/";

const A: TabId = 11;
const B: TabId = 22;
const C: TabId = 33;

type Calls = Arc<Mutex<Vec<(TabId, TabAction)>>>;

/// Records delivered actions. While `down` is set every tab is unreachable
/// and nothing is recorded.
#[derive(Clone, Default)]
struct RecordingAdapter {
    calls: Calls,
    down: Arc<AtomicBool>,
}

#[async_trait]
impl TabAdapter for RecordingAdapter {
    async fn execute(&self, tab_id: TabId, action: &TabAction) -> Result<(), AdapterError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AdapterError::Unreachable(tab_id));
        }
        self.calls.lock().unwrap().push((tab_id, action.clone()));
        Ok(())
    }
}

struct Harness {
    coordinator: Coordinator<RecordingAdapter>,
    calls: Calls,
    down: Arc<AtomicBool>,
    db: Arc<Database>,
}

impl Harness {
    fn new() -> Self {
        Self::with_db(Arc::new(Database::open(":memory:").unwrap()))
    }

    fn with_db(db: Arc<Database>) -> Self {
        let adapter = RecordingAdapter::default();
        let calls = adapter.calls.clone();
        let down = adapter.down.clone();
        let groups = vec![
            PlatformGroup::new("G1", G1),
            PlatformGroup::new("G2", G2),
            PlatformGroup::new("G3", G3),
        ];
        let coordinator = Coordinator::new(
            BiddingRegistry::new(groups, true),
            BidderColors::new(Box::new(CyclingPalette::new(vec![
                "#111111".into(),
                "#222222".into(),
                "#333333".into(),
            ]))),
            Dispatcher::new(adapter, Pacing::Immediate),
            db.clone(),
        );
        Self {
            coordinator,
            calls,
            down,
            db,
        }
    }

    /// Enumerate three platform tabs plus one unrelated tab.
    async fn start(&mut self) -> Vec<CoreMessage> {
        let tabs = vec![
            TabInfo {
                tab_id: A,
                url: format!("{G1}sale/1"),
            },
            TabInfo {
                tab_id: B,
                url: format!("{G2}sale/1"),
            },
            TabInfo {
                tab_id: C,
                url: format!("{G3}sale/1"),
            },
            TabInfo {
                tab_id: 99,
                url: "https://news.example/".into(),
            },
        ];
        let replies = self.coordinator.initialize(&tabs).await;
        self.take_calls();
        replies
    }

    fn take_calls(&self) -> Vec<(TabId, TabAction)> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn state(&self, tab_id: TabId) -> multiclerk_core::registry::TabBiddingState {
        self.coordinator.registry().get(tab_id).unwrap().clone()
    }
}

fn live(amount: Amount, bidder: &str) -> StatusReport {
    StatusReport {
        amount: Some(amount),
        origin: Some(BidOrigin::Live),
        live_bidder_id: Some(bidder.into()),
        ..Default::default()
    }
}

fn local(amount: Amount) -> StatusReport {
    StatusReport {
        amount: Some(amount),
        origin: Some(BidOrigin::Local),
        ..Default::default()
    }
}

fn place_local(amount: Amount) -> TabAction {
    TabAction::PlaceBid {
        amount,
        origin: BidOrigin::Local,
    }
}

fn has_tabs_update(replies: &[CoreMessage]) -> bool {
    replies
        .iter()
        .any(|m| matches!(m, CoreMessage::TabsUpdate { .. }))
}

// ===========================================================================
// Startup
// ===========================================================================

#[tokio::test]
async fn initialize_tracks_platform_tabs_and_requests_refresh() {
    let mut h = Harness::new();
    let tabs = vec![
        TabInfo {
            tab_id: A,
            url: G1.into(),
        },
        TabInfo {
            tab_id: 99,
            url: "https://news.example/".into(),
        },
    ];

    let replies = h.coordinator.initialize(&tabs).await;

    assert_eq!(h.coordinator.registry().tab_ids(), vec![A]);
    assert_eq!(h.take_calls(), vec![(A, TabAction::RefreshStatus)]);
    assert!(has_tabs_update(&replies));
    assert!(replies.contains(&CoreMessage::ExtensionEnabled { enabled: true }));
}

#[tokio::test]
async fn initialize_restores_persisted_active_flags() {
    let db = Arc::new(Database::open(":memory:").unwrap());
    db.set_tab_active(B, false).unwrap();
    db.set_tab_active(12345, false).unwrap();
    let mut h = Harness::with_db(db.clone());

    h.start().await;

    assert!(h.state(A).is_active);
    assert!(!h.state(B).is_active);
    // Flags of tabs that no longer exist are pruned.
    assert_eq!(db.tab_active(12345).unwrap(), None);
}

#[tokio::test]
async fn refresh_reaches_inactive_tabs_too() {
    let db = Arc::new(Database::open(":memory:").unwrap());
    db.set_tab_active(C, false).unwrap();
    let mut h = Harness::with_db(db);
    let tabs = vec![TabInfo {
        tab_id: C,
        url: G3.into(),
    }];

    h.coordinator.initialize(&tabs).await;

    assert_eq!(h.take_calls(), vec![(C, TabAction::RefreshStatus)]);
}

// ===========================================================================
// Live bid propagation
// ===========================================================================

#[tokio::test]
async fn live_bid_propagates_as_floor_bid_and_echo_clears_expectation() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h.coordinator.status_report(A, &live(500, "u1")).await;

    assert!(has_tabs_update(&replies));
    assert_eq!(
        h.take_calls(),
        vec![(B, place_local(500)), (C, place_local(500))]
    );
    assert_eq!(h.state(B).expected_amount, Some(500));
    assert_eq!(h.state(C).expected_amount, Some(500));
    assert_eq!(h.state(A).expected_amount, None);

    h.coordinator.status_report(B, &local(500)).await;

    assert_eq!(h.state(B).expected_amount, None);
    assert_eq!(h.state(B).last_amount, Some(500));
    assert_eq!(h.state(C).expected_amount, Some(500));
    // A local echo never propagates.
    assert!(h.take_calls().is_empty());
}

#[tokio::test]
async fn live_bid_covered_elsewhere_is_not_propagated() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);

    h.coordinator.status_report(B, &live(1000, "u2")).await;
    h.take_calls();
    // Settle A's expectation so B's live bid is the only thing that matters.
    h.coordinator.status_report(A, &local(1000)).await;

    h.coordinator.status_report(A, &live(900, "u1")).await;

    assert!(h.take_calls().is_empty());
}

#[tokio::test]
async fn pending_higher_expectation_blocks_lower_live_bid() {
    let mut h = Harness::new();
    h.start().await;

    h.coordinator.status_report(A, &live(800, "u1")).await;
    h.take_calls();
    // B and C now expect 800. A lower live bid on C must not overtake it.
    h.coordinator.status_report(C, &live(700, "u3")).await;

    assert!(h.take_calls().is_empty());
    assert_eq!(h.state(B).expected_amount, Some(800));
}

#[tokio::test]
async fn inactive_tab_report_updates_display_but_never_propagates() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(A, false);

    let replies = h.coordinator.status_report(A, &live(500, "u1")).await;

    assert!(has_tabs_update(&replies));
    assert_eq!(h.state(A).last_amount, Some(500));
    assert!(h.take_calls().is_empty());
}

#[tokio::test]
async fn inactive_tabs_do_not_receive_propagation() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);

    h.coordinator.status_report(A, &live(500, "u1")).await;

    assert_eq!(h.take_calls(), vec![(B, place_local(500))]);
    assert_eq!(h.state(C).expected_amount, None);
}

#[tokio::test]
async fn core_propagation_skips_tab_already_showing_the_bid() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.status_report(B, &local(500)).await;

    h.coordinator.status_report(A, &live(500, "u1")).await;

    assert_eq!(h.take_calls(), vec![(C, place_local(500))]);
}

#[tokio::test]
async fn repeated_live_bid_reaches_tabs_that_missed_it() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);

    h.down.store(true, Ordering::SeqCst);
    h.coordinator.status_report(A, &live(500, "u1")).await;
    assert!(h.take_calls().is_empty());
    assert_eq!(h.state(B).expected_amount, None);

    h.down.store(false, Ordering::SeqCst);
    h.coordinator.status_report(A, &live(500, "u1")).await;

    assert_eq!(h.take_calls(), vec![(B, place_local(500))]);
    assert_eq!(h.state(B).expected_amount, Some(500));
}

#[tokio::test]
async fn repeated_live_bid_is_not_resent_once_echoed() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);

    h.coordinator.status_report(A, &live(500, "u1")).await;
    h.coordinator.status_report(B, &local(500)).await;
    h.take_calls();

    h.coordinator.status_report(A, &live(500, "u1")).await;

    assert!(h.take_calls().is_empty());
}

#[tokio::test]
async fn liveness_ping_changes_nothing() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h
        .coordinator
        .status_report(A, &StatusReport::default())
        .await;

    assert!(replies.is_empty());
    assert!(h.take_calls().is_empty());
}

#[tokio::test]
async fn bidder_color_survives_interleaved_bidders() {
    let mut h = Harness::new();
    h.start().await;

    h.coordinator.status_report(A, &live(100, "u42")).await;
    let color = h.state(A).live_bidder_color.clone();
    assert!(color.is_some());
    h.coordinator.status_report(B, &live(200, "u7")).await;
    h.coordinator.status_report(A, &live(300, "u42")).await;

    assert_eq!(h.state(A).live_bidder_color, color);
    assert_ne!(h.state(B).live_bidder_color, color);
}

// ===========================================================================
// Operator commands
// ===========================================================================

#[tokio::test]
async fn starting_price_leaves_other_expectations_alone() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.status_report(A, &live(600, "u1")).await;
    h.take_calls();
    h.coordinator.set_tab_active(B, false);

    h.coordinator
        .operator_command(OperatorCommand::SetStartingPrice { amount: 200 })
        .await;

    // B was not a target and keeps waiting for its bid echo.
    assert_eq!(h.state(B).expected_amount, Some(600));
    assert_eq!(h.state(B).expected_starting_price, None);
    // C was a target: its bid expectation is replaced.
    assert_eq!(h.state(C).expected_amount, None);
    assert_eq!(h.state(C).expected_starting_price, Some(200));
}

#[tokio::test]
async fn operator_bid_is_never_echo_suppressed() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.status_report(B, &local(300)).await;

    h.coordinator
        .operator_command(OperatorCommand::PlaceBid {
            amount: 300,
            origin: BidOrigin::Local,
        })
        .await;

    let tabs: Vec<TabId> = h.take_calls().into_iter().map(|(t, _)| t).collect();
    assert_eq!(tabs, vec![A, B, C]);
}

#[tokio::test]
async fn zero_fixed_increment_sends_auto_increment() {
    let mut h = Harness::new();
    h.start().await;

    h.coordinator
        .operator_command(OperatorCommand::SetFixedIncrement { amount: 0 })
        .await;

    assert!(h
        .take_calls()
        .iter()
        .all(|(_, action)| *action == TabAction::SetAutoIncrement));
}

#[tokio::test]
async fn disabled_switch_blocks_actions_and_propagation() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h
        .coordinator
        .operator_command(OperatorCommand::SetExtensionEnabled { enabled: false })
        .await;
    assert_eq!(replies, vec![CoreMessage::ExtensionEnabled { enabled: false }]);
    assert!(!h.db.extension_enabled().unwrap());

    h.coordinator
        .operator_command(OperatorCommand::FairWarning)
        .await;
    let replies = h.coordinator.status_report(A, &live(500, "u1")).await;

    assert!(h.take_calls().is_empty());
    // The display still follows the platforms.
    assert!(has_tabs_update(&replies));
    assert_eq!(h.state(A).last_amount, Some(500));
}

#[tokio::test]
async fn set_tab_active_persists_flag() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h
        .coordinator
        .operator_command(OperatorCommand::SetTabActive {
            tab_id: B,
            active: false,
        })
        .await;

    assert!(has_tabs_update(&replies));
    assert!(!h.state(B).is_active);
    assert_eq!(h.db.tab_active(B).unwrap(), Some(false));
}

#[tokio::test]
async fn go_to_tab_focuses_tracked_tabs_only() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h
        .coordinator
        .operator_command(OperatorCommand::GoToTab { tab_id: B })
        .await;
    assert_eq!(replies, vec![CoreMessage::FocusTab { tab_id: B }]);

    let replies = h
        .coordinator
        .operator_command(OperatorCommand::GoToTab { tab_id: 99 })
        .await;
    assert!(replies.is_empty());
}

// ===========================================================================
// Tab lifecycle
// ===========================================================================

#[tokio::test]
async fn navigation_and_close_update_registry() {
    let mut h = Harness::new();
    h.start().await;

    let replies = h.coordinator.tab_navigated(A, "https://elsewhere.example/");
    assert!(has_tabs_update(&replies));
    assert!(h.coordinator.registry().get(A).is_none());

    // Production mode: G2 already holds B.
    assert!(h.coordinator.tab_navigated(A, G2).is_empty());
    assert!(h.coordinator.registry().get(A).is_none());

    assert!(has_tabs_update(&h.coordinator.tab_navigated(A, G1)));
    assert!(h.coordinator.registry().get(A).is_some());

    let replies = h.coordinator.tab_closed(C);
    assert!(has_tabs_update(&replies));
    assert!(h.coordinator.registry().get(C).is_none());
    assert!(h.coordinator.tab_closed(C).is_empty());
}

// ===========================================================================
// Adjudication
// ===========================================================================

fn review(replies: Vec<CoreMessage>) -> (multiclerk_core::registry::RegistrySnapshot, AdjudicationVerdict) {
    match replies.into_iter().next() {
        Some(CoreMessage::AdjudicationReview { snapshot, verdict }) => (snapshot, verdict),
        other => panic!("expected AdjudicationReview, got {other:?}"),
    }
}

#[tokio::test]
async fn adjudication_uses_frozen_snapshot() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.status_report(A, &live(1000, "u1")).await;
    h.coordinator.status_report(B, &local(1000)).await;
    h.coordinator.status_report(C, &local(1000)).await;
    h.take_calls();

    let (snapshot, verdict) = review(
        h.coordinator
            .operator_command(OperatorCommand::OpenAdjudication)
            .await,
    );
    match &verdict {
        AdjudicationVerdict::Ready { winner } => {
            assert_eq!(winner.tab_id, A);
            assert_eq!(winner.amount, 1000);
        }
        other => panic!("expected Ready, got {other:?}"),
    }
    assert!(h.coordinator.pending_review().is_some());

    // A new live bid lands while the clerk is reviewing.
    h.coordinator.status_report(A, &live(1100, "u9")).await;
    h.take_calls();

    h.coordinator
        .operator_command(OperatorCommand::Adjudicate { snapshot })
        .await;

    assert_eq!(
        h.take_calls(),
        vec![
            (
                A,
                TabAction::Adjudicate {
                    origin: BidOrigin::Live,
                    amount: 1000
                }
            ),
            (
                B,
                TabAction::Adjudicate {
                    origin: BidOrigin::Local,
                    amount: 1000
                }
            ),
            (
                C,
                TabAction::Adjudicate {
                    origin: BidOrigin::Local,
                    amount: 1000
                }
            ),
        ]
    );
    assert!(h.coordinator.pending_review().is_none());
}

#[tokio::test]
async fn inconsistent_snapshot_withholds_adjudication() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);
    h.coordinator.status_report(A, &live(1000, "u1")).await;
    h.coordinator.status_report(B, &local(1200)).await;
    h.take_calls();

    let (snapshot, verdict) = review(
        h.coordinator
            .operator_command(OperatorCommand::OpenAdjudication)
            .await,
    );
    assert!(matches!(verdict, AdjudicationVerdict::Blocked { .. }));

    let replies = h
        .coordinator
        .operator_command(OperatorCommand::Adjudicate { snapshot })
        .await;

    assert!(h.take_calls().is_empty());
    let (_, verdict) = review(replies);
    assert!(matches!(verdict, AdjudicationVerdict::Blocked { .. }));
}

#[tokio::test]
async fn two_live_bids_block_adjudication() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);
    h.coordinator.status_report(A, &live(1000, "u1")).await;
    h.coordinator.status_report(B, &live(1100, "u2")).await;

    let (_, verdict) = review(
        h.coordinator
            .operator_command(OperatorCommand::OpenAdjudication)
            .await,
    );
    assert!(matches!(verdict, AdjudicationVerdict::Blocked { .. }));
}

#[tokio::test]
async fn adjudication_with_no_tabs_reports_no_bid() {
    let mut h = Harness::new();
    h.coordinator.initialize(&[]).await;

    let (snapshot, verdict) = review(
        h.coordinator
            .operator_command(OperatorCommand::OpenAdjudication)
            .await,
    );
    assert!(snapshot.is_empty());
    assert!(matches!(verdict, AdjudicationVerdict::Blocked { .. }));
}

#[tokio::test]
async fn altered_snapshot_withholds_adjudication() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.set_tab_active(C, false);
    h.coordinator.status_report(A, &live(1000, "u1")).await;
    h.coordinator.status_report(B, &local(1000)).await;
    h.take_calls();

    let (frozen, _) = review(
        h.coordinator
            .operator_command(OperatorCommand::OpenAdjudication)
            .await,
    );

    let mut altered = frozen.clone();
    for group in &mut altered.groups {
        for tab in &mut group.tabs {
            if tab.tab_id == B {
                tab.state.last_amount = Some(1500);
            }
        }
    }
    let replies = h
        .coordinator
        .operator_command(OperatorCommand::Adjudicate { snapshot: altered })
        .await;

    assert!(h.take_calls().is_empty());
    let (returned, verdict) = review(replies);
    assert_eq!(returned, frozen);
    assert!(matches!(verdict, AdjudicationVerdict::Blocked { .. }));
    assert!(h.coordinator.pending_review().is_some());

    // The untouched snapshot still confirms.
    h.coordinator
        .operator_command(OperatorCommand::Adjudicate { snapshot: frozen })
        .await;
    assert_eq!(
        h.take_calls(),
        vec![
            (
                A,
                TabAction::Adjudicate {
                    origin: BidOrigin::Live,
                    amount: 1000
                }
            ),
            (
                B,
                TabAction::Adjudicate {
                    origin: BidOrigin::Local,
                    amount: 1000
                }
            ),
        ]
    );
    assert!(h.coordinator.pending_review().is_none());
}

#[tokio::test]
async fn adjudication_without_review_is_withheld() {
    let mut h = Harness::new();
    h.start().await;
    h.coordinator.status_report(A, &live(1000, "u1")).await;
    h.take_calls();

    let snapshot = h.coordinator.snapshot();
    let replies = h
        .coordinator
        .operator_command(OperatorCommand::Adjudicate { snapshot })
        .await;

    assert!(h.take_calls().is_empty());
    let (_, verdict) = review(replies);
    match verdict {
        AdjudicationVerdict::Blocked { message } => assert!(message.contains("no adjudication review")),
        other => panic!("expected Blocked, got {other:?}"),
    }
}
