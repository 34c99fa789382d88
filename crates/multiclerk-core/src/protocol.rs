// Message types exchanged between the coordination core, the browser
// extension bridge (tab adapters + popup), and the internal event loop.
//
// Everything here crosses a process boundary as JSON, so every enum is a
// closed, internally tagged set rather than a free-form object.

use serde::{Deserialize, Serialize};

use crate::adjudication::AdjudicationVerdict;
use crate::registry::RegistrySnapshot;

/// Browser tab identifier as assigned by the browser.
pub type TabId = u32;

/// Bid amounts and prices, in whole currency units.
pub type Amount = u64;

// ---------------------------------------------------------------------------
// Bid origin
// ---------------------------------------------------------------------------

/// Where a bid came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidOrigin {
    /// Floor bid entered in the room, or injected by the core to mirror one.
    Local,
    /// Bid placed by an internet bidder through the platform itself.
    Live,
}

// ---------------------------------------------------------------------------
// Tab adapter -> core
// ---------------------------------------------------------------------------

/// Current state of a tab as scraped by its platform adapter.
///
/// Every field is optional: an adapter whose DOM anchors are not ready yet
/// simply leaves them out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub origin: Option<BidOrigin>,
    #[serde(default)]
    pub live_bidder_id: Option<String>,
    #[serde(default)]
    pub next_bid_suggestion: Option<Amount>,
    #[serde(default)]
    pub starting_price: Option<Amount>,
    #[serde(default)]
    pub lot: Option<String>,
    #[serde(default)]
    pub lot_description: Option<String>,
}

impl StatusReport {
    /// A report with no state fields only proves the sender is alive.
    pub fn is_liveness_only(&self) -> bool {
        self.amount.is_none()
            && self.origin.is_none()
            && self.live_bidder_id.is_none()
            && self.next_bid_suggestion.is_none()
            && self.starting_price.is_none()
            && self.lot.is_none()
            && self.lot_description.is_none()
    }

    /// True when the report carries a live bid with a known amount.
    pub fn live_bid(&self) -> Option<Amount> {
        match (self.origin, self.amount) {
            (Some(BidOrigin::Live), Some(amount)) => Some(amount),
            _ => None,
        }
    }
}

/// A browser tab as seen during startup enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub tab_id: TabId,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Core -> tab adapter
// ---------------------------------------------------------------------------

/// An action the core asks one tab's platform adapter to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabAction {
    PlaceBid { amount: Amount, origin: BidOrigin },
    SetStartingPrice { amount: Amount },
    RemoveLastBid,
    Adjudicate { origin: BidOrigin, amount: Amount },
    UnsoldLot,
    FairWarning,
    SetFixedIncrement { amount: Amount },
    SetAutoIncrement,
    RefreshStatus,
}

impl TabAction {
    /// Actions whose per-tab dispatches must be spread over scheduler ticks
    /// because they write expectations the guard reads.
    pub fn is_sequenced(&self) -> bool {
        matches!(
            self,
            TabAction::PlaceBid { .. } | TabAction::SetStartingPrice { .. }
        )
    }

    /// Refresh requests go to every tracked tab, active or not.
    pub fn ignores_active_flag(&self) -> bool {
        matches!(self, TabAction::RefreshStatus)
    }

    /// Short name used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TabAction::PlaceBid { .. } => "place_bid",
            TabAction::SetStartingPrice { .. } => "set_starting_price",
            TabAction::RemoveLastBid => "remove_last_bid",
            TabAction::Adjudicate { .. } => "adjudicate",
            TabAction::UnsoldLot => "unsold_lot",
            TabAction::FairWarning => "fair_warning",
            TabAction::SetFixedIncrement { .. } => "set_fixed_increment",
            TabAction::SetAutoIncrement => "set_auto_increment",
            TabAction::RefreshStatus => "refresh_status",
        }
    }
}

// ---------------------------------------------------------------------------
// Operator (popup) -> core
// ---------------------------------------------------------------------------

/// Commands issued by the clerk from the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum OperatorCommand {
    PlaceBid {
        amount: Amount,
        #[serde(default = "local_origin")]
        origin: BidOrigin,
    },
    SetStartingPrice {
        amount: Amount,
    },
    RemoveLastBid,
    /// Freeze the registry and review the winner before confirming.
    OpenAdjudication,
    /// Confirm adjudication against the snapshot shown to the clerk.
    Adjudicate {
        snapshot: RegistrySnapshot,
    },
    UnsoldLot,
    FairWarning,
    SetFixedIncrement {
        amount: Amount,
    },
    SetAutoIncrement,
    SetTabActive {
        tab_id: TabId,
        active: bool,
    },
    GoToTab {
        tab_id: TabId,
    },
    SetExtensionEnabled {
        enabled: bool,
    },
    RequestExtensionEnabledState,
    RequestTabsSnapshot,
}

fn local_origin() -> BidOrigin {
    BidOrigin::Local
}

impl OperatorCommand {
    /// The tab action this command fans out, for the commands that map
    /// one-to-one onto an adapter call.
    pub fn as_tab_action(&self) -> Option<TabAction> {
        match self {
            OperatorCommand::PlaceBid { amount, origin } => Some(TabAction::PlaceBid {
                amount: *amount,
                origin: *origin,
            }),
            OperatorCommand::SetStartingPrice { amount } => {
                Some(TabAction::SetStartingPrice { amount: *amount })
            }
            OperatorCommand::RemoveLastBid => Some(TabAction::RemoveLastBid),
            OperatorCommand::UnsoldLot => Some(TabAction::UnsoldLot),
            OperatorCommand::FairWarning => Some(TabAction::FairWarning),
            // A zero fixed increment means "let the platform decide".
            OperatorCommand::SetFixedIncrement { amount: 0 } => Some(TabAction::SetAutoIncrement),
            OperatorCommand::SetFixedIncrement { amount } => {
                Some(TabAction::SetFixedIncrement { amount: *amount })
            }
            OperatorCommand::SetAutoIncrement => Some(TabAction::SetAutoIncrement),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge wire envelopes
// ---------------------------------------------------------------------------

/// Messages received from the extension bridge over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ExtensionMessage {
    /// All open tabs, sent when the bridge (re)starts.
    TabsEnumerated { tabs: Vec<TabInfo> },
    /// A tab navigated (or finished loading) to `url`.
    TabUpdated { tab_id: TabId, url: String },
    /// A tab was closed.
    TabRemoved { tab_id: TabId },
    /// A platform adapter reported its tab's state.
    StatusReport { tab_id: TabId, report: StatusReport },
    /// Keep-alive from an adapter or the bridge itself.
    Ping {
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    /// A command from the clerk's control surface.
    Operator { command: OperatorCommand },
}

/// Messages sent from the core to the extension bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CoreMessage {
    /// Perform `action` in tab `tab_id`.
    Action { tab_id: TabId, action: TabAction },
    /// Refreshed registry view for the display layer.
    TabsUpdate { snapshot: RegistrySnapshot },
    /// Current value of the global enable flag.
    ExtensionEnabled { enabled: bool },
    /// Bring `tab_id` to the foreground.
    FocusTab { tab_id: TabId },
    /// Frozen registry view and resolved winner for the confirmation dialog.
    AdjudicationReview {
        snapshot: RegistrySnapshot,
        verdict: AdjudicationVerdict,
    },
}
