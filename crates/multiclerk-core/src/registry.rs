// Bidding state registry: the authoritative per-tab bidding state, grouped
// by auction platform.
//
// Groups keep the order they were configured in and tabs keep the order
// they joined their group. Dispatch walks the registry in that order, so it
// must stay deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::PlatformGroup;
use crate::protocol::{Amount, BidOrigin, TabId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tab {0} is not tracked by any platform group")]
    NotFound(TabId),
}

// ---------------------------------------------------------------------------
// TabBiddingState
// ---------------------------------------------------------------------------

/// Bidding state of one tracked tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabBiddingState {
    /// When this entry last changed.
    pub last_update: DateTime<Utc>,
    /// Amount of the most recent bid known to the platform.
    pub last_amount: Option<Amount>,
    pub last_bid_origin: Option<BidOrigin>,
    /// Present only when `last_bid_origin` is `Live`.
    pub live_bidder_id: Option<String>,
    /// Display color bound to `live_bidder_id`.
    pub live_bidder_color: Option<String>,
    pub next_bid_amount_suggestion: Option<Amount>,
    /// Current starting price while the lot has no bid yet.
    pub starting_price: Option<Amount>,
    pub current_lot: Option<String>,
    pub current_lot_description: Option<String>,
    /// Whether the tab takes part in coordinated actions.
    pub is_active: bool,
    /// Bid amount dispatched by the core and not yet echoed back.
    pub expected_amount: Option<Amount>,
    /// Starting price dispatched by the core and not yet echoed back.
    pub expected_starting_price: Option<Amount>,
}

impl TabBiddingState {
    /// A freshly tracked tab with no known bidding state.
    pub fn new(is_active: bool, now: DateTime<Utc>) -> Self {
        Self {
            last_update: now,
            last_amount: None,
            last_bid_origin: None,
            live_bidder_id: None,
            live_bidder_color: None,
            next_bid_amount_suggestion: None,
            starting_price: None,
            current_lot: None,
            current_lot_description: None,
            is_active,
            expected_amount: None,
            expected_starting_price: None,
        }
    }

    /// Record a dispatched bid. A tab awaits one kind of echo at a time.
    pub fn expect_amount(&mut self, amount: Amount) {
        self.expected_amount = Some(amount);
        self.expected_starting_price = None;
    }

    /// Record a dispatched starting price.
    pub fn expect_starting_price(&mut self, price: Amount) {
        self.expected_starting_price = Some(price);
        self.expected_amount = None;
    }

    pub fn has_pending_expectation(&self) -> bool {
        self.expected_amount.is_some() || self.expected_starting_price.is_some()
    }
}

// ---------------------------------------------------------------------------
// Snapshot (serialized view)
// ---------------------------------------------------------------------------

/// Immutable, serializable copy of the registry, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group: String,
    pub url_prefix: String,
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub tab_id: TabId,
    pub state: TabBiddingState,
}

impl RegistrySnapshot {
    /// All tabs as `(group name, tab id, state)`, in registry order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, TabId, &TabBiddingState)> + '_ {
        self.groups.iter().flat_map(|g| {
            g.tabs
                .iter()
                .map(move |t| (g.group.as_str(), t.tab_id, &t.state))
        })
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabBiddingState> {
        self.entries()
            .find(|(_, id, _)| *id == tab_id)
            .map(|(_, _, state)| state)
    }

    pub fn tab_count(&self) -> usize {
        self.groups.iter().map(|g| g.tabs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tab_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TabEntry {
    tab_id: TabId,
    url: Option<String>,
    state: TabBiddingState,
}

#[derive(Debug, Clone)]
struct GroupEntry {
    group: PlatformGroup,
    tabs: Vec<TabEntry>,
}

/// Outcome of [`BiddingRegistry::track_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackChange {
    /// The tab started being tracked in the named group.
    Joined(String),
    /// The tab stays in its current group.
    Unchanged,
    /// The tab left the registry.
    Left,
    /// The URL matches no group and the tab was not tracked.
    Untracked,
    /// The matching group is already populated (production mode).
    Rejected,
}

/// Process-wide mapping from platform group and tab to bidding state.
#[derive(Debug, Clone)]
pub struct BiddingRegistry {
    known: Vec<PlatformGroup>,
    production: bool,
    groups: Vec<GroupEntry>,
}

impl BiddingRegistry {
    /// Create a registry keyed by `known` groups. In `production` mode a
    /// group holds at most one tab.
    pub fn new(known: Vec<PlatformGroup>, production: bool) -> Self {
        let mut registry = Self {
            known,
            production,
            groups: Vec::new(),
        };
        registry.reset();
        registry
    }

    /// Drop every entry and re-create one empty collection per known group.
    pub fn reset(&mut self) {
        self.groups = self
            .known
            .iter()
            .cloned()
            .map(|group| GroupEntry {
                group,
                tabs: Vec::new(),
            })
            .collect();
    }

    /// Insert or replace the state of `tab_id` inside `group`.
    ///
    /// Returns `false` when nothing was written: unknown group, or a second
    /// tab for an already populated group in production mode. A tab tracked
    /// in another group moves here and keeps its URL.
    pub fn upsert(&mut self, group: &str, tab_id: TabId, state: TabBiddingState) -> bool {
        let Some(gidx) = self.groups.iter().position(|g| g.group.name == group) else {
            debug!("upsert into unknown group {group} ignored");
            return false;
        };

        if let Some(entry) = self.groups[gidx]
            .tabs
            .iter_mut()
            .find(|t| t.tab_id == tab_id)
        {
            entry.state = state;
            return true;
        }

        if self.production && !self.groups[gidx].tabs.is_empty() {
            debug!("group {group} already holds a tab, tab {tab_id} not added");
            return false;
        }

        let url = self.take_entry(tab_id).and_then(|e| e.url);
        self.groups[gidx].tabs.push(TabEntry { tab_id, url, state });
        true
    }

    /// State of `tab_id`, or `None` if no group tracks it.
    pub fn get(&self, tab_id: TabId) -> Option<&TabBiddingState> {
        self.find(tab_id).map(|e| &e.state)
    }

    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut TabBiddingState> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.tabs.iter_mut())
            .find(|t| t.tab_id == tab_id)
            .map(|e| &mut e.state)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.find(tab_id).is_some()
    }

    /// Toggle `is_active` in place. Returns `false` if the tab is unknown.
    pub fn set_active(&mut self, tab_id: TabId, is_active: bool) -> bool {
        match self.get_mut(tab_id) {
            Some(state) => {
                state.is_active = is_active;
                true
            }
            None => false,
        }
    }

    /// Delete the tab from whichever group holds it.
    pub fn remove(&mut self, tab_id: TabId) -> Option<TabBiddingState> {
        self.take_entry(tab_id).map(|e| e.state)
    }

    /// The group holding `tab_id`.
    ///
    /// Unlike the other lookups this fails loudly: callers only ask for the
    /// group of a tab they believe is tracked.
    pub fn group_of(&self, tab_id: TabId) -> Result<&PlatformGroup, RegistryError> {
        self.groups
            .iter()
            .find(|g| g.tabs.iter().any(|t| t.tab_id == tab_id))
            .map(|g| &g.group)
            .ok_or(RegistryError::NotFound(tab_id))
    }

    /// Last URL seen for a tab.
    pub fn url_of(&self, tab_id: TabId) -> Option<&str> {
        self.find(tab_id).and_then(|e| e.url.as_deref())
    }

    /// Reconcile a tab's membership with its current URL.
    ///
    /// A tab whose URL matches a group joins it with a fresh state (unless
    /// already there); a tab whose URL matches nothing leaves the registry.
    pub fn track_url(
        &mut self,
        tab_id: TabId,
        url: &str,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> TrackChange {
        let Some(gidx) = self.groups.iter().position(|g| g.group.matches(url)) else {
            return if self.take_entry(tab_id).is_some() {
                info!("Tab {tab_id} left the registry (url no longer matches a platform)");
                TrackChange::Left
            } else {
                TrackChange::Untracked
            };
        };

        if let Some(entry) = self.groups[gidx]
            .tabs
            .iter_mut()
            .find(|t| t.tab_id == tab_id)
        {
            entry.url = Some(url.to_string());
            return TrackChange::Unchanged;
        }

        // State belongs to the platform page, not the browser tab.
        let previous = self.take_entry(tab_id);

        if self.production && !self.groups[gidx].tabs.is_empty() {
            info!(
                "Tab {tab_id} not tracked: group {} already holds a tab",
                self.groups[gidx].group.name
            );
            return if previous.is_some() {
                TrackChange::Left
            } else {
                TrackChange::Rejected
            };
        }

        let name = self.groups[gidx].group.name.clone();
        self.groups[gidx].tabs.push(TabEntry {
            tab_id,
            url: Some(url.to_string()),
            state: TabBiddingState::new(is_active, now),
        });
        info!("Tab {tab_id} joined group {name}");
        TrackChange::Joined(name)
    }

    /// All tracked tabs as `(group, tab id, state)`, in registry order.
    pub fn entries(&self) -> impl Iterator<Item = (&PlatformGroup, TabId, &TabBiddingState)> + '_ {
        self.groups.iter().flat_map(|g| {
            g.tabs
                .iter()
                .map(move |t| (&g.group, t.tab_id, &t.state))
        })
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.entries().map(|(_, id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.tabs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the registry into an immutable, serializable snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            groups: self
                .groups
                .iter()
                .map(|g| GroupSnapshot {
                    group: g.group.name.clone(),
                    url_prefix: g.group.url_prefix.clone(),
                    tabs: g
                        .tabs
                        .iter()
                        .map(|t| TabSnapshot {
                            tab_id: t.tab_id,
                            state: t.state.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn find(&self, tab_id: TabId) -> Option<&TabEntry> {
        self.groups
            .iter()
            .flat_map(|g| g.tabs.iter())
            .find(|t| t.tab_id == tab_id)
    }

    fn take_entry(&mut self, tab_id: TabId) -> Option<TabEntry> {
        for group in &mut self.groups {
            if let Some(pos) = group.tabs.iter().position(|t| t.tab_id == tab_id) {
                return Some(group.tabs.remove(pos));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G1_URL: &str = "https://g1.example/clerk/";
    const G2_URL: &str = "https://g2.example/clerk/";

    fn groups() -> Vec<PlatformGroup> {
        vec![
            PlatformGroup::new("G1", G1_URL),
            PlatformGroup::new("G2", G2_URL),
        ]
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn dev_registry() -> BiddingRegistry {
        BiddingRegistry::new(groups(), false)
    }

    #[test]
    fn new_registry_is_empty_but_keyed() {
        let registry = dev_registry();
        assert!(registry.is_empty());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.groups.len(), 2);
        assert_eq!(snapshot.groups[0].group, "G1");
        assert_eq!(snapshot.groups[1].group, "G2");
    }

    #[test]
    fn upsert_then_get() {
        let mut registry = dev_registry();
        assert!(registry.upsert("G1", 10, TabBiddingState::new(true, now())));
        let state = registry.get(10).unwrap();
        assert!(state.is_active);
        assert!(registry.get(11).is_none());
    }

    #[test]
    fn upsert_replaces_existing_state() {
        let mut registry = dev_registry();
        registry.upsert("G1", 10, TabBiddingState::new(true, now()));
        let mut state = TabBiddingState::new(false, now());
        state.last_amount = Some(500);
        assert!(registry.upsert("G1", 10, state));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(10).unwrap().last_amount, Some(500));
        assert!(!registry.get(10).unwrap().is_active);
    }

    #[test]
    fn upsert_into_unknown_group_is_rejected() {
        let mut registry = dev_registry();
        assert!(!registry.upsert("Nope", 1, TabBiddingState::new(true, now())));
        assert!(registry.is_empty());
    }

    #[test]
    fn production_allows_one_tab_per_group() {
        let mut registry = BiddingRegistry::new(groups(), true);
        assert!(registry.upsert("G1", 1, TabBiddingState::new(true, now())));
        assert!(!registry.upsert("G1", 2, TabBiddingState::new(true, now())));
        assert!(registry.get(2).is_none());
        // Replacing the existing tab is still allowed.
        assert!(registry.upsert("G1", 1, TabBiddingState::new(false, now())));
        // Other groups are unaffected.
        assert!(registry.upsert("G2", 2, TabBiddingState::new(true, now())));
    }

    #[test]
    fn development_allows_many_tabs_per_group() {
        let mut registry = dev_registry();
        assert!(registry.upsert("G1", 1, TabBiddingState::new(true, now())));
        assert!(registry.upsert("G1", 2, TabBiddingState::new(true, now())));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn upsert_moves_tab_between_groups() {
        let mut registry = dev_registry();
        registry.upsert("G1", 1, TabBiddingState::new(true, now()));
        registry.upsert("G2", 1, TabBiddingState::new(true, now()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.group_of(1).unwrap().name, "G2");
    }

    #[test]
    fn set_active_toggles_in_place() {
        let mut registry = dev_registry();
        registry.upsert("G1", 1, TabBiddingState::new(true, now()));
        assert!(registry.set_active(1, false));
        assert!(!registry.get(1).unwrap().is_active);
        assert!(!registry.set_active(99, true));
    }

    #[test]
    fn remove_deletes_entry() {
        let mut registry = dev_registry();
        registry.upsert("G2", 5, TabBiddingState::new(true, now()));
        assert!(registry.remove(5).is_some());
        assert!(registry.get(5).is_none());
        assert!(registry.remove(5).is_none());
    }

    #[test]
    fn group_of_fails_loudly_for_unknown_tab() {
        let mut registry = dev_registry();
        registry.upsert("G2", 5, TabBiddingState::new(true, now()));
        assert_eq!(registry.group_of(5).unwrap().name, "G2");
        assert_eq!(registry.group_of(6), Err(RegistryError::NotFound(6)));
    }

    #[test]
    fn reset_clears_entries_and_keeps_groups() {
        let mut registry = dev_registry();
        registry.upsert("G1", 1, TabBiddingState::new(true, now()));
        registry.upsert("G2", 2, TabBiddingState::new(true, now()));
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.snapshot().groups.len(), 2);
    }

    #[test]
    fn iteration_follows_group_then_insertion_order() {
        let mut registry = dev_registry();
        registry.upsert("G2", 30, TabBiddingState::new(true, now()));
        registry.upsert("G1", 20, TabBiddingState::new(true, now()));
        registry.upsert("G1", 10, TabBiddingState::new(true, now()));
        assert_eq!(registry.tab_ids(), vec![20, 10, 30]);
    }

    #[test]
    fn track_url_joins_matching_group() {
        let mut registry = dev_registry();
        let change = registry.track_url(1, &format!("{G1_URL}lot/4"), true, now());
        assert_eq!(change, TrackChange::Joined("G1".into()));
        assert_eq!(registry.url_of(1), Some("https://g1.example/clerk/lot/4"));
    }

    #[test]
    fn track_url_same_group_keeps_state() {
        let mut registry = dev_registry();
        registry.track_url(1, G1_URL, true, now());
        registry.get_mut(1).unwrap().last_amount = Some(700);
        let change = registry.track_url(1, &format!("{G1_URL}next"), true, now());
        assert_eq!(change, TrackChange::Unchanged);
        assert_eq!(registry.get(1).unwrap().last_amount, Some(700));
    }

    #[test]
    fn track_url_navigating_away_removes_tab() {
        let mut registry = dev_registry();
        registry.track_url(1, G1_URL, true, now());
        assert_eq!(
            registry.track_url(1, "https://news.example", true, now()),
            TrackChange::Left
        );
        assert!(registry.is_empty());
        assert_eq!(
            registry.track_url(1, "https://news.example", true, now()),
            TrackChange::Untracked
        );
    }

    #[test]
    fn track_url_switching_platform_starts_fresh() {
        let mut registry = dev_registry();
        registry.track_url(1, G1_URL, true, now());
        registry.get_mut(1).unwrap().last_amount = Some(700);
        let change = registry.track_url(1, G2_URL, true, now());
        assert_eq!(change, TrackChange::Joined("G2".into()));
        assert_eq!(registry.get(1).unwrap().last_amount, None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn track_url_rejected_in_production_when_group_full() {
        let mut registry = BiddingRegistry::new(groups(), true);
        registry.track_url(1, G1_URL, true, now());
        assert_eq!(
            registry.track_url(2, G1_URL, true, now()),
            TrackChange::Rejected
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expectations_are_mutually_exclusive() {
        let mut state = TabBiddingState::new(true, now());
        state.expect_amount(500);
        assert_eq!(state.expected_amount, Some(500));
        state.expect_starting_price(200);
        assert_eq!(state.expected_amount, None);
        assert_eq!(state.expected_starting_price, Some(200));
        state.expect_amount(300);
        assert_eq!(state.expected_starting_price, None);
        assert!(state.has_pending_expectation());
    }

    #[test]
    fn snapshot_is_detached_from_registry() {
        let mut registry = dev_registry();
        registry.upsert("G1", 1, TabBiddingState::new(true, now()));
        let snapshot = registry.snapshot();
        registry.get_mut(1).unwrap().last_amount = Some(999);
        assert_eq!(snapshot.get(1).unwrap().last_amount, None);
    }

    #[test]
    fn snapshot_serializes_camel_case_state() {
        let mut registry = dev_registry();
        let mut state = TabBiddingState::new(true, now());
        state.last_bid_origin = Some(BidOrigin::Live);
        state.live_bidder_id = Some("u1".into());
        registry.upsert("G1", 1, state);
        let value = serde_json::to_value(registry.snapshot()).unwrap();
        let tab = &value["groups"][0]["tabs"][0];
        assert_eq!(tab["tabId"], 1);
        assert_eq!(tab["state"]["lastBidOrigin"], "LIVE");
        assert_eq!(tab["state"]["liveBidderId"], "u1");
        assert_eq!(tab["state"]["isActive"], true);
    }
}
