// Live bidder colors.
//
// Each live bidder id gets one display color for the lifetime of the
// process so the clerk can tell internet bidders apart across tabs.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Palette used when none is configured.
pub const DEFAULT_PALETTE: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#800000", "#aaffc3", "#808000",
    "#ffd8b1", "#000075",
];

/// Something that hands out display colors.
pub trait ColorSource: Send {
    fn next_color(&mut self) -> String;
}

/// Walks the palette in order, wrapping around. Deterministic.
#[derive(Debug, Clone)]
pub struct CyclingPalette {
    palette: Vec<String>,
    next: usize,
}

impl CyclingPalette {
    pub fn new(palette: Vec<String>) -> Self {
        Self { palette, next: 0 }
    }
}

impl ColorSource for CyclingPalette {
    fn next_color(&mut self) -> String {
        if self.palette.is_empty() {
            return DEFAULT_PALETTE[0].to_string();
        }
        let color = self.palette[self.next % self.palette.len()].clone();
        self.next = self.next.wrapping_add(1);
        color
    }
}

/// Picks a random palette entry on every call.
pub struct RandomPalette {
    palette: Vec<String>,
    rng: StdRng,
}

impl RandomPalette {
    pub fn new(palette: Vec<String>) -> Self {
        Self {
            palette,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(palette: Vec<String>, seed: u64) -> Self {
        Self {
            palette,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ColorSource for RandomPalette {
    fn next_color(&mut self) -> String {
        self.palette
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PALETTE[0].to_string())
    }
}

/// Stable bidder id -> color assignment.
pub struct BidderColors {
    assigned: HashMap<String, String>,
    source: Box<dyn ColorSource>,
}

impl BidderColors {
    pub fn new(source: Box<dyn ColorSource>) -> Self {
        Self {
            assigned: HashMap::new(),
            source,
        }
    }

    /// Color for `bidder_id`, assigning one on first sight.
    pub fn color_for(&mut self, bidder_id: &str) -> String {
        if let Some(color) = self.assigned.get(bidder_id) {
            return color.clone();
        }
        let color = self.source.next_color();
        self.assigned.insert(bidder_id.to_string(), color.clone());
        color
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

impl std::fmt::Debug for BidderColors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidderColors")
            .field("assigned", &self.assigned)
            .finish_non_exhaustive()
    }
}

pub fn default_palette() -> Vec<String> {
    DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
}
