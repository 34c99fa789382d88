// Auction platform groups: which URL space a tab belongs to.

use serde::{Deserialize, Serialize};

/// A logical auction platform, identified by the URL prefix of its clerking
/// interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformGroup {
    /// Display name (e.g. "Drouot").
    pub name: String,
    /// Every clerking page of the platform starts with this prefix.
    pub url_prefix: String,
}

impl PlatformGroup {
    pub fn new(name: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_prefix: url_prefix.into(),
        }
    }

    /// Whether `url` lies inside this group's URL space.
    pub fn matches(&self, url: &str) -> bool {
        !self.url_prefix.is_empty() && url.starts_with(&self.url_prefix)
    }
}

/// The platforms supported out of the box.
pub fn default_groups() -> Vec<PlatformGroup> {
    vec![
        PlatformGroup::new(
            "Drouot_s",
            "https://cyberdrouot-recette.zonesecure.org/cyberclerc/",
        ),
        PlatformGroup::new("Drouot", "https://cyberdrouot.zonesecure.org/cyberclerc/"),
        PlatformGroup::new(
            "Moniteur",
            "https://cybermoniteur.zonesecure.org/cyberclerc/",
        ),
        PlatformGroup::new("Interencheres", "https://pro.interencheres.com/operateurs-"),
    ]
}
