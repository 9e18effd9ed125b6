use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// The full combo catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub schema_version: u32,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub combos: Vec<ComboRecord>,
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A named group of starters, e.g. "Midscreen".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Starter names in display order.
    #[serde(default)]
    pub starters: Vec<String>,
    /// Overall note per starter, taken from the imported playlist.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub starter_notes: BTreeMap<String, String>,
}

/// One combo, identified by the video that demonstrates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboRecord {
    pub external_video_id: String,
    pub category: String,
    pub starter: String,
    pub notation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub imported_at: DateTime<Utc>,
}

impl ComboRecord {
    /// Short watch link for the source video.
    pub fn link(&self) -> String {
        format!("https://youtu.be/{}", self.external_video_id)
    }
}

/// A notable player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    /// Region marker, usually a flag emoji.
    #[serde(default)]
    pub region: String,
    pub social_link: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub description: String,
}

/// An external guide, video or document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit: Option<String>,
}

/// What a combo upsert did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Catalog errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error("Unsupported schema version {found} (max {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Category already exists: {0}")]
    DuplicateCategory(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Starter already exists in {category}: {starter}")]
    DuplicateStarter { category: String, starter: String },

    #[error("Unknown starter in {category}: {starter}")]
    UnknownStarter { category: String, starter: String },

    #[error("Player already exists: {0}")]
    DuplicatePlayer(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },
}

/// Case-folded form of a category name. Category names compare equal when
/// their folded forms do.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

fn same_name(a: &str, b: &str) -> bool {
    a == b || fold_name(a) == fold_name(b)
}

fn require(value: &str, field: &'static str) -> Result<(), CatalogError> {
    if value.trim().is_empty() {
        Err(CatalogError::EmptyField { field })
    } else {
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create an empty catalog at the current schema version.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            categories: Vec::new(),
            combos: Vec::new(),
            players: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.schema_version == 0 || self.schema_version > SCHEMA_VERSION {
            return Err(CatalogError::UnsupportedSchema {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut names = HashSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(CatalogError::Invalid("empty category name".to_string()));
            }
            if !names.insert(fold_name(&category.name)) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate category: {}",
                    category.name
                )));
            }
            let mut starters = HashSet::new();
            for starter in &category.starters {
                if starter.trim().is_empty() || !starters.insert(starter.as_str()) {
                    return Err(CatalogError::Invalid(format!(
                        "bad starter '{}' in category {}",
                        starter, category.name
                    )));
                }
            }
            if let Some(orphan) = category
                .starter_notes
                .keys()
                .find(|s| !starters.contains(s.as_str()))
            {
                return Err(CatalogError::Invalid(format!(
                    "note for unknown starter '{}' in category {}",
                    orphan, category.name
                )));
            }
        }

        let mut videos = HashSet::new();
        for combo in &self.combos {
            if combo.external_video_id.is_empty() {
                return Err(CatalogError::Invalid("combo without video id".to_string()));
            }
            if !videos.insert(combo.external_video_id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate combo video: {}",
                    combo.external_video_id
                )));
            }
        }

        let mut players = HashSet::new();
        for player in &self.players {
            if !players.insert(player.name.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate player: {}",
                    player.name
                )));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Categories and starters
    // =========================================================================

    /// Find a category by case-insensitive name.
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| same_name(&c.name, name))
    }

    fn category_mut(&mut self, name: &str) -> Option<&mut Category> {
        self.categories
            .iter_mut()
            .find(|c| same_name(&c.name, name))
    }

    pub fn has_starter(&self, category: &str, starter: &str) -> bool {
        self.category(category)
            .is_some_and(|c| c.starters.iter().any(|s| s == starter))
    }

    pub fn add_category(&mut self, name: &str) -> Result<(), CatalogError> {
        let name = name.trim();
        require(name, "category name")?;
        if self.category(name).is_some() {
            return Err(CatalogError::DuplicateCategory(name.to_string()));
        }
        self.categories.push(Category {
            name: name.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    /// Remove a category and all of its combos. Returns the number of combos removed.
    pub fn remove_category(&mut self, name: &str) -> Result<usize, CatalogError> {
        let index = self
            .categories
            .iter()
            .position(|c| same_name(&c.name, name))
            .ok_or_else(|| CatalogError::UnknownCategory(name.to_string()))?;
        self.categories.remove(index);

        let before = self.combos.len();
        self.combos
            .retain(|combo| !same_name(&combo.category, name));
        Ok(before - self.combos.len())
    }

    pub fn add_starter(&mut self, category: &str, starter: &str) -> Result<(), CatalogError> {
        let starter = starter.trim();
        require(starter, "starter name")?;
        let entry = self
            .category_mut(category)
            .ok_or_else(|| CatalogError::UnknownCategory(category.to_string()))?;
        if entry.starters.iter().any(|s| s == starter) {
            return Err(CatalogError::DuplicateStarter {
                category: entry.name.clone(),
                starter: starter.to_string(),
            });
        }
        entry.starters.push(starter.to_string());
        Ok(())
    }

    /// Overall note for a starter, if one was imported.
    pub fn starter_note(&self, category: &str, starter: &str) -> Option<&str> {
        self.category(category)?
            .starter_notes
            .get(starter)
            .map(String::as_str)
    }

    pub fn set_starter_note(
        &mut self,
        category: &str,
        starter: &str,
        note: &str,
    ) -> Result<(), CatalogError> {
        let entry = self
            .category_mut(category)
            .ok_or_else(|| CatalogError::UnknownCategory(category.to_string()))?;
        if !entry.starters.iter().any(|s| s == starter) {
            return Err(CatalogError::UnknownStarter {
                category: entry.name.clone(),
                starter: starter.to_string(),
            });
        }
        entry
            .starter_notes
            .insert(starter.to_string(), note.to_string());
        Ok(())
    }

    /// Remove a starter and its combos.
    ///
    /// Returns whether the starter was listed in the category, and how many
    /// combos were deleted. Either may be zero/false independently.
    pub fn remove_starter(&mut self, category: &str, starter: &str) -> (bool, usize) {
        let removed_from_category = match self.category_mut(category) {
            Some(entry) => {
                let before = entry.starters.len();
                entry.starters.retain(|s| s != starter);
                entry.starter_notes.remove(starter);
                entry.starters.len() != before
            }
            None => false,
        };

        let before = self.combos.len();
        self.combos.retain(|combo| {
            !(same_name(&combo.category, category) && combo.starter == starter)
        });

        (removed_from_category, before - self.combos.len())
    }

    // =========================================================================
    // Combos
    // =========================================================================

    pub fn combo(&self, external_video_id: &str) -> Option<&ComboRecord> {
        self.combos
            .iter()
            .find(|c| c.external_video_id == external_video_id)
    }

    /// Combos for a (category, starter) pair, in insertion order.
    pub fn combos_for<'a>(
        &'a self,
        category: &'a str,
        starter: &'a str,
    ) -> impl Iterator<Item = &'a ComboRecord> + 'a {
        self.combos.iter().filter(move |c| {
            same_name(&c.category, category) && c.starter == starter
        })
    }

    pub fn combo_count(&self, category: &str, starter: &str) -> usize {
        self.combos_for(category, starter).count()
    }

    /// Insert a combo or update the existing one with the same video id.
    ///
    /// An existing record keeps its category and starter. When notation and
    /// notes are unchanged the record is left untouched, `imported_at`
    /// included.
    pub fn upsert_combo(&mut self, record: ComboRecord) -> UpsertOutcome {
        match self
            .combos
            .iter_mut()
            .find(|c| c.external_video_id == record.external_video_id)
        {
            Some(existing) => {
                if existing.notation == record.notation && existing.notes == record.notes {
                    return UpsertOutcome::Unchanged;
                }
                existing.notation = record.notation;
                existing.notes = record.notes;
                existing.imported_at = record.imported_at;
                UpsertOutcome::Updated
            }
            None => {
                self.combos.push(record);
                UpsertOutcome::Created
            }
        }
    }

    // =========================================================================
    // Players and resources
    // =========================================================================

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn add_player(&mut self, player: Player) -> Result<(), CatalogError> {
        require(&player.name, "player name")?;
        require(&player.social_link, "player social link")?;
        if self.player(&player.name).is_some() {
            return Err(CatalogError::DuplicatePlayer(player.name));
        }
        self.players.push(player);
        Ok(())
    }

    pub fn remove_player(&mut self, name: &str) -> Result<Player, CatalogError> {
        let index = self
            .players
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CatalogError::UnknownPlayer(name.to_string()))?;
        Ok(self.players.remove(index))
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<(), CatalogError> {
        require(&resource.name, "resource name")?;
        require(&resource.kind, "resource type")?;
        require(&resource.link, "resource link")?;
        self.resources.push(resource);
        Ok(())
    }
}
