//! Theme catalog: the candidate label set and the passages attached to it.
//!
//! The catalog is loaded once at startup (JSON) and shared read-only by every
//! request; each request seeds it into its own blackboard by reference.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A passage of source material attached to a theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Globally unique passage id.
    pub id: String,
    /// Passage text.
    pub text: String,
    /// Title of the work the passage comes from.
    #[serde(default)]
    pub source_title: Option<String>,
}

/// A candidate theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub passages: Vec<Passage>,
}

impl Theme {
    /// Label and description joined, used for scoring.
    pub fn scoring_text(&self) -> String {
        format!("{} {}", self.label, self.description)
    }
}

/// The full set of candidate themes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeCatalog {
    pub themes: Vec<Theme>,
}

impl ThemeCatalog {
    /// Build a catalog, rejecting duplicate theme or passage ids.
    pub fn new(themes: Vec<Theme>) -> Result<Self, CatalogError> {
        let catalog = Self { themes };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a catalog from JSON. Accepts either `{"themes": [...]}` or a
    /// bare array of themes.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let themes: Vec<Theme> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            let wrapper: ThemeCatalog = serde_json::from_value(value)?;
            wrapper.themes
        };
        Self::new(themes)
    }

    /// Load a catalog from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut theme_ids = HashMap::new();
        let mut passage_ids = HashMap::new();
        for theme in &self.themes {
            if theme.id.is_empty() {
                return Err(CatalogError::Invalid("theme with empty id".into()));
            }
            if theme_ids.insert(theme.id.as_str(), ()).is_some() {
                return Err(CatalogError::Invalid(format!("duplicate theme id '{}'", theme.id)));
            }
            for passage in &theme.passages {
                if let Some(owner) = passage_ids.insert(passage.id.as_str(), theme.id.as_str()) {
                    return Err(CatalogError::Invalid(format!(
                        "passage '{}' appears in both '{}' and '{}'",
                        passage.id, owner, theme.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a theme by id.
    pub fn get(&self, id: &str) -> Option<&Theme> {
        self.themes.iter().find(|t| t.id == id)
    }

    /// Look up a passage and its owning theme id.
    pub fn passage(&self, passage_id: &str) -> Option<(&str, &Passage)> {
        self.themes.iter().find_map(|theme| {
            theme
                .passages
                .iter()
                .find(|p| p.id == passage_id)
                .map(|p| (theme.id.as_str(), p))
        })
    }

    /// Candidate labels in catalog order.
    pub fn labels(&self) -> Vec<String> {
        self.themes.iter().map(|t| t.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.themes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.themes.is_empty()
    }
}
