//! PII category configuration.
//!
//! Each category is either a table with `items`, an optional `tag` and an
//! optional `case_sensitive` flag, or a bare list of items:
//!
//! ```toml
//! [pii_categories.cities]
//! items = ["Dallas", "Houston", "New York"]
//! tag = "[CITY]"
//!
//! [pii_categories]
//! days = ["Monday", "Friday"]
//! ```

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw category entry as written in the configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CategoryEntry {
    Items(Vec<String>),
    Detailed(CategorySpec),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CategorySpec {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// A validated PII category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiCategory {
    /// Category key (e.g. "cities")
    pub name: String,
    /// Literal items to detect
    pub items: Vec<String>,
    /// Replacement tag (e.g. "[CITY]")
    pub tag: String,
    pub case_sensitive: bool,
}

/// The full set of configured categories, in a deterministic order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiiConfig {
    categories: Vec<PiiCategory>,
}

/// Tag used when a category omits one.
///
/// The name is upper-cased and trailing `S` characters are stripped, so
/// `states` becomes `[STATE]` and `days` becomes `[DAY]`.
pub fn derive_tag(category_name: &str) -> String {
    format!(
        "[{}]",
        category_name.to_uppercase().trim_end_matches('S')
    )
}

impl PiiConfig {
    pub fn new(categories: Vec<PiiCategory>) -> Self {
        Self { categories }
    }

    /// Validate raw entries. Categories are ordered by name.
    pub fn from_entries(entries: BTreeMap<String, CategoryEntry>) -> Result<Self, ConfigError> {
        let mut categories = Vec::with_capacity(entries.len());

        for (name, entry) in entries {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidCategory {
                    category: name,
                    reason: "category name is empty".to_string(),
                });
            }

            let (items, tag, case_sensitive) = match entry {
                CategoryEntry::Detailed(spec) => (spec.items, spec.tag, spec.case_sensitive),
                CategoryEntry::Items(items) => (items, None, false),
            };

            if let Some(blank) = items.iter().position(|item| item.trim().is_empty()) {
                return Err(ConfigError::InvalidCategory {
                    category: name,
                    reason: format!("item {} is empty", blank),
                });
            }

            let tag = match tag {
                Some(tag) if tag.trim().is_empty() => {
                    return Err(ConfigError::InvalidCategory {
                        category: name,
                        reason: "tag is empty".to_string(),
                    });
                }
                Some(tag) => tag,
                None => derive_tag(&name),
            };

            categories.push(PiiCategory {
                name,
                items,
                tag,
                case_sensitive,
            });
        }

        Ok(Self { categories })
    }

    /// Parse a TOML document containing a `[pii_categories]` table
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            pii_categories: BTreeMap<String, CategoryEntry>,
        }

        let document: Document = toml::from_str(content)?;
        Self::from_entries(document.pii_categories)
    }

    pub fn categories(&self) -> &[PiiCategory] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&PiiCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
