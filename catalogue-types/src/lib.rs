use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod attribute;
pub mod product;
pub mod rubric;
pub mod shop_product;
pub mod tenant;

/// Human readable name keyed by locale code (`en`, `uk`, ...).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct LocalizedName(pub BTreeMap<String, String>);

impl LocalizedName {
    pub fn new<L: Into<String>, N: Into<String>>(locale: L, name: N) -> Self {
        Self(BTreeMap::from([(locale.into(), name.into())]))
    }

    pub fn with<L: Into<String>, N: Into<String>>(mut self, locale: L, name: N) -> Self {
        self.0.insert(locale.into(), name.into());
        self
    }

    /// Requested locale first, then `fallback`, then whatever translation exists.
    pub fn get(&self, locale: &str, fallback: &str) -> &str {
        self.0
            .get(locale)
            .or_else(|| self.0.get(fallback))
            .or_else(|| self.0.values().next())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn to_db(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    pub fn from_db(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input).map(Self)
    }
}
