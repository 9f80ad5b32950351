use crate::rubric::Rubric;
use crate::LocalizedName;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use typesafe_repository::async_ops::{Get, Remove, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Leaf option slugs of a select attribute
    Options(Vec<String>),
    Number(Decimal),
    Text(LocalizedName),
}

/// Rubric scoped, denormalized projection of a product.
#[derive(Id, Clone, Debug)]
#[Id(ref_id, get_id)]
pub struct ProductSummary {
    #[id]
    pub id: Uuid,
    pub rubric_id: IdentityOf<Rubric>,
    pub slug: String,
    pub name: LocalizedName,
    pub active: bool,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    /// Keyed by attribute slug
    pub values: BTreeMap<String, AttributeValue>,
    pub created_at: OffsetDateTime,
}

impl ProductSummary {
    /// `(attribute slug, option slug)` pairs the filter index is rebuilt from.
    pub fn filter_slugs(&self) -> Vec<(&str, &str)> {
        self.values
            .iter()
            .filter_map(|(attribute, value)| match value {
                AttributeValue::Options(options) => Some((attribute, options)),
                _ => None,
            })
            .flat_map(|(attribute, options)| {
                let mut options: Vec<&str> = options.iter().map(String::as_str).collect();
                options.sort_unstable();
                options.dedup();
                options.into_iter().map(move |o| (attribute.as_str(), o))
            })
            .collect()
    }

    pub fn numbers(&self) -> Vec<(&str, Decimal)> {
        self.values
            .iter()
            .filter_map(|(attribute, value)| match value {
                AttributeValue::Number(n) => Some((attribute.as_str(), *n)),
                _ => None,
            })
            .collect()
    }
}

/// Saving a summary must rewrite its filter slug index in the same write,
/// facet counts are computed from that index only.
#[async_trait]
pub trait ProductSummaryRepository:
    Repository<ProductSummary, Error = anyhow::Error>
    + Save<ProductSummary>
    + Get<ProductSummary>
    + Remove<ProductSummary>
    + Send
    + Sync
{
    /// Distinct `(attribute slug, option slug)` pairs recorded for a rubric.
    async fn recorded_option_slugs(
        &self,
        rubric_id: IdentityOf<Rubric>,
    ) -> Result<Vec<(String, String)>, Self::Error>;
}
