use crate::LocalizedName;
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};
use uuid::Uuid;

/// Numeric attribute with this slug reads offer prices instead of stored values.
pub const PRICE_ATTRIBUTE_SLUG: &str = "price";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
pub enum AttributeVariant {
    #[display("select")]
    Select,
    #[display("multiple_select")]
    MultipleSelect,
    #[display("number")]
    Number,
    #[display("text")]
    Text,
}

impl AttributeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeVariant::Select => "select",
            AttributeVariant::MultipleSelect => "multiple_select",
            AttributeVariant::Number => "number",
            AttributeVariant::Text => "text",
        }
    }

    pub fn from_str(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "multiple_select" => AttributeVariant::MultipleSelect,
            "number" => AttributeVariant::Number,
            "text" => AttributeVariant::Text,
            _ => AttributeVariant::Select,
        }
    }

    pub fn has_options(&self) -> bool {
        matches!(
            self,
            AttributeVariant::Select | AttributeVariant::MultipleSelect
        )
    }
}

/// Configured range of a numeric attribute shown as a selectable facet option.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NumericBucket {
    pub min: Decimal,
    pub max: Decimal,
    pub name: LocalizedName,
}

#[derive(Id, Clone, Debug)]
#[Id(ref_id, get_id)]
pub struct AttributeGroup {
    #[id]
    pub id: Uuid,
    pub name: LocalizedName,
}

#[derive(Id, Clone, Debug)]
#[Id(ref_id, get_id)]
pub struct Attribute {
    #[id]
    pub id: Uuid,
    pub group_id: IdentityOf<AttributeGroup>,
    /// Globally unique, never contains the path separator.
    pub slug: String,
    pub name: LocalizedName,
    pub variant: AttributeVariant,
    /// Unit of measure, e.g. `%` or `L`
    pub metric: Option<String>,
    pub show_in_catalogue_filter: bool,
    pub priority: i64,
    pub buckets: Vec<NumericBucket>,
}

impl Attribute {
    pub fn is_price(&self) -> bool {
        self.variant == AttributeVariant::Number && self.slug == PRICE_ATTRIBUTE_SLUG
    }
}

/// One node of an attribute's option tree, stored flat with a parent link.
#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct AttributeOption {
    #[id]
    pub id: Uuid,
    pub attribute_id: IdentityOf<Attribute>,
    pub parent_id: Option<Uuid>,
    /// Unique within the attribute's tree only.
    pub slug: String,
    pub name: LocalizedName,
    pub priority: i64,
}

pub struct InGroups(pub Vec<IdentityOf<AttributeGroup>>);
pub struct GroupIds(pub Vec<IdentityOf<AttributeGroup>>);
pub struct ByAttribute(pub IdentityOf<Attribute>);

impl Selector for InGroups {}
impl SelectBy<InGroups> for Attribute {}

impl Selector for GroupIds {}
impl SelectBy<GroupIds> for AttributeGroup {}

impl Selector for ByAttribute {}
impl SelectBy<ByAttribute> for AttributeOption {}

pub trait AttributeRepository:
    Repository<Attribute, Error = anyhow::Error>
    + Repository<AttributeGroup, Error = anyhow::Error>
    + Repository<AttributeOption, Error = anyhow::Error>
    + Save<Attribute>
    + Get<Attribute>
    + Select<Attribute, InGroups>
    + Save<AttributeGroup>
    + Select<AttributeGroup, GroupIds>
    + Save<AttributeOption>
    + Select<AttributeOption, ByAttribute>
    + Remove<AttributeOption>
    + Send
    + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_round_trips_through_storage_name() {
        for v in [
            AttributeVariant::Select,
            AttributeVariant::MultipleSelect,
            AttributeVariant::Number,
            AttributeVariant::Text,
        ] {
            assert_eq!(AttributeVariant::from_str(v.as_str()), v);
            assert_eq!(v.to_string(), v.as_str());
        }
        assert!(AttributeVariant::MultipleSelect.has_options());
        assert!(!AttributeVariant::Number.has_options());
    }
}
