use crate::attribute::AttributeGroup;
use crate::LocalizedName;
use async_trait::async_trait;
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};
use uuid::Uuid;

/// Top level catalogue category. Owned by the CMS, read-only here.
#[derive(Id, Clone, Debug)]
#[Id(ref_id, get_id)]
pub struct Rubric {
    #[id]
    pub id: Uuid,
    pub slug: String,
    pub name: LocalizedName,
    pub active: bool,
    pub show_in_navigation: bool,
    pub show_in_filter: bool,
    pub priority: i64,
    /// Ordered, the order of groups is the order of the filter panel.
    pub attribute_groups: Vec<IdentityOf<AttributeGroup>>,
}

pub struct BySlug(pub String);

impl Selector for BySlug {}
impl SelectBy<BySlug> for Rubric {}

#[async_trait]
pub trait RubricRepository:
    Repository<Rubric, Error = anyhow::Error>
    + Save<Rubric>
    + Get<Rubric>
    + Select<Rubric, BySlug>
    + Remove<Rubric>
    + Send
    + Sync
{
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Rubric>, Self::Error> {
        Ok(self
            .select(&BySlug(slug.to_string()))
            .await?
            .into_iter()
            .next())
    }
}
