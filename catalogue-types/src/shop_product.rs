use crate::product::ProductSummary;
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};
use uuid::Uuid;

/// Offer of one shop for a product in one city.
#[derive(Id, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct ShopProduct {
    #[id]
    pub id: Uuid,
    pub product_id: IdentityOf<ProductSummary>,
    pub shop_slug: String,
    pub company_slug: String,
    pub city_slug: String,
    /// Whole units of the base currency
    pub price: i64,
    pub available: i64,
}

pub struct ByProduct(pub IdentityOf<ProductSummary>);

impl Selector for ByProduct {}
impl SelectBy<ByProduct> for ShopProduct {}

pub trait ShopProductRepository:
    Repository<ShopProduct, Error = anyhow::Error>
    + Save<ShopProduct>
    + Get<ShopProduct>
    + Select<ShopProduct, ByProduct>
    + Remove<ShopProduct>
    + Send
    + Sync
{
}
