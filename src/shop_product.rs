use crate::price::{PriceRange, PriceResolver, PriceScope};
use crate::query::sql::{self, SqlBuilder};
use crate::read_uuid;
use anyhow::Context;
use async_trait::async_trait;
use catalogue_types::shop_product::{ByProduct, ShopProduct, ShopProductRepository};
use rusqlite::{params, params_from_iter};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::prelude::*;
use uuid::Uuid;

pub struct SqliteShopProductRepository {
    conn: Connection,
}

impl SqliteShopProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", "WAL");
            let _ = conn.pragma_update(None, "synchronous", "NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", 5000i64);
            conn.execute(
                "CREATE TABLE IF NOT EXISTS shop_product (
                    id BLOB PRIMARY KEY,
                    product_id BLOB NOT NULL,
                    shop_slug TEXT NOT NULL,
                    company_slug TEXT NOT NULL,
                    city_slug TEXT NOT NULL,
                    price INTEGER NOT NULL,
                    available INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS shop_product_scope ON shop_product (product_id, city_slug, company_slug)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn read_shop_product(row: &rusqlite::Row) -> Result<ShopProduct, rusqlite::Error> {
    Ok(ShopProduct {
        id: read_uuid(row, 0)?,
        product_id: read_uuid(row, 1)?,
        shop_slug: row.get(2)?,
        company_slug: row.get(3)?,
        city_slug: row.get(4)?,
        price: row.get(5)?,
        available: row.get(6)?,
    })
}

impl Repository<ShopProduct> for SqliteShopProductRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<ShopProduct> for SqliteShopProductRepository {
    async fn get_one(&self, id: &IdentityOf<ShopProduct>) -> Result<Option<ShopProduct>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, product_id, shop_slug, company_slug, city_slug, price, available FROM shop_product WHERE id = ?1",
                )?;
                let p = stmt
                    .query_map(params![id], read_shop_product)?
                    .next()
                    .transpose()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl Select<ShopProduct, ByProduct> for SqliteShopProductRepository {
    async fn select(&self, ByProduct(id): &ByProduct) -> Result<Vec<ShopProduct>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, product_id, shop_slug, company_slug, city_slug, price, available FROM shop_product WHERE product_id = ?1 ORDER BY city_slug, shop_slug",
                )?;
                let p = stmt
                    .query_map(params![id], read_shop_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl Save<ShopProduct> for SqliteShopProductRepository {
    async fn save(&self, mut p: ShopProduct) -> Result<(), Self::Error> {
        // request scopes arrive lowercased
        p.city_slug = p.city_slug.trim().to_lowercase();
        p.company_slug = p.company_slug.trim().to_lowercase();
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO shop_product (id, product_id, shop_slug, company_slug, city_slug, price, available)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET product_id=?2, shop_slug=?3, company_slug=?4, city_slug=?5, price=?6, available=?7",
                    params![
                        p.id,
                        p.product_id,
                        p.shop_slug,
                        p.company_slug,
                        p.city_slug,
                        p.price,
                        p.available,
                    ],
                )?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Remove<ShopProduct> for SqliteShopProductRepository {
    async fn remove(&self, id: &IdentityOf<ShopProduct>) -> Result<(), Self::Error> {
        let id = *id;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM shop_product WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl ShopProductRepository for SqliteShopProductRepository {}

/// `o.product_id IN (...)` plus the city/company scope of offers.
fn push_offer_scope(b: &mut SqlBuilder, products: &[Uuid], scope: &PriceScope) {
    b.push("o.product_id IN (")
        .bind_list(products.iter().copied().map(sql::uuid))
        .push(") AND o.city_slug = ")
        .bind(scope.city.clone());
    if let Some(company) = &scope.company {
        b.push(" AND o.company_slug = ").bind(company.clone());
    }
}

#[async_trait]
impl PriceResolver for SqliteShopProductRepository {
    async fn resolve_many(
        &self,
        products: &[Uuid],
        scope: &PriceScope,
    ) -> Result<HashMap<Uuid, PriceRange>, anyhow::Error> {
        if products.is_empty() {
            return Ok(HashMap::new());
        }
        let mut b = SqlBuilder::new();
        b.push("SELECT o.product_id, MIN(o.price), MAX(o.price) FROM shop_product o WHERE ");
        push_offer_scope(&mut b, products, scope);
        b.push(" AND o.available > 0 AND o.price > 0 GROUP BY o.product_id");
        let (ranges_sql, ranges_params) = b.finish();

        let mut b = SqlBuilder::new();
        b.push("SELECT o.id, o.product_id, o.price FROM shop_product o WHERE ");
        push_offer_scope(&mut b, products, scope);
        b.push(" AND o.price <= 0");
        let (invalid_sql, invalid_params) = b.finish();

        let (ranges, invalid) = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&ranges_sql)?;
                let ranges = stmt
                    .query_map(params_from_iter(ranges_params.iter()), |row| {
                        Ok((read_uuid(row, 0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut stmt = conn.prepare(&invalid_sql)?;
                let invalid = stmt
                    .query_map(params_from_iter(invalid_params.iter()), |row| {
                        Ok((read_uuid(row, 0)?, read_uuid(row, 1)?, row.get::<_, i64>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((ranges, invalid))
            })
            .await
            .context("Unable to resolve prices")?;
        for (offer, product, price) in invalid {
            log::warn!("Offer {offer} of product {product} has invalid price {price}, ignoring it");
        }
        Ok(ranges
            .into_iter()
            .map(|(id, min, max)| {
                (
                    id,
                    PriceRange {
                        min: Decimal::from(min),
                        max: Decimal::from(max),
                    },
                )
            })
            .collect())
    }
}
