use crate::facet::{FacetPlan, FacetRow, FacetSource};
use crate::filter::SortKey;
use crate::price::PriceScope;
use crate::query::sql::{self, SqlBuilder};
use crate::query::QueryFragment;
use crate::read_uuid;
use anyhow::Context;
use async_trait::async_trait;
use catalogue_types::product::{AttributeValue, ProductSummary, ProductSummaryRepository};
use catalogue_types::rubric::Rubric;
use catalogue_types::LocalizedName;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Remove, Save};
use typesafe_repository::prelude::*;

/// Filtered, sorted and paginated reads over product summaries.
#[async_trait]
pub trait ProductListing: Send + Sync {
    async fn count(&self, query: &QueryFragment, prices: &PriceScope)
        -> Result<u64, anyhow::Error>;

    async fn page(
        &self,
        query: &QueryFragment,
        prices: &PriceScope,
        sort: SortKey,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ProductSummary>, anyhow::Error>;
}

pub struct SqliteProductSummaryRepository {
    conn: Connection,
}

impl SqliteProductSummaryRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_summary (
                    id BLOB PRIMARY KEY,
                    rubric_id BLOB NOT NULL,
                    slug TEXT NOT NULL,
                    name TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    brand TEXT,
                    manufacturer TEXT,
                    attribute_values TEXT NOT NULL DEFAULT '{}',
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_filter_slug (
                    product_id BLOB NOT NULL,
                    attribute_slug TEXT NOT NULL,
                    option_slug TEXT NOT NULL,
                    PRIMARY KEY (product_id, attribute_slug, option_slug)
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product_number (
                    product_id BLOB NOT NULL,
                    attribute_slug TEXT NOT NULL,
                    value REAL NOT NULL,
                    PRIMARY KEY (product_id, attribute_slug)
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_summary_rubric ON product_summary (rubric_id, active)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_filter_slug_option ON product_filter_slug (attribute_slug, option_slug)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS product_number_attribute ON product_number (attribute_slug, value)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

const SUMMARY_COLUMNS: &str = "ps.id, ps.rubric_id, ps.slug, ps.name, ps.active, ps.brand, ps.manufacturer, ps.attribute_values, ps.created_at";

fn read_summary(row: &rusqlite::Row) -> Result<ProductSummary, rusqlite::Error> {
    let name: String = row.get(3)?;
    let name = LocalizedName::from_db(&name)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, err.into()))?;
    let values: String = row.get(7)?;
    let values: BTreeMap<String, AttributeValue> = serde_json::from_str(&values)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, err.into()))?;
    let created_at: i64 = row.get(8)?;
    Ok(ProductSummary {
        id: read_uuid(row, 0)?,
        rubric_id: read_uuid(row, 1)?,
        slug: row.get(2)?,
        name,
        active: row.get(4)?,
        brand: row.get(5)?,
        manufacturer: row.get(6)?,
        values,
        created_at: OffsetDateTime::from_unix_timestamp(created_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
    })
}

fn push_order(b: &mut SqlBuilder, sort: SortKey, prices: &PriceScope) {
    b.push(" ORDER BY ");
    match sort {
        SortKey::Newest => {
            b.push("ps.created_at DESC");
        }
        SortKey::PriceAsc | SortKey::PriceDesc => {
            sql::push_min_price(b, prices);
            b.push(" IS NULL, ");
            sql::push_min_price(b, prices);
            b.push(if sort == SortKey::PriceAsc { " ASC" } else { " DESC" });
        }
    }
    b.push(", ps.id");
}

impl Repository<ProductSummary> for SqliteProductSummaryRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<ProductSummary> for SqliteProductSummaryRepository {
    async fn get_one(
        &self,
        id: &IdentityOf<ProductSummary>,
    ) -> Result<Option<ProductSummary>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SUMMARY_COLUMNS} FROM product_summary ps WHERE ps.id = ?1"
                ))?;
                let p = stmt.query_map(params![id], read_summary)?.next().transpose()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl Save<ProductSummary> for SqliteProductSummaryRepository {
    async fn save(&self, p: ProductSummary) -> Result<(), Self::Error> {
        let name = p.name.to_db()?;
        let values = serde_json::to_string(&p.values)?;
        let filter_slugs = p
            .filter_slugs()
            .into_iter()
            .map(|(a, o)| (a.to_string(), o.to_string()))
            .collect::<Vec<_>>();
        let numbers = p
            .numbers()
            .into_iter()
            .map(|(a, n)| (a.to_string(), n.to_f64().unwrap_or_default()))
            .collect::<Vec<_>>();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO product_summary (id, rubric_id, slug, name, active, brand, manufacturer, attribute_values, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET rubric_id=?2, slug=?3, name=?4, active=?5, brand=?6,
                        manufacturer=?7, attribute_values=?8, created_at=?9",
                    params![
                        p.id,
                        p.rubric_id,
                        p.slug,
                        name,
                        p.active,
                        p.brand,
                        p.manufacturer,
                        values,
                        p.created_at.unix_timestamp(),
                    ],
                )?;
                tx.execute("DELETE FROM product_filter_slug WHERE product_id = ?1", params![p.id])?;
                tx.execute("DELETE FROM product_number WHERE product_id = ?1", params![p.id])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO product_filter_slug (product_id, attribute_slug, option_slug) VALUES (?1, ?2, ?3)",
                    )?;
                    for (attribute, option) in &filter_slugs {
                        stmt.execute(params![p.id, attribute, option])?;
                    }
                    let mut stmt = tx.prepare(
                        "INSERT INTO product_number (product_id, attribute_slug, value) VALUES (?1, ?2, ?3)",
                    )?;
                    for (attribute, value) in &numbers {
                        stmt.execute(params![p.id, attribute, value])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .context("Unable to save product summary")
    }
}

#[async_trait]
impl Remove<ProductSummary> for SqliteProductSummaryRepository {
    async fn remove(&self, id: &IdentityOf<ProductSummary>) -> Result<(), Self::Error> {
        let id = *id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM product_filter_slug WHERE product_id = ?1", params![id])?;
                tx.execute("DELETE FROM product_number WHERE product_id = ?1", params![id])?;
                tx.execute("DELETE FROM product_summary WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProductSummaryRepository for SqliteProductSummaryRepository {
    async fn recorded_option_slugs(
        &self,
        rubric_id: IdentityOf<Rubric>,
    ) -> Result<Vec<(String, String)>, Self::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT f.attribute_slug, f.option_slug FROM product_filter_slug f
                     JOIN product_summary ps ON ps.id = f.product_id
                     WHERE ps.rubric_id = ?1 ORDER BY 1, 2",
                )?;
                let p = stmt
                    .query_map(params![rubric_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await?)
    }
}

#[async_trait]
impl ProductListing for SqliteProductSummaryRepository {
    async fn count(
        &self,
        query: &QueryFragment,
        prices: &PriceScope,
    ) -> Result<u64, anyhow::Error> {
        let mut b = SqlBuilder::new();
        b.push("SELECT COUNT(*) FROM product_summary ps WHERE ");
        sql::lower_fragment(&mut b, query, prices);
        let (sql, params) = b.finish();
        let count: i64 = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let count = stmt.query_row(params_from_iter(params.iter()), |row| row.get(0))?;
                Ok(count)
            })
            .await
            .context("Unable to count products")?;
        Ok(count.max(0) as u64)
    }

    async fn page(
        &self,
        query: &QueryFragment,
        prices: &PriceScope,
        sort: SortKey,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ProductSummary>, anyhow::Error> {
        let mut b = SqlBuilder::new();
        b.push(&format!("SELECT {SUMMARY_COLUMNS} FROM product_summary ps WHERE "));
        sql::lower_fragment(&mut b, query, prices);
        push_order(&mut b, sort, prices);
        b.push(" LIMIT ")
            .bind(limit.min(i64::MAX as u64) as i64)
            .push(" OFFSET ")
            .bind(offset.min(i64::MAX as u64) as i64);
        let (sql, params) = b.finish();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let p = stmt
                    .query_map(params_from_iter(params.iter()), read_summary)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(p)
            })
            .await
            .context("Unable to list products")
    }
}

#[async_trait]
impl FacetSource for SqliteProductSummaryRepository {
    async fn facet_rows(
        &self,
        plan: &FacetPlan,
        prices: &PriceScope,
    ) -> Result<Vec<FacetRow>, anyhow::Error> {
        let (sql, params) = sql::lower_facet_plan(plan, prices).finish();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| {
                        let kind: String = row.get(0)?;
                        let attribute: String = row.get(1)?;
                        Ok(match kind.as_str() {
                            "bounds" => FacetRow::Bounds {
                                attribute,
                                min: row.get(4)?,
                                max: row.get(5)?,
                            },
                            _ => FacetRow::Count {
                                attribute,
                                value: row.get(2)?,
                                count: row.get::<_, i64>(3)?.max(0) as u64,
                            },
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .context("Unable to aggregate facets")
    }
}
