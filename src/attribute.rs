use crate::option_tree::OptionTree;
use crate::read_uuid;
use async_trait::async_trait;
use catalogue_types::attribute::{
    Attribute, AttributeGroup, AttributeOption, AttributeRepository, AttributeVariant, ByAttribute,
    GroupIds, InGroups, NumericBucket,
};
use catalogue_types::LocalizedName;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::BTreeSet;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::prelude::*;
use uuid::Uuid;

pub struct SqliteAttributeRepository {
    conn: Connection,
}

impl SqliteAttributeRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS attribute_group (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS attribute (
                    id BLOB PRIMARY KEY,
                    group_id BLOB NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    variant TEXT NOT NULL DEFAULT 'select',
                    metric TEXT,
                    show_in_catalogue_filter INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 0,
                    buckets TEXT NOT NULL DEFAULT '[]'
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS attribute_option (
                    id BLOB PRIMARY KEY,
                    attribute_id BLOB NOT NULL,
                    parent_id BLOB,
                    slug TEXT NOT NULL,
                    name TEXT NOT NULL,
                    priority INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS attribute_option_attribute ON attribute_option (attribute_id)",
                [],
            )?;
            // Every option paired with itself and each of its descendants.
            conn.execute(
                "CREATE TABLE IF NOT EXISTS option_closure (
                    attribute_id BLOB NOT NULL,
                    attribute_slug TEXT NOT NULL,
                    option_slug TEXT NOT NULL,
                    member_slug TEXT NOT NULL,
                    PRIMARY KEY (attribute_slug, option_slug, member_slug)
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS option_closure_member ON option_closure (attribute_slug, member_slug)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS option_closure_attribute ON option_closure (attribute_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Stores a batch of options in one transaction, rebuilding the closure
    /// once per touched attribute.
    pub async fn save_options(&self, options: Vec<AttributeOption>) -> Result<(), anyhow::Error> {
        let rows = options
            .into_iter()
            .map(|o| -> Result<_, anyhow::Error> { Ok((o.name.to_db()?, o)) })
            .collect::<Result<Vec<_>, anyhow::Error>>()?;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut touched = BTreeSet::new();
                for (name, o) in &rows {
                    if let Some(previous) = upsert_option(&tx, o, name)? {
                        touched.insert(previous);
                    }
                    touched.insert(o.attribute_id);
                }
                for attribute_id in touched {
                    rebuild_closure(&tx, attribute_id)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?)
    }
}

/// Writes the option, returning its previous attribute when it moved.
fn upsert_option(
    conn: &rusqlite::Connection,
    o: &AttributeOption,
    name: &str,
) -> Result<Option<Uuid>, rusqlite::Error> {
    let previous = option_attribute(conn, o.id)?;
    conn.execute(
        "INSERT INTO attribute_option (id, attribute_id, parent_id, slug, name, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET attribute_id=?2, parent_id=?3, slug=?4, name=?5, priority=?6",
        params![o.id, o.attribute_id, o.parent_id, o.slug, name, o.priority],
    )?;
    Ok(previous.filter(|p| *p != o.attribute_id))
}

fn option_attribute(conn: &rusqlite::Connection, id: Uuid) -> Result<Option<Uuid>, rusqlite::Error> {
    conn.query_row(
        "SELECT attribute_id FROM attribute_option WHERE id = ?1",
        params![id],
        |row| read_uuid(row, 0),
    )
    .optional()
}

/// Recomputes the closure rows of one attribute from its stored options.
fn rebuild_closure(conn: &rusqlite::Connection, attribute_id: Uuid) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM option_closure WHERE attribute_id = ?1",
        params![attribute_id],
    )?;
    let slug: Option<String> = conn
        .query_row(
            "SELECT slug FROM attribute WHERE id = ?1",
            params![attribute_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(slug) = slug else {
        return Ok(());
    };
    let mut stmt = conn.prepare(
        "SELECT id, attribute_id, parent_id, slug, name, priority FROM attribute_option WHERE attribute_id = ?1 ORDER BY rowid",
    )?;
    let options = stmt
        .query_map(params![attribute_id], read_option)?
        .collect::<Result<Vec<_>, _>>()?;
    let tree = OptionTree::build(options);
    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO option_closure (attribute_id, attribute_slug, option_slug, member_slug)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (option, _) in tree.preorder() {
        for member in tree.descendant_slugs(&option.slug) {
            insert.execute(params![attribute_id, slug, option.slug, member])?;
        }
    }
    log::debug!(
        "Rebuilt option closure of {slug} over {} options",
        tree.len()
    );
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

fn read_attribute(row: &rusqlite::Row) -> Result<Attribute, rusqlite::Error> {
    let variant: String = row.get(4)?;
    let buckets: Vec<NumericBucket> = json_column(row, 8)?;
    Ok(Attribute {
        id: read_uuid(row, 0)?,
        group_id: read_uuid(row, 1)?,
        slug: row.get(2)?,
        name: LocalizedName(json_column(row, 3)?),
        variant: AttributeVariant::from_str(&variant),
        metric: row.get(5)?,
        show_in_catalogue_filter: row.get(6)?,
        priority: row.get(7)?,
        buckets,
    })
}

fn read_option(row: &rusqlite::Row) -> Result<AttributeOption, rusqlite::Error> {
    let parent_id = match row.get_ref(2)? {
        rusqlite::types::ValueRef::Null => None,
        _ => Some(read_uuid(row, 2)?),
    };
    Ok(AttributeOption {
        id: read_uuid(row, 0)?,
        attribute_id: read_uuid(row, 1)?,
        parent_id,
        slug: row.get(3)?,
        name: LocalizedName(json_column(row, 4)?),
        priority: row.get(5)?,
    })
}

const ATTRIBUTE_COLUMNS: &str =
    "id, group_id, slug, name, variant, metric, show_in_catalogue_filter, priority, buckets";

impl Repository<Attribute> for SqliteAttributeRepository {
    type Error = anyhow::Error;
}

impl Repository<AttributeGroup> for SqliteAttributeRepository {
    type Error = anyhow::Error;
}

impl Repository<AttributeOption> for SqliteAttributeRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<Attribute> for SqliteAttributeRepository {
    async fn get_one(&self, id: &IdentityOf<Attribute>) -> Result<Option<Attribute>, anyhow::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ATTRIBUTE_COLUMNS} FROM attribute WHERE id = ?1"
                ))?;
                let a = stmt.query_map(params![id], read_attribute)?.next().transpose()?;
                Ok(a)
            })
            .await?)
    }
}

#[async_trait]
impl Select<Attribute, InGroups> for SqliteAttributeRepository {
    async fn select(&self, InGroups(groups): &InGroups) -> Result<Vec<Attribute>, anyhow::Error> {
        if groups.is_empty() {
            return Ok(vec![]);
        }
        let groups = groups.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; groups.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ATTRIBUTE_COLUMNS} FROM attribute WHERE group_id IN ({placeholders}) ORDER BY priority DESC, slug"
                ))?;
                let a = stmt
                    .query_map(params_from_iter(groups.iter()), read_attribute)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(a)
            })
            .await?)
    }
}

#[async_trait]
impl Save<Attribute> for SqliteAttributeRepository {
    async fn save(&self, a: Attribute) -> Result<(), anyhow::Error> {
        let name = a.name.to_db()?;
        let buckets = serde_json::to_string(&a.buckets)?;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO attribute (id, group_id, slug, name, variant, metric, show_in_catalogue_filter, priority, buckets)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET group_id=?2, slug=?3, name=?4, variant=?5, metric=?6,
                        show_in_catalogue_filter=?7, priority=?8, buckets=?9",
                    params![
                        a.id,
                        a.group_id,
                        a.slug,
                        name,
                        a.variant.as_str(),
                        a.metric,
                        a.show_in_catalogue_filter,
                        a.priority,
                        buckets,
                    ],
                )?;
                rebuild_closure(&tx, a.id)?;
                tx.commit()?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Select<AttributeGroup, GroupIds> for SqliteAttributeRepository {
    async fn select(&self, GroupIds(ids): &GroupIds) -> Result<Vec<AttributeGroup>, anyhow::Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = ids.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, name FROM attribute_group WHERE id IN ({placeholders})"
                ))?;
                let g = stmt
                    .query_map(params_from_iter(ids.iter()), |row| {
                        Ok(AttributeGroup {
                            id: read_uuid(row, 0)?,
                            name: LocalizedName(json_column(row, 1)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(g)
            })
            .await?)
    }
}

#[async_trait]
impl Save<AttributeGroup> for SqliteAttributeRepository {
    async fn save(&self, g: AttributeGroup) -> Result<(), anyhow::Error> {
        let name = g.name.to_db()?;
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attribute_group (id, name) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET name=?2",
                    params![g.id, name],
                )?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Select<AttributeOption, ByAttribute> for SqliteAttributeRepository {
    async fn select(
        &self,
        ByAttribute(attribute_id): &ByAttribute,
    ) -> Result<Vec<AttributeOption>, anyhow::Error> {
        let attribute_id = *attribute_id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, attribute_id, parent_id, slug, name, priority FROM attribute_option WHERE attribute_id = ?1 ORDER BY rowid",
                )?;
                let o = stmt
                    .query_map(params![attribute_id], read_option)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(o)
            })
            .await?)
    }
}

#[async_trait]
impl Save<AttributeOption> for SqliteAttributeRepository {
    async fn save(&self, o: AttributeOption) -> Result<(), anyhow::Error> {
        let name = o.name.to_db()?;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(previous) = upsert_option(&tx, &o, &name)? {
                    rebuild_closure(&tx, previous)?;
                }
                rebuild_closure(&tx, o.attribute_id)?;
                tx.commit()?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Remove<AttributeOption> for SqliteAttributeRepository {
    async fn remove(&self, id: &IdentityOf<AttributeOption>) -> Result<(), anyhow::Error> {
        let id = *id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let attribute_id = option_attribute(&tx, id)?;
                tx.execute("DELETE FROM attribute_option WHERE id = ?1", params![id])?;
                if let Some(attribute_id) = attribute_id {
                    rebuild_closure(&tx, attribute_id)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl AttributeRepository for SqliteAttributeRepository {}
