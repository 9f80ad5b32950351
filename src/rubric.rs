use crate::read_uuid;
use async_trait::async_trait;
use catalogue_types::rubric::{BySlug, Rubric, RubricRepository};
use catalogue_types::LocalizedName;
use rusqlite::params;
use rusqlite::types::Type;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, Remove, Save, Select};
use typesafe_repository::prelude::*;
use uuid::Uuid;

pub struct SqliteRubricRepository {
    conn: Connection,
}

impl SqliteRubricRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS rubric (
                    id BLOB PRIMARY KEY,
                    slug TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    show_in_navigation INTEGER NOT NULL DEFAULT 1,
                    show_in_filter INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 0
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS rubric_group (
                    rubric_id BLOB NOT NULL,
                    group_id BLOB NOT NULL,
                    position INTEGER NOT NULL,
                    PRIMARY KEY (rubric_id, group_id)
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn read_rubric(row: &rusqlite::Row) -> Result<Rubric, rusqlite::Error> {
    let name: String = row.get(2)?;
    let name = LocalizedName::from_db(&name)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, err.into()))?;
    Ok(Rubric {
        id: read_uuid(row, 0)?,
        slug: row.get(1)?,
        name,
        active: row.get(3)?,
        show_in_navigation: row.get(4)?,
        show_in_filter: row.get(5)?,
        priority: row.get(6)?,
        attribute_groups: vec![],
    })
}

fn with_groups(conn: &rusqlite::Connection, mut rubric: Rubric) -> Result<Rubric, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT group_id FROM rubric_group WHERE rubric_id = ?1 ORDER BY position")?;
    rubric.attribute_groups = stmt
        .query_map(params![rubric.id], |row| read_uuid(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rubric)
}

const RUBRIC_COLUMNS: &str =
    "id, slug, name, active, show_in_navigation, show_in_filter, priority";

impl Repository<Rubric> for SqliteRubricRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Get<Rubric> for SqliteRubricRepository {
    async fn get_one(&self, id: &IdentityOf<Rubric>) -> Result<Option<Rubric>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUBRIC_COLUMNS} FROM rubric WHERE id = ?1"))?;
                let r = stmt.query_map(params![id], read_rubric)?.next().transpose()?;
                Ok(r.map(|r| with_groups(conn, r)).transpose()?)
            })
            .await?)
    }
}

#[async_trait]
impl Select<Rubric, BySlug> for SqliteRubricRepository {
    async fn select(&self, BySlug(slug): &BySlug) -> Result<Vec<Rubric>, Self::Error> {
        let slug = slug.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUBRIC_COLUMNS} FROM rubric WHERE slug = ?1"))?;
                let rubrics = stmt
                    .query_map(params![slug], read_rubric)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rubrics
                    .into_iter()
                    .map(|r| with_groups(conn, r))
                    .collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }
}

#[async_trait]
impl Save<Rubric> for SqliteRubricRepository {
    async fn save(&self, r: Rubric) -> Result<(), Self::Error> {
        let name = r.name.to_db()?;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO rubric (id, slug, name, active, show_in_navigation, show_in_filter, priority)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET slug=?2, name=?3, active=?4, show_in_navigation=?5,
                        show_in_filter=?6, priority=?7",
                    params![
                        r.id,
                        r.slug,
                        name,
                        r.active,
                        r.show_in_navigation,
                        r.show_in_filter,
                        r.priority,
                    ],
                )?;
                tx.execute("DELETE FROM rubric_group WHERE rubric_id = ?1", params![r.id])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO rubric_group (rubric_id, group_id, position) VALUES (?1, ?2, ?3)",
                    )?;
                    for (position, group) in r.attribute_groups.iter().enumerate() {
                        stmt.execute(params![r.id, group, position as i64])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?)
    }
}

#[async_trait]
impl Remove<Rubric> for SqliteRubricRepository {
    async fn remove(&self, id: &IdentityOf<Rubric>) -> Result<(), Self::Error> {
        let id: Uuid = *id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM rubric_group WHERE rubric_id = ?1", params![id])?;
                tx.execute("DELETE FROM rubric WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl RubricRepository for SqliteRubricRepository {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[tokio::test]
    async fn keeps_group_order() {
        let fixture = Fixture::empty().await;
        let repo = &fixture.rubrics;
        let groups = vec![Uuid::from_u128(30), Uuid::from_u128(10), Uuid::from_u128(20)];
        let rubric = Rubric {
            id: Uuid::from_u128(7),
            slug: "cider".to_string(),
            name: LocalizedName::new("en", "Cider"),
            active: true,
            show_in_navigation: true,
            show_in_filter: true,
            priority: 0,
            attribute_groups: groups.clone(),
        };
        repo.save(rubric).await.unwrap();
        let loaded = repo.get_by_slug("cider").await.unwrap().unwrap();
        assert_eq!(loaded.attribute_groups, groups);
        assert_eq!(loaded.name.get("uk", "en"), "Cider");

        repo.remove(&Uuid::from_u128(7)).await.unwrap();
        assert!(repo.get_one(&Uuid::from_u128(7)).await.unwrap().is_none());
    }
}
