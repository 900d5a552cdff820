use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::SourceStore;
use crate::selector::SelectorSet;
use crate::source::{NewSource, Source, SourceId};

/// Source definitions in the `sources` table (see `migrations/`).
pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn source_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Source> {
    let columns: serde_json::Value = row.try_get("column_selectors")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Source {
        id: SourceId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        selectors: SelectorSet {
            row_selector: row.try_get("row_selector")?,
            column_selectors: serde_json::from_value(columns)?,
        },
        created_at,
        updated_at,
    })
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn get_source(&self, id: &SourceId) -> anyhow::Result<Option<Source>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, url, row_selector, column_selectors, created_at, updated_at
            FROM sources WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(source_from_row).transpose()
    }

    async fn create_source(&self, new: NewSource) -> anyhow::Result<Source> {
        let source = new.into_source(SourceId::generate(), Utc::now());
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, url, row_selector, column_selectors, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(source.id.as_str())
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.selectors.row_selector)
        .bind(serde_json::to_value(&source.selectors.column_selectors)?)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(source)
    }

    async fn update_source(&self, id: &SourceId, new: NewSource) -> anyhow::Result<Option<Source>> {
        let row = sqlx::query(
            r#"
            UPDATE sources
            SET name = $2, url = $3, row_selector = $4, column_selectors = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, url, row_selector, column_selectors, created_at, updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(&new.name)
        .bind(&new.url)
        .bind(&new.selectors.row_selector)
        .bind(serde_json::to_value(&new.selectors.column_selectors)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(source_from_row).transpose()
    }
}
