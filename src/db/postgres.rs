use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use super::{InteractionLog, PromptCatalog};
use crate::{
    error::{AppError, AppResult},
    models::{Interaction, InteractionType, Prompt},
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Catalog and interaction log stored in PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PromptRow {
    id: String,
    title: String,
    description: Option<String>,
    tags: Vec<String>,
    category: Option<String>,
    model: Option<String>,
    language: Option<String>,
    likes: i64,
    saves: i64,
    comments: i64,
    rating_avg: f64,
    rating_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<PromptRow> for Prompt {
    fn from(row: PromptRow) -> Self {
        Prompt {
            id: row.id,
            title: row.title,
            description: row.description,
            tags: row.tags,
            category: row.category,
            model: row.model,
            language: row.language,
            likes: non_negative(row.likes),
            saves: non_negative(row.saves),
            comments: non_negative(row.comments),
            rating_avg: row.rating_avg,
            rating_count: non_negative(row.rating_count),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InteractionRow {
    id: Uuid,
    actor_id: String,
    prompt_id: String,
    kind: String,
    weight: f64,
    created_at: DateTime<Utc>,
}

impl TryFrom<InteractionRow> for Interaction {
    type Error = AppError;

    fn try_from(row: InteractionRow) -> Result<Self, Self::Error> {
        let kind: InteractionType = row.kind.parse().map_err(AppError::Internal)?;
        Ok(Interaction {
            id: row.id,
            actor_id: row.actor_id,
            item_id: row.prompt_id,
            kind,
            weight: row.weight,
            created_at: row.created_at,
        })
    }
}

const PROMPT_COLUMNS: &str = "id, title, description, tags, category, model, language, \
     likes, saves, comments, rating_avg, rating_count, created_at, updated_at";

#[async_trait]
impl PromptCatalog for PgStore {
    async fn list_prompts(&self) -> AppResult<Vec<Prompt>> {
        let rows: Vec<PromptRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prompts WHERE is_public ORDER BY id",
            PROMPT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = rows.len(), "Loaded prompt catalog");
        Ok(rows.into_iter().map(Prompt::from).collect())
    }

    async fn get_prompt(&self, id: &str) -> AppResult<Option<Prompt>> {
        let row: Option<PromptRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prompts WHERE id = $1 AND is_public",
            PROMPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Prompt::from))
    }
}

#[async_trait]
impl InteractionLog for PgStore {
    async fn append(&self, interaction: &Interaction) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO interactions (id, actor_id, prompt_id, kind, weight, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(interaction.id)
        .bind(&interaction.actor_id)
        .bind(&interaction.item_id)
        .bind(interaction.kind.as_str())
        .bind(interaction.weight)
        .bind(interaction.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn for_actor(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Interaction>> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            "SELECT id, actor_id, prompt_id, kind, weight, created_at FROM interactions \
             WHERE actor_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2) \
             ORDER BY created_at",
        )
        .bind(actor_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut interactions = Vec::with_capacity(rows.len());
        for row in rows {
            match Interaction::try_from(row) {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => tracing::warn!(error = %e, actor_id = %actor_id, "Skipping malformed interaction row"),
            }
        }
        Ok(interactions)
    }
}
