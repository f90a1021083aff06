use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use crate::db::{DbError, NewCollection, SavedCollection};

#[derive(Clone)]
pub struct CollectionRepository {
    pool: PgPool,
}

impl CollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, collection), fields(group = %collection.group_name, energy_type = %collection.energy_type, date = %collection.date))]
    pub async fn insert(&self, collection: &NewCollection) -> Result<SavedCollection, DbError> {
        let saved = sqlx::query_as::<_, SavedCollection>(
            r#"
            INSERT INTO saved_collections (group_name, energy_type, date, note, "values")
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, group_name, energy_type, date, note, saved_at, "values"
            "#,
        )
        .bind(&collection.group_name)
        .bind(&collection.energy_type)
        .bind(&collection.date)
        .bind(&collection.note)
        .bind(Json(&collection.values))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert saved collection");
            e
        })?;

        debug!("Saved collection {} with {} records", saved.id, saved.values.len());
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn exists(
        &self,
        group_name: &str,
        energy_type: &str,
        date: &str,
    ) -> Result<bool, DbError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM saved_collections
                WHERE group_name = $1 AND energy_type = $2 AND date = $3
            )
            "#,
        )
        .bind(group_name)
        .bind(energy_type)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// All collections of a group, newest first
    #[instrument(skip(self))]
    pub async fn find_by_group(&self, group_name: &str) -> Result<Vec<SavedCollection>, DbError> {
        let collections = sqlx::query_as::<_, SavedCollection>(
            r#"
            SELECT id, group_name, energy_type, date, note, saved_at, "values"
            FROM saved_collections
            WHERE group_name = $1
            ORDER BY saved_at DESC, id DESC
            "#,
        )
        .bind(group_name)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            "Found {} saved collections for group {}",
            collections.len(),
            group_name
        );
        Ok(collections)
    }
}
