use std::{future::Future, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Collection, Document, DocumentId, DocumentStore, Filter, StoreError, StoredDocument};

/// Documents stored as JSONB rows of the `documents` table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgDocumentStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self::from_pool(pool, timeout))
    }

    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|e| {
                let err = map_sqlx_error(e);
                if err.is_unavailable() {
                    warn!(op, error = %err, "document store unreachable");
                }
                err
            }),
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "document store timed out");
                Err(StoreError::Unavailable(format!("{op} timed out")))
            }
        }
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Malformed(e.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

type Row = (Uuid, Json<Document>);

fn into_stored((id, Json(body)): Row) -> StoredDocument {
    StoredDocument { id, body }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = self
            .bounded(
                "find_one",
                sqlx::query_as::<_, Row>(
                    r#"
                    SELECT id, body
                    FROM documents
                    WHERE collection = $1 AND body @> $2
                    ORDER BY seq
                    LIMIT 1
                    "#,
                )
                .bind(collection.name())
                .bind(Json(filter.as_document()))
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(into_stored))
    }

    async fn find_all(&self, collection: Collection) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = self
            .bounded(
                "find_all",
                sqlx::query_as::<_, Row>(
                    r#"
                    SELECT id, body
                    FROM documents
                    WHERE collection = $1
                    ORDER BY seq
                    "#,
                )
                .bind(collection.name())
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(into_stored).collect())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<DocumentId, StoreError> {
        let id = Uuid::new_v4();
        self.bounded(
            "insert_one",
            sqlx::query(
                r#"
                INSERT INTO documents (id, collection, body)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(collection.name())
            .bind(Json(doc))
            .execute(&self.pool),
        )
        .await?;
        debug!(collection = collection.name(), %id, "document inserted");
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: Collection,
        filter: &Filter,
        doc: Document,
    ) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                "insert_if_absent",
                sqlx::query(
                    r#"
                    INSERT INTO documents (id, collection, body)
                    SELECT $1, $2, $3
                    WHERE NOT EXISTS (
                        SELECT 1 FROM documents WHERE collection = $2 AND body @> $4
                    )
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(collection.name())
                .bind(Json(doc))
                .bind(Json(filter.as_document()))
                .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        fields: Document,
    ) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                "update_one",
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET body = body || $3
                    WHERE id = (
                        SELECT id FROM documents
                        WHERE collection = $1 AND body @> $2
                        ORDER BY seq
                        LIMIT 1
                    )
                    "#,
                )
                .bind(collection.name())
                .bind(Json(filter.as_document()))
                .bind(Json(fields))
                .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn increment(
        &self,
        collection: Collection,
        filter: &Filter,
        field: &str,
        amount: i64,
    ) -> Result<Option<i64>, StoreError> {
        // A single UPDATE: concurrent increments of the same row queue on the
        // row lock and each re-reads the latest committed body.
        self.bounded(
            "increment",
            sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE documents
                SET body = jsonb_set(
                    body,
                    ARRAY[$3::text],
                    to_jsonb(COALESCE((body->>$3)::bigint, 0) + $4)
                )
                WHERE id = (
                    SELECT id FROM documents
                    WHERE collection = $1 AND body @> $2
                    ORDER BY seq
                    LIMIT 1
                )
                RETURNING (body->>$3)::bigint
                "#,
            )
            .bind(collection.name())
            .bind(Json(filter.as_document()))
            .bind(field)
            .bind(amount)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn delete_one(&self, collection: Collection, id: DocumentId) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                "delete_one",
                sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                    .bind(collection.name())
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded("ping", sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
