//! PostgreSQL implementation of the persistence layer and work queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::{Datastore, Entity, Key, KeyId, Kind, Order, Query, Transaction};
use crate::error::BackendError;
use crate::queue::{JobEnvelope, Task, WorkQueue};

type EntityRow = (i64, Option<String>, DateTime<Utc>, serde_json::Value);

/// PostgreSQL-backed store using `sqlx::PgPool`.
///
/// Entities live in a single `entities` table partitioned by
/// `(kind, parent)`. Queued tasks live in `tasks` and are leased with
/// `FOR UPDATE SKIP LOCKED`, so several workers can share one queue.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connects to `database_url` and runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Persistence`] if the connection or a
    /// migration fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| BackendError::Persistence(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| BackendError::Persistence(e.to_string()))?;

        tracing::info!("database migrations applied");
        Ok(Self::new(pool))
    }

    async fn get_one(&self, key: &Key) -> Result<Option<Entity>, BackendError> {
        let row = match &key.id {
            KeyId::Incomplete => return Ok(None),
            KeyId::Id(id) => {
                sqlx::query_as::<_, EntityRow>(
                    "SELECT id, name, ts, body FROM entities \
                     WHERE kind = $1 AND parent = $2 AND id = $3 AND name IS NULL",
                )
                .bind(key.kind.as_str())
                .bind(&key.parent)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            KeyId::Name(name) => {
                sqlx::query_as::<_, EntityRow>(
                    "SELECT id, name, ts, body FROM entities \
                     WHERE kind = $1 AND parent = $2 AND name = $3",
                )
                .bind(key.kind.as_str())
                .bind(&key.parent)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row.map(|row| to_entity(key.kind, &key.parent, row)))
    }
}

fn to_entity(kind: Kind, parent: &str, (id, name, ts, body): EntityRow) -> Entity {
    let key_id = name.map_or(KeyId::Id(id), KeyId::Name);
    Entity {
        key: Key {
            kind,
            parent: parent.to_string(),
            id: key_id,
        },
        ts,
        body,
    }
}

#[async_trait]
impl Datastore for PostgresStore {
    async fn query(&self, query: &Query) -> Result<Vec<Entity>, BackendError> {
        let direction = match query.order {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        };
        let sql = format!(
            "SELECT id, name, ts, body FROM entities \
             WHERE kind = $1 AND parent = $2 AND ($3::timestamptz IS NULL OR ts > $3) \
             ORDER BY ts {direction}, id {direction} LIMIT $4"
        );
        let limit = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(query.kind.as_str())
            .bind(&query.parent)
            .bind(query.after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackendError::Persistence(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| to_entity(query.kind, &query.parent, row))
            .collect())
    }

    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, BackendError> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            found.push(self.get_one(key).await?);
        }
        Ok(found)
    }

    async fn commit(&self, tx: Transaction) -> Result<Vec<Key>, BackendError> {
        let (puts, tasks) = tx.into_parts();
        let mut db = self.pool.begin().await?;
        let mut keys = Vec::with_capacity(puts.len());

        for entity in puts {
            let key = &entity.key;
            match &key.id {
                KeyId::Incomplete => {
                    let id = sqlx::query_scalar::<_, i64>(
                        "INSERT INTO entities (kind, parent, name, ts, body) \
                         VALUES ($1, $2, NULL, $3, $4) RETURNING id",
                    )
                    .bind(key.kind.as_str())
                    .bind(&key.parent)
                    .bind(entity.ts)
                    .bind(&entity.body)
                    .fetch_one(&mut *db)
                    .await?;
                    keys.push(key.with_id(id));
                }
                KeyId::Name(name) => {
                    let inserted = sqlx::query_scalar::<_, i64>(
                        "INSERT INTO entities (kind, parent, name, ts, body) \
                         VALUES ($1, $2, $3, $4, $5) \
                         ON CONFLICT (kind, parent, name) DO NOTHING RETURNING id",
                    )
                    .bind(key.kind.as_str())
                    .bind(&key.parent)
                    .bind(name)
                    .bind(entity.ts)
                    .bind(&entity.body)
                    .fetch_optional(&mut *db)
                    .await?;
                    if inserted.is_none() {
                        // dropping `db` rolls everything back
                        return Err(BackendError::Conflict(format!(
                            "{} already exists",
                            key.encoded()
                        )));
                    }
                    keys.push(key.clone());
                }
                KeyId::Id(id) => {
                    sqlx::query(
                        "INSERT INTO entities (id, kind, parent, name, ts, body) \
                         VALUES ($1, $2, $3, NULL, $4, $5) \
                         ON CONFLICT (id) DO UPDATE SET ts = EXCLUDED.ts, body = EXCLUDED.body",
                    )
                    .bind(id)
                    .bind(key.kind.as_str())
                    .bind(&key.parent)
                    .bind(entity.ts)
                    .bind(&entity.body)
                    .execute(&mut *db)
                    .await?;
                    keys.push(key.clone());
                }
            }
        }

        for task in tasks {
            let payload = serde_json::to_value(&task)?;
            sqlx::query("INSERT INTO tasks (id, payload) VALUES ($1, $2)")
                .bind(Uuid::new_v4())
                .bind(payload)
                .execute(&mut *db)
                .await
                .map_err(|e| BackendError::Queue(e.to_string()))?;
        }

        db.commit().await?;
        Ok(keys)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError> {
        let mut db = self.pool.begin().await?;
        for key in keys {
            match &key.id {
                KeyId::Incomplete => {}
                KeyId::Id(id) => {
                    sqlx::query("DELETE FROM entities WHERE kind = $1 AND parent = $2 AND id = $3")
                        .bind(key.kind.as_str())
                        .bind(&key.parent)
                        .bind(id)
                        .execute(&mut *db)
                        .await?;
                }
                KeyId::Name(name) => {
                    sqlx::query(
                        "DELETE FROM entities WHERE kind = $1 AND parent = $2 AND name = $3",
                    )
                    .bind(key.kind.as_str())
                    .bind(&key.parent)
                    .bind(name)
                    .execute(&mut *db)
                    .await?;
                }
            }
        }
        db.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for PostgresStore {
    async fn enqueue(&self, task: Task) -> Result<Uuid, BackendError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(&task)?;
        sqlx::query("INSERT INTO tasks (id, payload) VALUES ($1, $2)")
            .bind(id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Queue(e.to_string()))?;
        Ok(id)
    }

    async fn enqueue_all(&self, tasks: Vec<Task>) -> Result<Vec<Uuid>, BackendError> {
        let mut db = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO tasks (id, payload) VALUES ($1, $2)")
                .bind(id)
                .bind(serde_json::to_value(&task)?)
                .execute(&mut *db)
                .await
                .map_err(|e| BackendError::Queue(e.to_string()))?;
            ids.push(id);
        }
        db.commit()
            .await
            .map_err(|e| BackendError::Queue(e.to_string()))?;
        Ok(ids)
    }

    async fn lease(
        &self,
        max: usize,
        lease_for: Duration,
    ) -> Result<Vec<JobEnvelope>, BackendError> {
        let rows = sqlx::query_as::<_, (Uuid, serde_json::Value, i32)>(
            "UPDATE tasks SET delivery_attempt = delivery_attempt + 1, \
                 visible_at = now() + make_interval(secs => $2) \
             WHERE id IN ( \
                 SELECT id FROM tasks WHERE visible_at <= now() \
                 ORDER BY created_at LIMIT $1 FOR UPDATE SKIP LOCKED) \
             RETURNING id, payload, delivery_attempt",
        )
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(lease_for.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BackendError::Queue(e.to_string()))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload, attempt) in rows {
            match serde_json::from_value::<Task>(payload) {
                Ok(task) => jobs.push(JobEnvelope {
                    id,
                    task,
                    delivery_attempt: u32::try_from(attempt).unwrap_or(0),
                }),
                Err(e) => {
                    tracing::error!(%id, error = %e, "dropping undecodable task");
                    self.ack(id).await?;
                }
            }
        }
        Ok(jobs)
    }

    async fn ack(&self, id: Uuid) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn retry(&self, id: Uuid, after: Duration) -> Result<(), BackendError> {
        sqlx::query("UPDATE tasks SET visible_at = now() + make_interval(secs => $2) WHERE id = $1")
            .bind(id)
            .bind(after.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Queue(e.to_string()))?;
        Ok(())
    }
}
