//! Persistence layer: kind-partitioned, ancestor-scoped entity storage.
//!
//! The [`Datastore`] trait is the narrow interface the services consume.
//! Entities are addressed by a [`Key`] made of a [`Kind`], an ancestor
//! ("parent") partition and either an auto-assigned numeric id or a name.
//! Writes are batched into a [`Transaction`] that is applied atomically,
//! together with any work-queue tasks staged on it.
//!
//! Two implementations are provided: [`MemoryStore`] for development and
//! tests, and [`PostgresStore`] backed by `sqlx::PgPool`.

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::queue::Task;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Ancestor partition of snapshots and change records.
pub const ROOT_PARENT: &str = "root";

/// Ancestor partition of the session clock's dedup ledger.
pub const SESSION_PARENT: &str = "session";

/// Entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// Full event-data snapshots.
    EventData,
    /// Change log records.
    Changes,
    /// Dedup ledger of clocked `(session, kind)` pairs.
    Next,
}

impl Kind {
    /// Returns the storage name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EventData => "EventData",
            Self::Changes => "Changes",
            Self::Next => "Next",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    /// Not yet assigned; the store picks a numeric id on commit.
    Incomplete,
    /// Store-assigned numeric id.
    Id(i64),
    /// Caller-chosen name. Named puts are insert-if-absent.
    Name(String),
}

/// Address of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Entity kind.
    pub kind: Kind,
    /// Ancestor partition.
    pub parent: String,
    /// Identifier within the partition.
    pub id: KeyId,
}

impl Key {
    /// Creates a key whose id is assigned on commit.
    #[must_use]
    pub fn incomplete(kind: Kind, parent: &str) -> Self {
        Self {
            kind,
            parent: parent.to_string(),
            id: KeyId::Incomplete,
        }
    }

    /// Creates a named key.
    #[must_use]
    pub fn named(kind: Kind, parent: &str, name: impl Into<String>) -> Self {
        Self {
            kind,
            parent: parent.to_string(),
            id: KeyId::Name(name.into()),
        }
    }

    /// Returns `true` until the store has assigned an id.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete
    }

    /// Returns the key with the given numeric id.
    #[must_use]
    pub fn with_id(&self, id: i64) -> Self {
        Self {
            kind: self.kind,
            parent: self.parent.clone(),
            id: KeyId::Id(id),
        }
    }

    /// Encodes the key as `kind/parent/id`.
    #[must_use]
    pub fn encoded(&self) -> String {
        let id = match &self.id {
            KeyId::Incomplete => String::new(),
            KeyId::Id(id) => id.to_string(),
            KeyId::Name(name) => name.clone(),
        };
        format!("{}/{}/{}", self.kind, self.parent, id)
    }

    /// Deterministic content fingerprint of this key: the lowercase hex
    /// BLAKE3 digest of [`Key::encoded`].
    #[must_use]
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.encoded().as_bytes()).to_hex().to_string()
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Entity address.
    pub key: Key,
    /// Ordering timestamp used by range queries.
    pub ts: DateTime<Utc>,
    /// JSON body.
    pub body: serde_json::Value,
}

/// Sort order of a [`Query`] on the entity timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Ancestor-scoped query over a single kind.
#[derive(Debug, Clone)]
pub struct Query {
    /// Entity kind.
    pub kind: Kind,
    /// Ancestor partition.
    pub parent: String,
    /// Only entities with a timestamp strictly after this.
    pub after: Option<DateTime<Utc>>,
    /// Result order.
    pub order: Order,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates an unbounded ascending query.
    #[must_use]
    pub fn new(kind: Kind, parent: &str) -> Self {
        Self {
            kind,
            parent: parent.to_string(),
            after: None,
            order: Order::Ascending,
            limit: None,
        }
    }

    /// Restricts results to timestamps strictly after `ts`.
    #[must_use]
    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.after = Some(ts);
        self
    }

    /// Sets the result order.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns `true` if `entity` belongs to this query's partition and
    /// passes the timestamp filter.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.key.kind == self.kind
            && entity.key.parent == self.parent
            && self.after.is_none_or(|after| entity.ts > after)
    }
}

/// A batch of writes applied atomically by [`Datastore::commit`].
#[derive(Debug, Default)]
pub struct Transaction {
    puts: Vec<Entity>,
    tasks: Vec<Task>,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an entity write.
    pub fn put(&mut self, entity: Entity) {
        self.puts.push(entity);
    }

    /// Stages a task to enqueue when the transaction commits.
    pub fn enqueue(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.tasks.is_empty()
    }

    /// Returns the staged entity writes.
    #[must_use]
    pub fn puts(&self) -> &[Entity] {
        &self.puts
    }

    /// Returns the staged tasks.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Splits the transaction into its writes and tasks.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Entity>, Vec<Task>) {
        (self.puts, self.tasks)
    }
}

/// Durable entity storage.
///
/// Implementations must apply [`Datastore::commit`] atomically: either every
/// staged put and task becomes visible, or none does.
#[async_trait]
pub trait Datastore: fmt::Debug + Send + Sync {
    /// Runs an ancestor-scoped query.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Persistence`] on storage failure.
    async fn query(&self, query: &Query) -> Result<Vec<Entity>, BackendError>;

    /// Looks up entities by key, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Persistence`] on storage failure.
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, BackendError>;

    /// Applies a transaction atomically and returns the completed keys of
    /// its puts, in staging order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] if a named put already exists, or
    /// [`BackendError::Persistence`] on storage failure. Nothing is applied
    /// in either case.
    async fn commit(&self, tx: Transaction) -> Result<Vec<Key>, BackendError>;

    /// Deletes entities by key. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Persistence`] on storage failure.
    async fn delete_multi(&self, keys: &[Key]) -> Result<(), BackendError>;
}
