//! facegate-store — SQLite persistence for user records.
//!
//! One row per registered user; the face embedding column stays NULL until
//! the user enrolls. [`SqliteStore`] implements
//! [`EmbeddingStore`](facegate_core::EmbeddingStore) so the matcher can read
//! snapshots of it directly.

pub mod schema;

use chrono::Utc;
use facegate_core::codec::{decode_binary, encode_binary};
use facegate_core::{
    check_dimension, Embedding, EmbeddingError, EmbeddingStore, Identity, Snapshot, StoreError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("username already registered: {0}")]
    UsernameTaken(String),
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
    #[error(transparent)]
    InvalidEmbedding(#[from] EmbeddingError),
    #[error("stored embedding for {identity} is corrupt: {source}")]
    Corrupt {
        identity: Identity,
        source: EmbeddingError,
    },
    #[error("database holds {stored}-dimensional embeddings, configured for {configured}")]
    DimensionConflict { stored: usize, configured: usize },
}

impl From<SqliteStoreError> for StoreError {
    fn from(e: SqliteStoreError) -> Self {
        match e {
            SqliteStoreError::InvalidEmbedding(inner) => StoreError::InvalidEmbedding(inner),
            SqliteStoreError::UnknownIdentity(identity) => StoreError::UnknownIdentity(identity),
            other => StoreError::Backend(Box::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, SqliteStoreError>;

/// A registered user as listed by the store.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: Identity,
    pub username: String,
    pub enrolled: bool,
    pub enrolled_at: Option<String>,
    pub created_at: String,
}

struct Inner {
    conn: Connection,
    /// Last snapshot read, keyed by `PRAGMA data_version`.
    cached: Option<(i64, Arc<Snapshot>)>,
    /// Bumped on every reload; stamped onto the snapshot.
    generation: u64,
}

/// SQLite-backed user store.
///
/// The connection sits behind a mutex, so writes from this process are
/// applied in arrival order. Snapshots are cached until either this store
/// writes or another connection commits (detected via `data_version`).
pub struct SqliteStore {
    inner: Mutex<Inner>,
    dimension: usize,
}

impl SqliteStore {
    /// Open (or create) the store at `path` for `dimension`-sized embeddings.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        check_dimension(dimension)?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn, dimension)?;
        tracing::info!(path = %path.display(), dimension, "user store opened");
        Ok(store)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self> {
        check_dimension(dimension)?;
        schema::init_schema(&conn)?;
        match schema::stored_dimension(&conn)? {
            Some(stored) if stored != dimension => {
                return Err(SqliteStoreError::DimensionConflict {
                    stored,
                    configured: dimension,
                });
            }
            Some(_) => {}
            None => schema::record_dimension(&conn, dimension)?,
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                cached: None,
                generation: 0,
            }),
            dimension,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a user record with no embedding.
    pub fn register(&self, username: &str) -> Result<Identity> {
        let id = Identity::new(uuid::Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        let inner = self.lock();
        let inserted = inner.conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![id.as_str(), username, now],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(SqliteStoreError::UsernameTaken(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(identity = %id, username, "user registered");
        Ok(id)
    }

    /// Replace the user's embedding. The user must be registered.
    pub fn set_embedding(&self, identity: &Identity, embedding: &Embedding) -> Result<()> {
        embedding.validate(self.dimension)?;
        let blob = encode_binary(embedding);
        let now = Utc::now().to_rfc3339();

        let mut inner = self.lock();
        let changed = inner.conn.execute(
            "UPDATE users SET face_encoding = ?1, enrolled_at = ?2 WHERE id = ?3",
            params![blob, now, identity.as_str()],
        )?;
        if changed == 0 {
            return Err(SqliteStoreError::UnknownIdentity(identity.clone()));
        }
        inner.cached = None;

        tracing::debug!(identity = %identity, "embedding persisted");
        Ok(())
    }

    /// Delete the user record, and with it the embedding.
    pub fn remove(&self, identity: &Identity) -> Result<bool> {
        let mut inner = self.lock();
        let deleted = inner
            .conn
            .execute("DELETE FROM users WHERE id = ?1", [identity.as_str()])?;
        inner.cached = None;
        if deleted > 0 {
            tracing::info!(identity = %identity, "user removed");
        }
        Ok(deleted > 0)
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        let inner = self.lock();
        let id: Option<String> = inner
            .conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(Identity::from))
    }

    pub fn username(&self, identity: &Identity) -> Result<Option<String>> {
        let inner = self.lock();
        Ok(inner
            .conn
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                [identity.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn embedding(&self, identity: &Identity) -> Result<Option<Embedding>> {
        let inner = self.lock();
        let blob: Option<Option<Vec<u8>>> = inner
            .conn
            .query_row(
                "SELECT face_encoding FROM users WHERE id = ?1",
                [identity.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            None => Err(SqliteStoreError::UnknownIdentity(identity.clone())),
            Some(None) => Ok(None),
            Some(Some(bytes)) => decode_binary(&bytes, self.dimension)
                .map(Some)
                .map_err(|source| SqliteStoreError::Corrupt {
                    identity: identity.clone(),
                    source,
                }),
        }
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, username, face_encoding IS NOT NULL, enrolled_at, created_at
             FROM users ORDER BY username",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                id: Identity::new(row.get::<_, String>(0)?),
                username: row.get(1)?,
                enrolled: row.get(2)?,
                enrolled_at: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn load_snapshot(&self) -> Result<Arc<Snapshot>> {
        let mut inner = self.lock();
        let version: i64 = inner
            .conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))?;

        if let Some((cached_version, snapshot)) = &inner.cached {
            if *cached_version == version {
                return Ok(Arc::clone(snapshot));
            }
        }

        let rows: Vec<(String, Vec<u8>)> = {
            let mut stmt = inner.conn.prepare(
                "SELECT id, face_encoding FROM users WHERE face_encoding IS NOT NULL ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut pairs = Vec::with_capacity(rows.len());
        for (id, blob) in rows {
            let identity = Identity::new(id);
            match decode_binary(&blob, self.dimension) {
                Ok(embedding) => pairs.push((identity, embedding)),
                Err(source) => {
                    tracing::error!(identity = %identity, error = %source, "corrupt stored embedding");
                    return Err(SqliteStoreError::Corrupt { identity, source });
                }
            }
        }

        inner.generation += 1;
        let snapshot =
            Arc::new(Snapshot::from_pairs(self.dimension, pairs)?.with_generation(inner.generation));
        tracing::debug!(
            enrolled = snapshot.len(),
            version,
            generation = inner.generation,
            "snapshot loaded"
        );
        inner.cached = Some((version, Arc::clone(&snapshot)));
        Ok(snapshot)
    }
}

impl EmbeddingStore for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn put(&self, identity: &Identity, embedding: Embedding) -> std::result::Result<(), StoreError> {
        Ok(self.set_embedding(identity, &embedding)?)
    }

    fn snapshot(&self) -> std::result::Result<Arc<Snapshot>, StoreError> {
        Ok(self.load_snapshot()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{enroll, LinearMatcher, MatchDecision, Matcher};

    fn emb(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec())
    }

    #[test]
    fn test_register_starts_without_embedding() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let id = store.register("alice").unwrap();
        assert_eq!(store.embedding(&id).unwrap(), None);
        assert!(store.snapshot().unwrap().is_empty());

        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert!(!users[0].enrolled);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store.register("alice").unwrap();
        assert!(matches!(
            store.register("alice"),
            Err(SqliteStoreError::UsernameTaken(name)) if name == "alice"
        ));
    }

    #[test]
    fn test_enroll_then_snapshot() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let id = store.register("alice").unwrap();
        enroll(&store, &id, emb(&[0.5, -0.5])).unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.get(&id), Some(&emb(&[0.5, -0.5])));
        assert!(store.list_users().unwrap()[0].enrolled);
    }

    #[test]
    fn test_reenroll_overwrites_and_invalidates_cache() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let id = store.register("alice").unwrap();
        store.put(&id, emb(&[1.0, 1.0])).unwrap();
        let first = store.snapshot().unwrap();
        store.put(&id, emb(&[2.0, 2.0])).unwrap();
        let second = store.snapshot().unwrap();

        assert_eq!(first.get(&id), Some(&emb(&[1.0, 1.0])));
        assert_eq!(second.get(&id), Some(&emb(&[2.0, 2.0])));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_snapshot_cached_between_writes() {
        let store = SqliteStore::open_in_memory(1).unwrap();
        let id = store.register("alice").unwrap();
        store.put(&id, emb(&[1.0])).unwrap();
        let a = store.snapshot().unwrap();
        let b = store.snapshot().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_generation_advances_on_reload() {
        let store = SqliteStore::open_in_memory(1).unwrap();
        let id = store.register("alice").unwrap();
        let g1 = store.snapshot().unwrap().generation();
        assert_eq!(store.snapshot().unwrap().generation(), g1);
        store.put(&id, emb(&[1.0])).unwrap();
        assert!(store.snapshot().unwrap().generation() > g1);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            SqliteStore::open_in_memory(0),
            Err(SqliteStoreError::InvalidEmbedding(EmbeddingError::InvalidDimension { dimension: 0 }))
        ));
    }

    #[test]
    fn test_username_lookup() {
        let store = SqliteStore::open_in_memory(1).unwrap();
        let id = store.register("alice").unwrap();
        assert_eq!(store.username(&id).unwrap().as_deref(), Some("alice"));
        assert_eq!(store.username(&"ghost".into()).unwrap(), None);
    }

    #[test]
    fn test_put_unknown_identity() {
        let store = SqliteStore::open_in_memory(1).unwrap();
        let err = store.put(&"ghost".into(), emb(&[1.0])).unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentity(id) if id.as_str() == "ghost"));
    }

    #[test]
    fn test_put_wrong_dimension() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        let id = store.register("alice").unwrap();
        let err = store.put(&id, emb(&[1.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidEmbedding(EmbeddingError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert_eq!(store.embedding(&id).unwrap(), None);
    }

    #[test]
    fn test_corrupt_row_fails_snapshot() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let id = store.register("alice").unwrap();
        store
            .lock()
            .conn
            .execute(
                "UPDATE users SET face_encoding = ?1 WHERE id = ?2",
                params![vec![0u8; 5], id.as_str()],
            )
            .unwrap();

        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, SqliteStoreError::Corrupt { .. }));
    }

    #[test]
    fn test_remove_drops_embedding() {
        let store = SqliteStore::open_in_memory(1).unwrap();
        let id = store.register("alice").unwrap();
        store.put(&id, emb(&[1.0])).unwrap();
        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.find_by_username("alice").unwrap().is_none());
    }

    #[test]
    fn test_match_against_persisted_faces() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let u1 = store.register("u1").unwrap();
        let u2 = store.register("u2").unwrap();
        store.put(&u1, emb(&[0.0, 0.0, 0.0, 0.0])).unwrap();
        store.put(&u2, emb(&[1.0, 1.0, 1.0, 1.0])).unwrap();

        let snap = store.snapshot().unwrap();
        let decision = LinearMatcher
            .find_match(&emb(&[0.0, 0.0, 0.0, 0.3]), &snap, 0.6)
            .unwrap();
        assert_eq!(decision.identity(), Some(&u1));
        assert_eq!(
            LinearMatcher.find_match(&emb(&[0.5, 0.5, 0.5, 0.5]), &snap, 0.6).unwrap(),
            MatchDecision::NoMatch
        );
    }

    #[test]
    fn test_sees_writes_from_another_connection() {
        let dir = std::env::temp_dir().join(format!("facegate-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("faces.db");
        let writer = SqliteStore::open(&path, 2).unwrap();
        let reader = SqliteStore::open(&path, 2).unwrap();

        let id = writer.register("alice").unwrap();
        writer.put(&id, emb(&[1.0, 1.0])).unwrap();
        let before = reader.snapshot().unwrap();
        assert_eq!(before.get(&id), Some(&emb(&[1.0, 1.0])));
        assert!(Arc::ptr_eq(&before, &reader.snapshot().unwrap()));

        writer.put(&id, emb(&[2.0, 2.0])).unwrap();
        let after = reader.snapshot().unwrap();
        assert_eq!(after.get(&id), Some(&emb(&[2.0, 2.0])));
        assert!(after.generation() > before.generation());

        drop(writer);
        drop(reader);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_reopen_with_other_dimension_rejected() {
        let dir = std::env::temp_dir().join(format!("facegate-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("faces.db");
        {
            let store = SqliteStore::open(&path, 4).unwrap();
            let id = store.register("alice").unwrap();
            store.put(&id, emb(&[0.1, 0.2, 0.3, 0.4])).unwrap();
        }
        {
            let store = SqliteStore::open(&path, 4).unwrap();
            let id = store.find_by_username("alice").unwrap().unwrap();
            assert_eq!(store.embedding(&id).unwrap(), Some(emb(&[0.1, 0.2, 0.3, 0.4])));
        }
        assert!(matches!(
            SqliteStore::open(&path, 128),
            Err(SqliteStoreError::DimensionConflict { stored: 4, configured: 128 })
        ));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
