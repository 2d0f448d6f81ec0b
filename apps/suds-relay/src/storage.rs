use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use suds_core::Session;

/// Row storage keyed by session code, with a secondary id index.
///
/// Rows outlive the session TTL so that an expired session stays
/// distinguishable from one that never existed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a fresh row. Returns false when the code is already taken.
    async fn insert_new(&self, session: &Session) -> Result<bool>;
    async fn get_by_code(&self, code: &str) -> Result<Option<Session>>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>>;
    async fn update(&self, session: &Session) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    retention_seconds: u64,
}

impl RedisStore {
    /// `ttl_seconds` is the session TTL; rows are retained for twice that
    /// so lookups past the TTL still find the row and can report it expired.
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self {
            redis,
            retention_seconds: ttl_seconds * 2,
        })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn insert_new(&self, session: &Session) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = code_key(&session.code);
        let value = serde_json::to_string(session)?;

        // SET NX EX: claim the code atomically.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(self.retention_seconds)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }

        conn.set_ex::<_, _, ()>(
            id_key(session.id),
            session.code.clone(),
            self.retention_seconds,
        )
        .await?;

        Ok(true)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Session>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(code_key(code)).await?;

        match value {
            Some(json) => {
                let session = serde_json::from_str(&json)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let mut conn = self.redis.clone();
        let code: Option<String> = conn.get(id_key(id)).await?;

        match code {
            Some(code) => self.get_by_code(&code).await,
            None => Ok(None),
        }
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(session)?;
        conn.set_ex::<_, _, ()>(code_key(&session.code), value, self.retention_seconds)
            .await?;
        conn.expire::<_, ()>(id_key(session.id), self.retention_seconds as i64)
            .await?;
        Ok(())
    }
}

fn code_key(code: &str) -> String {
    format!("session:code:{}", code)
}

fn id_key(id: Uuid) -> String {
    format!("session:id:{}", id)
}

/// In-process store for tests and single-node runs without Redis.
#[derive(Default)]
pub struct MemoryStore {
    by_code: DashMap<String, Session>,
    id_index: DashMap<Uuid, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_new(&self, session: &Session) -> Result<bool> {
        match self.by_code.entry(session.code.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
                self.id_index.insert(session.id, session.code.clone());
                Ok(true)
            }
        }
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Session>> {
        Ok(self.by_code.get(code).map(|row| row.clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        match self.id_index.get(&id) {
            Some(code) => self.get_by_code(&code).await,
            None => Ok(None),
        }
    }

    async fn update(&self, session: &Session) -> Result<()> {
        self.by_code
            .insert(session.code.clone(), session.clone());
        Ok(())
    }
}
