use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::models::Session;
use crate::services::error::AuthError;

/// Session lifetime and fan-out limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub max_sessions_per_principal: usize,
    /// Sliding lifetime of a session, extended on every rotation.
    pub session_ttl: Duration,
    /// How long a revoked session id stays in the revocation set. Must be at
    /// least the access token lifetime.
    pub revocation_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_sessions_per_principal: 5,
            session_ttl: Duration::days(30),
            revocation_ttl: Duration::minutes(15),
        }
    }
}

/// New state written by a successful refresh rotation.
#[derive(Debug, Clone)]
pub struct RefreshRotation {
    pub new_hash: String,
    pub access_jti: String,
    pub access_expiry_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub seen_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// Version or hash changed since the caller read the session.
    Conflict,
    Missing,
}

/// Sessions, the revocation set and one-shot claims. All operations must be
/// safe under concurrent callers across instances.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session, evicting the least recently seen sessions of the
    /// principal beyond the cap. Evicted sessions are revoked.
    async fn create_session(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        device_fingerprint: &str,
    ) -> Result<Session, AuthError>;
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError>;
    /// Live sessions ordered least recently seen first.
    async fn list_sessions(&self, principal_id: Uuid) -> Result<Vec<Session>, AuthError>;
    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;
    /// Replace the refresh hash only if version and hash still match.
    async fn compare_and_swap_refresh(
        &self,
        session_id: Uuid,
        expected_version: u64,
        expected_hash: &str,
        rotation: &RefreshRotation,
    ) -> Result<SwapOutcome, AuthError>;
    /// Delete the session and add its id and current access jti to the
    /// revocation set. Returns the removed session, if any.
    async fn revoke_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError>;
    async fn revoke(&self, id: &str, ttl: Duration) -> Result<(), AuthError>;
    async fn is_revoked(&self, id: &str) -> Result<bool, AuthError>;
    async fn any_revoked(&self, ids: &[&str]) -> Result<bool, AuthError>;
    /// Set-if-absent with expiry. True only for the first caller per key.
    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, AuthError>;
    async fn health_check(&self) -> Result<(), AuthError>;
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.num_seconds().max(1)
}

fn session_key(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

fn index_key(principal_id: Uuid) -> String {
    format!("principal_sessions:{}", principal_id)
}

fn revoked_key(id: &str) -> String {
    format!("revoked:{}", id)
}

// KEYS: session hash, principal index
// ARGV: expected version, expected hash, new hash, access jti, access expiry,
//       session expiry, last seen, ttl secs, last seen score, session id
static SWAP_REFRESH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local cur = redis.call('HMGET', KEYS[1], 'version', 'refresh_token_hash')
if cur[1] ~= ARGV[1] or cur[2] ~= ARGV[2] then
  return -1
end
redis.call('HSET', KEYS[1],
  'refresh_token_hash', ARGV[3],
  'version', tostring(tonumber(ARGV[1]) + 1),
  'access_jti', ARGV[4],
  'access_expiry_utc', ARGV[5],
  'expiry_utc', ARGV[6],
  'last_seen_utc', ARGV[7])
redis.call('EXPIRE', KEYS[1], ARGV[8])
redis.call('ZADD', KEYS[2], ARGV[9], ARGV[10])
redis.call('EXPIRE', KEYS[2], ARGV[8])
return 1
"#,
    )
});

// KEYS: session hash, principal index
// ARGV: last seen, score, session id
static TOUCH: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'last_seen_utc', ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
return 1
"#,
    )
});

#[derive(Clone)]
pub struct RedisSessionStore {
    _client: Client,
    manager: ConnectionManager,
    policy: SessionPolicy,
}

impl RedisSessionStore {
    pub async fn new(
        config: &crate::config::RedisConfig,
        policy: SessionPolicy,
    ) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            policy,
        })
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        Session::from_fields(&fields).map(Some)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create_session(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        device_fingerprint: &str,
    ) -> Result<Session, AuthError> {
        let session = Session::new(
            principal_id,
            tenant_id,
            device_fingerprint.to_string(),
            self.policy.session_ttl,
        );
        let key = session_key(session.session_id);
        let index = index_key(principal_id);
        let ttl = ttl_secs(self.policy.session_ttl);

        let mut hset = redis::cmd("HSET");
        hset.arg(&key);
        for (field, value) in session.to_fields() {
            hset.arg(field).arg(value);
        }

        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .add_command(hset)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl)
            .ignore()
            .cmd("ZADD")
            .arg(&index)
            .arg(session.last_seen_utc.timestamp_millis())
            .arg(session.session_id.to_string())
            .ignore()
            .cmd("EXPIRE")
            .arg(&index)
            .arg(ttl)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        let live = self.list_sessions(principal_id).await?;
        let excess = live.len().saturating_sub(self.policy.max_sessions_per_principal);
        for evicted in live
            .iter()
            .filter(|s| s.session_id != session.session_id)
            .take(excess)
        {
            tracing::info!(
                principal_id = %principal_id,
                session_id = %evicted.session_id,
                "Evicting least recently used session"
            );
            self.revoke_session(evicted.session_id).await?;
        }

        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        self.load(session_id).await
    }

    async fn list_sessions(&self, principal_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let mut conn = self.manager.clone();
        let index = index_key(principal_id);
        let ids: Vec<String> = redis::cmd("ZRANGE")
            .arg(&index)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            let loaded = match Uuid::parse_str(&id) {
                Ok(session_id) => self.load(session_id).await?,
                Err(_) => None,
            };
            match loaded {
                Some(session) => sessions.push(session),
                None => {
                    // Session hash expired on its own; drop the stale index entry
                    redis::cmd("ZREM")
                        .arg(&index)
                        .arg(&id)
                        .query_async::<_, ()>(&mut conn)
                        .await?;
                }
            }
        }

        sessions.sort_by_key(|s| (s.last_seen_utc, s.created_utc));
        Ok(sessions)
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(session) = self.load(session_id).await? else {
            return Ok(());
        };
        let mut conn = self.manager.clone();
        TOUCH
            .key(session_key(session_id))
            .key(index_key(session.principal_id))
            .arg(at.to_rfc3339())
            .arg(at.timestamp_millis())
            .arg(session_id.to_string())
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn compare_and_swap_refresh(
        &self,
        session_id: Uuid,
        expected_version: u64,
        expected_hash: &str,
        rotation: &RefreshRotation,
    ) -> Result<SwapOutcome, AuthError> {
        let Some(session) = self.load(session_id).await? else {
            return Ok(SwapOutcome::Missing);
        };

        let ttl = (rotation.expiry_utc - rotation.seen_utc).num_seconds().max(1);
        let mut conn = self.manager.clone();
        let result: i64 = SWAP_REFRESH
            .key(session_key(session_id))
            .key(index_key(session.principal_id))
            .arg(expected_version.to_string())
            .arg(expected_hash)
            .arg(&rotation.new_hash)
            .arg(&rotation.access_jti)
            .arg(rotation.access_expiry_utc.to_rfc3339())
            .arg(rotation.expiry_utc.to_rfc3339())
            .arg(rotation.seen_utc.to_rfc3339())
            .arg(ttl)
            .arg(rotation.seen_utc.timestamp_millis())
            .arg(session_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            1 => SwapOutcome::Swapped,
            0 => SwapOutcome::Missing,
            _ => SwapOutcome::Conflict,
        })
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.load(session_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(revoked_key(&session_id.to_string()))
            .arg("revoked")
            .arg("EX")
            .arg(ttl_secs(self.policy.revocation_ttl))
            .ignore();
        if let (Some(jti), Some(exp)) = (&session.access_jti, session.access_expiry_utc) {
            if exp > now {
                pipe.cmd("SET")
                    .arg(revoked_key(jti))
                    .arg("revoked")
                    .arg("EX")
                    .arg(ttl_secs(exp - now))
                    .ignore();
            }
        }
        pipe.cmd("DEL")
            .arg(session_key(session_id))
            .ignore()
            .cmd("ZREM")
            .arg(index_key(session.principal_id))
            .arg(session_id.to_string())
            .ignore();

        let mut conn = self.manager.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(Some(session))
    }

    async fn revoke(&self, id: &str, ttl: Duration) -> Result<(), AuthError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(revoked_key(id))
            .arg("revoked")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, AuthError> {
        self.any_revoked(&[id]).await
    }

    async fn any_revoked(&self, ids: &[&str]) -> Result<bool, AuthError> {
        if ids.is_empty() {
            return Ok(false);
        }
        let mut cmd = redis::cmd("EXISTS");
        for id in ids {
            cmd.arg(revoked_key(id));
        }
        let mut conn = self.manager.clone();
        let count: i64 = cmd.query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, AuthError> {
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(format!("once:{}", key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Writes between sweeps of expired in-memory entries.
const SWEEP_INTERVAL: u64 = 256;

/// Process-local session store for tests and single-instance deployments.
///
/// Expiry mirrors Redis TTLs: reads ignore expired entries, and every
/// `SWEEP_INTERVAL` writes drop them.
pub struct InMemorySessionStore {
    policy: SessionPolicy,
    sessions: DashMap<Uuid, Session>,
    revoked: DashMap<String, DateTime<Utc>>,
    claims: DashMap<String, DateTime<Utc>>,
    writes: AtomicU64,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            sessions: DashMap::new(),
            revoked: DashMap::new(),
            claims: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Remove expired sessions, revocations and claims. Returns how many
    /// entries were dropped.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len() + self.revoked.len() + self.claims.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        self.revoked.retain(|_, until| *until > now);
        self.claims.retain(|_, until| *until > now);
        let after = self.sessions.len() + self.revoked.len() + self.claims.len();
        let dropped = before.saturating_sub(after);
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned expired session store entries");
        }
        dropped
    }

    // Must not be called while holding a guard into any of the maps
    fn note_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.prune_expired(Utc::now());
        }
    }

    fn live_sessions(&self, principal_id: Uuid, now: DateTime<Utc>) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.principal_id == principal_id && !s.is_expired(now))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by_key(|s| (s.last_seen_utc, s.created_utc));
        sessions
    }

    fn mark_revoked(&self, id: &str, until: DateTime<Utc>) {
        self.revoked
            .entry(id.to_string())
            .and_modify(|t| *t = (*t).max(until))
            .or_insert(until);
        self.note_write();
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        principal_id: Uuid,
        tenant_id: Uuid,
        device_fingerprint: &str,
    ) -> Result<Session, AuthError> {
        let session = Session::new(
            principal_id,
            tenant_id,
            device_fingerprint.to_string(),
            self.policy.session_ttl,
        );
        self.sessions.insert(session.session_id, session.clone());
        self.note_write();

        let live = self.live_sessions(principal_id, Utc::now());
        let excess = live.len().saturating_sub(self.policy.max_sessions_per_principal);
        for evicted in live
            .iter()
            .filter(|s| s.session_id != session.session_id)
            .take(excess)
        {
            tracing::info!(
                principal_id = %principal_id,
                session_id = %evicted.session_id,
                "Evicting least recently used session"
            );
            self.revoke_session(evicted.session_id).await?;
        }

        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let now = Utc::now();
        let session = self.sessions.get(&session_id).map(|s| s.value().clone());
        match session {
            Some(s) if s.is_expired(now) => {
                self.sessions.remove(&session_id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn list_sessions(&self, principal_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self.live_sessions(principal_id, Utc::now()))
    }

    async fn touch(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if at > session.last_seen_utc {
                session.last_seen_utc = at;
            }
        }
        Ok(())
    }

    async fn compare_and_swap_refresh(
        &self,
        session_id: Uuid,
        expected_version: u64,
        expected_hash: &str,
        rotation: &RefreshRotation,
    ) -> Result<SwapOutcome, AuthError> {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return Ok(SwapOutcome::Missing);
        };
        if session.is_expired(rotation.seen_utc) {
            return Ok(SwapOutcome::Missing);
        }
        if session.version != expected_version || session.refresh_token_hash != expected_hash {
            return Ok(SwapOutcome::Conflict);
        }

        session.refresh_token_hash = rotation.new_hash.clone();
        session.version += 1;
        session.access_jti = Some(rotation.access_jti.clone());
        session.access_expiry_utc = Some(rotation.access_expiry_utc);
        session.expiry_utc = rotation.expiry_utc;
        session.last_seen_utc = rotation.seen_utc;
        Ok(SwapOutcome::Swapped)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        self.mark_revoked(&session_id.to_string(), now + self.policy.revocation_ttl);
        if let (Some(jti), Some(exp)) = (&session.access_jti, session.access_expiry_utc) {
            if exp > now {
                self.mark_revoked(jti, exp);
            }
        }
        Ok(Some(session))
    }

    async fn revoke(&self, id: &str, ttl: Duration) -> Result<(), AuthError> {
        self.mark_revoked(id, Utc::now() + ttl);
        Ok(())
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, AuthError> {
        let now = Utc::now();
        Ok(self.revoked.get(id).map(|until| *until > now).unwrap_or(false))
    }

    async fn any_revoked(&self, ids: &[&str]) -> Result<bool, AuthError> {
        for id in ids {
            if self.is_revoked(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, AuthError> {
        use dashmap::mapref::entry::Entry;

        let now = Utc::now();
        let claimed = match self.claims.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if *e.get() > now {
                    false
                } else {
                    e.insert(now + ttl);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now + ttl);
                true
            }
        };
        if claimed {
            self.note_write();
        }
        Ok(claimed)
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(new_hash: &str) -> RefreshRotation {
        let now = Utc::now();
        RefreshRotation {
            new_hash: new_hash.to_string(),
            access_jti: Uuid::new_v4().to_string(),
            access_expiry_utc: now + Duration::minutes(15),
            expiry_utc: now + Duration::days(30),
            seen_utc: now,
        }
    }

    #[tokio::test]
    async fn test_cas_requires_matching_version_and_hash() {
        let store = InMemorySessionStore::default();
        let session = store
            .create_session(Uuid::new_v4(), Uuid::new_v4(), "dev")
            .await
            .unwrap();
        let sid = session.session_id;

        let outcome = store
            .compare_and_swap_refresh(sid, 0, "", &rotation("h1"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Swapped);

        // Stale version
        let outcome = store
            .compare_and_swap_refresh(sid, 0, "h1", &rotation("h2"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Conflict);

        // Stale hash
        let outcome = store
            .compare_and_swap_refresh(sid, 1, "", &rotation("h2"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Conflict);

        let outcome = store
            .compare_and_swap_refresh(sid, 1, "h1", &rotation("h2"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Swapped);

        let stored = store.get_session(sid).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.refresh_token_hash, "h2");

        let outcome = store
            .compare_and_swap_refresh(Uuid::new_v4(), 0, "", &rotation("x"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Missing);
    }

    #[tokio::test]
    async fn test_session_cap_evicts_least_recently_seen() {
        let store = InMemorySessionStore::new(SessionPolicy {
            max_sessions_per_principal: 2,
            ..SessionPolicy::default()
        });
        let principal = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        let first = store.create_session(principal, tenant, "a").await.unwrap();
        let second = store.create_session(principal, tenant, "b").await.unwrap();
        // Touching the first makes the second the eviction candidate
        store
            .touch(first.session_id, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        let third = store.create_session(principal, tenant, "c").await.unwrap();

        let live: Vec<Uuid> = store
            .list_sessions(principal)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(live.len(), 2);
        assert!(live.contains(&first.session_id));
        assert!(live.contains(&third.session_id));
        assert!(store
            .is_revoked(&second.session_id.to_string())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_revoke_session_marks_access_jti() {
        let store = InMemorySessionStore::default();
        let session = store
            .create_session(Uuid::new_v4(), Uuid::new_v4(), "dev")
            .await
            .unwrap();
        let rot = rotation("h1");
        store
            .compare_and_swap_refresh(session.session_id, 0, "", &rot)
            .await
            .unwrap();

        let removed = store.revoke_session(session.session_id).await.unwrap();
        assert!(removed.is_some());
        assert!(store.is_revoked(&rot.access_jti).await.unwrap());
        assert!(store
            .any_revoked(&["unrelated", &session.session_id.to_string()])
            .await
            .unwrap());
        assert!(store.get_session(session.session_id).await.unwrap().is_none());
        assert!(store.revoke_session(session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revocation_expires() {
        let store = InMemorySessionStore::default();
        store.revoke("jti-1", Duration::seconds(-1)).await.unwrap();
        assert!(!store.is_revoked("jti-1").await.unwrap());
        store.revoke("jti-2", Duration::minutes(5)).await.unwrap();
        assert!(store.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_once() {
        let store = InMemorySessionStore::default();
        assert!(store.claim_once("totp:1", Duration::seconds(90)).await.unwrap());
        assert!(!store.claim_once("totp:1", Duration::seconds(90)).await.unwrap());
        assert!(store.claim_once("totp:2", Duration::seconds(90)).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_drops_only_expired_entries() {
        let store = InMemorySessionStore::default();
        store.revoke("old", Duration::seconds(-1)).await.unwrap();
        store.revoke("live", Duration::minutes(5)).await.unwrap();
        store.claim_once("totp:old", Duration::seconds(-1)).await.unwrap();
        store.claim_once("totp:live", Duration::seconds(90)).await.unwrap();

        assert_eq!(store.prune_expired(Utc::now()), 2);
        assert_eq!(store.revoked.len(), 1);
        assert_eq!(store.claims.len(), 1);
        assert!(store.is_revoked("live").await.unwrap());
        assert!(!store.claim_once("totp:live", Duration::seconds(90)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_revocations_are_swept_on_write() {
        let store = InMemorySessionStore::default();
        for i in 0..SWEEP_INTERVAL {
            store
                .revoke(&format!("jti-{}", i), Duration::seconds(-1))
                .await
                .unwrap();
        }
        assert!(store.revoked.is_empty());

        for i in 0..SWEEP_INTERVAL {
            store
                .claim_once(&format!("totp:{}", i), Duration::seconds(-1))
                .await
                .unwrap();
        }
        assert!(store.claims.is_empty());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept() {
        let policy = SessionPolicy {
            session_ttl: Duration::seconds(-1),
            ..SessionPolicy::default()
        };
        let store = InMemorySessionStore::new(policy);
        for _ in 0..3 {
            store
                .create_session(Uuid::new_v4(), Uuid::new_v4(), "dev")
                .await
                .unwrap();
        }
        assert_eq!(store.sessions.len(), 3);

        assert_eq!(store.prune_expired(Utc::now()), 3);
        assert!(store.sessions.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_redis_round_trip() {
        let config = crate::config::RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        };
        let store = RedisSessionStore::new(&config, SessionPolicy::default())
            .await
            .unwrap();
        store.health_check().await.unwrap();

        let session = store
            .create_session(Uuid::new_v4(), Uuid::new_v4(), "dev")
            .await
            .unwrap();
        let outcome = store
            .compare_and_swap_refresh(session.session_id, 0, "", &rotation("h1"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Swapped);
        let outcome = store
            .compare_and_swap_refresh(session.session_id, 0, "", &rotation("h2"))
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Conflict);

        store.revoke_session(session.session_id).await.unwrap();
        assert!(store
            .is_revoked(&session.session_id.to_string())
            .await
            .unwrap());
    }
}
