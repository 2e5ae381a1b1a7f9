//! Shared in-memory fakes for the integration suites.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use voltgate::application::repos::{AuditRepo, PowerUnitsRepo, RepoError, UsersRepo};
use voltgate::application::sessions::{SessionClaims, SessionError, SessionProvider};
use voltgate::cache::{GuardedStore, StoreStats, ValueStore, glob_to_regex};
use voltgate::domain::entities::{AuditEventRecord, PowerUnitRecord, UserRecord};
use voltgate::domain::types::{PowerUnitStatus, Role};
use voltgate::resilience::{
    BreakerConfig, BreakerRegistry, RetryExecutor, RetryPolicy, TransientError,
};

// ---------------------------------------------------------------------------
// Key-value store fakes
// ---------------------------------------------------------------------------

enum Stored {
    Value(String),
    Set(HashSet<String>),
}

struct StoredEntry {
    data: Stored,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// In-memory [`ValueStore`] with TTLs driven by the tokio clock, so paused
/// tests can advance time deterministically.
#[derive(Default)]
pub struct FakeValueStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl FakeValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, StoredEntry>,
        key: &str,
    ) -> Option<&'a mut StoredEntry> {
        if entries.get(key).is_some_and(StoredEntry::is_expired) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl ValueStore for FakeValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        match Self::live_entry(&mut entries, key) {
            Some(StoredEntry {
                data: Stored::Value(value),
                ..
            }) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TransientError> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            StoredEntry {
                data: Stored::Value(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, TransientError> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64, TransientError> {
        let regex = glob_to_regex(pattern)
            .map_err(|err| TransientError::Other(err.to_string()))?;
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<String> = entries
            .keys()
            .filter(|key| regex.is_match(key))
            .cloned()
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(Self::live_entry(&mut entries, key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(Self::live_entry(&mut entries, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn incr(&self, key: &str) -> Result<i64, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        let next = match Self::live_entry(&mut entries, key) {
            Some(StoredEntry {
                data: Stored::Value(value),
                ..
            }) => value.parse::<i64>().unwrap_or(0) + 1,
            _ => 1,
        };
        // INCR keeps any existing expiry.
        let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
        entries.insert(
            key.to_string(),
            StoredEntry {
                data: Stored::Value(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        match Self::live_entry(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), TransientError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).is_some_and(StoredEntry::is_expired) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| StoredEntry {
            data: Stored::Set(HashSet::new()),
            expires_at: None,
        });
        if let Stored::Set(members) = &mut entry.data {
            members.insert(member.to_string());
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, TransientError> {
        let mut entries = self.entries.lock().unwrap();
        match Self::live_entry(&mut entries, key) {
            Some(StoredEntry {
                data: Stored::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn stats(&self) -> Result<StoreStats, TransientError> {
        Ok(StoreStats {
            connected: true,
            memory_used_bytes: None,
            key_count: self.entries.lock().unwrap().len() as u64,
        })
    }
}

/// Delegates to a [`FakeValueStore`] but fails every call while `fail` is
/// set; counts invocations so tests can assert an open breaker short-circuits.
pub struct FlakyStore {
    pub inner: FakeValueStore,
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: FakeValueStore::new(),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), TransientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(TransientError::Timeout("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TransientError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TransientError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, TransientError> {
        self.check()?;
        self.inner.del(key).await
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64, TransientError> {
        self.check()?;
        self.inner.del_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool, TransientError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, TransientError> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64, TransientError> {
        self.check()?;
        self.inner.incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, TransientError> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), TransientError> {
        self.check()?;
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, TransientError> {
        self.check()?;
        self.inner.smembers(key).await
    }

    async fn stats(&self) -> Result<StoreStats, TransientError> {
        self.check()?;
        self.inner.stats().await
    }
}

/// Guarded store over `store` with no retries and a breaker that effectively
/// never opens, so cache tests exercise the layers without breaker coupling.
pub fn guarded(store: Arc<dyn ValueStore>) -> Arc<GuardedStore> {
    guarded_with_breaker(store, u32::MAX)
}

pub fn guarded_with_breaker(store: Arc<dyn ValueStore>, threshold: u32) -> Arc<GuardedStore> {
    let registry = BreakerRegistry::new(BreakerConfig {
        failure_threshold: threshold,
        recovery_timeout: Duration::from_secs(30),
        ignored: Vec::new(),
    });
    let policy = RetryPolicy {
        max_attempts: 1,
        jitter: false,
        ..RetryPolicy::default()
    };
    Arc::new(GuardedStore::new(
        store,
        registry.breaker("cache-store"),
        Arc::new(RetryExecutor::new()),
        policy,
        "test",
    ))
}

// ---------------------------------------------------------------------------
// Auth fakes
// ---------------------------------------------------------------------------

pub fn password_hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("hashing succeeds")
        .to_string()
}

pub fn user(email: &str, role: Option<Role>, password: &str) -> UserRecord {
    UserRecord {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: email.split('@').next().unwrap_or("user").to_string(),
        role,
        password_hash: Some(password_hash(password)),
        is_deleted: false,
        created_at: OffsetDateTime::now_utc(),
        updated_at: OffsetDateTime::now_utc(),
    }
}

#[derive(Default)]
pub struct FakeUsers {
    users: Mutex<HashMap<Uuid, UserRecord>>,
    pub fail: AtomicBool,
}

impl FakeUsers {
    pub fn with(users: Vec<UserRecord>) -> Arc<Self> {
        let map = users.into_iter().map(|u| (u.id, u)).collect();
        Arc::new(Self {
            users: Mutex::new(map),
            fail: AtomicBool::new(false),
        })
    }

    pub fn upsert(&self, record: UserRecord) {
        self.users.lock().unwrap().insert(record.id, record);
    }

    pub fn set_role(&self, id: Uuid, role: Option<Role>) {
        if let Some(record) = self.users.lock().unwrap().get_mut(&id) {
            record.role = role;
        }
    }
}

#[async_trait]
impl UsersRepo for FakeUsers {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("users table on fire".to_string()));
        }
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("users table on fire".to_string()));
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|record| record.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeSessions {
    sessions: Mutex<HashMap<String, SessionClaims>>,
    counter: AtomicU32,
    pub fail: AtomicBool,
}

impl FakeSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a session directly, bypassing login.
    pub fn insert(&self, token: &str, claims: SessionClaims) {
        self.sessions
            .lock()
            .unwrap()
            .insert(token.to_string(), claims);
    }
}

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn get_session(&self, token: &str) -> Result<Option<SessionClaims>, SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError("session backend down".to_string()));
        }
        Ok(self.sessions.lock().unwrap().get(token).cloned())
    }

    async fn issue(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError("session backend down".to_string()));
        }
        let token = format!("token-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.insert(&token, claims.clone());
        Ok(token)
    }

    async fn revoke(&self, token: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.lock().unwrap().remove(token).is_some())
    }
}

#[derive(Default)]
pub struct FakeAudit {
    pub events: Mutex<Vec<AuditEventRecord>>,
    pub fail: AtomicBool,
}

impl FakeAudit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditRepo for FakeAudit {
    async fn append_event(&self, record: AuditEventRecord) -> Result<(), RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("audit sink down".to_string()));
        }
        self.events.lock().unwrap().push(record);
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEventRecord>, RepoError> {
        let events = self.events.lock().unwrap();
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeUnits {
    pub units: Mutex<Vec<PowerUnitRecord>>,
    pub list_calls: AtomicU32,
}

impl FakeUnits {
    pub fn with(units: Vec<PowerUnitRecord>) -> Arc<Self> {
        Arc::new(Self {
            units: Mutex::new(units),
            list_calls: AtomicU32::new(0),
        })
    }
}

pub fn unit(name: &str, status: PowerUnitStatus) -> PowerUnitRecord {
    PowerUnitRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        site: "north-yard".to_string(),
        status,
        output_kw: 1500.0,
        updated_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait]
impl PowerUnitsRepo for FakeUnits {
    async fn list_units(&self) -> Result<Vec<PowerUnitRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.units.lock().unwrap().clone())
    }

    async fn find_unit(&self, id: Uuid) -> Result<Option<PowerUnitRecord>, RepoError> {
        Ok(self
            .units
            .lock()
            .unwrap()
            .iter()
            .find(|unit| unit.id == id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PowerUnitStatus,
        output_kw: Option<f64>,
    ) -> Result<PowerUnitRecord, RepoError> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .iter_mut()
            .find(|unit| unit.id == id)
            .ok_or(RepoError::NotFound)?;
        unit.status = status;
        if let Some(output_kw) = output_kw {
            unit.output_kw = output_kw;
        }
        unit.updated_at = OffsetDateTime::now_utc();
        Ok(unit.clone())
    }
}
