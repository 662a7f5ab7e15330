//! Drives state-machine transitions against the store: read the
//! current record, apply the pure transition, commit with the version
//! check, retry a bounded number of times on conflict, then publish
//! the committed delta to observers.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{
    constants::{INVITE_CODE_BYTES, MAX_TRANSITION_ATTEMPTS, SESSION_ID_BYTES},
    db::Database,
    error::{AppError, Result},
    models::{ForceResolution, Session, Visibility},
    relay::DeltaPublisher,
    state_machine::{self, CreateSession},
};

/// The slice of the session store the transition driver needs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn insert_session(&self, session: &Session) -> Result<Session>;
    /// Version-conditional write; `None` means the record moved and
    /// the caller must re-read.
    async fn put_if_version(
        &self,
        session: &Session,
        expected_version: i64,
    ) -> Result<Option<Session>>;
    async fn list_open_sessions(&self, limit: i64) -> Result<Vec<Session>>;
    async fn insert_admin_audit(
        &self,
        actor: &str,
        session_id: &str,
        action: &str,
        detail: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
impl SessionStore for Database {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Database::get_session(self, session_id).await
    }

    async fn insert_session(&self, session: &Session) -> Result<Session> {
        Database::insert_session(self, session).await
    }

    async fn put_if_version(
        &self,
        session: &Session,
        expected_version: i64,
    ) -> Result<Option<Session>> {
        Database::put_if_version(self, session, expected_version).await
    }

    async fn list_open_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        Database::list_open_sessions(self, limit).await
    }

    async fn insert_admin_audit(
        &self,
        actor: &str,
        session_id: &str,
        action: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        Database::insert_admin_audit(self, actor, session_id, action, detail).await
    }
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    publisher: DeltaPublisher,
    // Serializes commit+publish per session within this process so
    // local observers receive deltas in commit order. Cross-process
    // ordering rides on the store version carried by each delta.
    // Entries live only while a transition is in flight.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, publisher: DeltaPublisher) -> Self {
        Self {
            store,
            publisher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(
        &self,
        first_player: String,
        wager_token: String,
        wager_amount: Decimal,
        visibility: Visibility,
    ) -> Result<Session> {
        let session = state_machine::create(
            CreateSession {
                session_id: hex::encode(rand::random::<[u8; SESSION_ID_BYTES]>()),
                invite_code: hex::encode(rand::random::<[u8; INVITE_CODE_BYTES]>()),
                first_player,
                wager_token,
                wager_amount,
                visibility,
            },
            Utc::now(),
        )?;

        let committed = self.store.insert_session(&session).await?;
        self.publisher.publish_session(&committed).await;
        Ok(committed)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(session_id.to_string()))
    }

    pub async fn list_open(&self, limit: i64) -> Result<Vec<Session>> {
        self.store.list_open_sessions(limit).await
    }

    pub async fn join(
        &self,
        session_id: &str,
        player: &str,
        expected_version: Option<i64>,
    ) -> Result<Session> {
        self.run_transition(session_id, expected_version, |current| {
            state_machine::join(current, player, Utc::now())
        })
        .await
    }

    pub async fn apply_move(
        &self,
        session_id: &str,
        player: &str,
        mv: &str,
        expected_version: Option<i64>,
    ) -> Result<Session> {
        self.run_transition(session_id, expected_version, |current| {
            state_machine::apply_move(current, player, mv, Utc::now())
        })
        .await
    }

    pub async fn resign(
        &self,
        session_id: &str,
        player: &str,
        expected_version: Option<i64>,
    ) -> Result<Session> {
        self.run_transition(session_id, expected_version, |current| {
            state_machine::resign(current, player, Utc::now())
        })
        .await
    }

    pub async fn cancel(
        &self,
        session_id: &str,
        player: &str,
        expected_version: Option<i64>,
    ) -> Result<Session> {
        self.run_transition(session_id, expected_version, |current| {
            state_machine::cancel(current, player, Utc::now())
        })
        .await
    }

    /// Administrative override; every invocation lands in the audit
    /// log with the acting operator.
    pub async fn force_resolve(
        &self,
        session_id: &str,
        resolution: ForceResolution,
        actor: &str,
    ) -> Result<Session> {
        let committed = self
            .run_transition(session_id, None, |current| {
                state_machine::force_resolve(current, resolution, Utc::now())
            })
            .await?;

        let action = match resolution {
            ForceResolution::Refund => "force_refund".to_string(),
            ForceResolution::Outcome(outcome) => format!("force_outcome:{}", outcome.as_str()),
        };
        tracing::warn!(
            "Forced resolution of session {} by {}: {}",
            session_id,
            actor,
            action
        );
        self.store
            .insert_admin_audit(actor, session_id, &action, None)
            .await?;

        Ok(committed)
    }

    /// Read-transition-commit with bounded conflict recovery. The
    /// caller's observed version guards the first attempt; later
    /// attempts re-validate the transition against a fresh read, so
    /// replaying an intent is safe.
    async fn run_transition<F>(
        &self,
        session_id: &str,
        expected_version: Option<i64>,
        transition: F,
    ) -> Result<Session>
    where
        F: Fn(&Session) -> Result<Session>,
    {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.commit_transition(session_id, expected_version, &transition)
                .await
        };
        self.release_session_lock(session_id, &lock);
        result
    }

    async fn commit_transition<F>(
        &self,
        session_id: &str,
        expected_version: Option<i64>,
        transition: &F,
    ) -> Result<Session>
    where
        F: Fn(&Session) -> Result<Session>,
    {
        let mut caller_version = expected_version;
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self
                .store
                .get_session(session_id)
                .await?
                .ok_or_else(|| AppError::NotFound(session_id.to_string()))?;

            let expected = caller_version.take().unwrap_or(current.version);
            if expected != current.version {
                // Stale observation; retry against the fresh read.
                continue;
            }

            let candidate = transition(&current)?;
            if let Some(committed) = self.store.put_if_version(&candidate, expected).await? {
                self.publisher.publish_session(&committed).await;
                return Ok(committed);
            }
        }

        Err(AppError::Conflict)
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Evicts the table entry once no other task holds the lock. The
    /// strong-count check runs under the table mutex, so a task that
    /// cloned the `Arc` concurrently keeps the entry alive.
    fn release_session_lock(&self, session_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        if Arc::strong_count(lock) == 2 {
            locks.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;
    use crate::relay::SessionRelay;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        sessions: Mutex<HashMap<String, Session>>,
        audits: Mutex<Vec<(String, String, String)>>,
        reject_writes: AtomicBool,
        write_attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
            Ok(self.sessions.lock().unwrap().get(session_id).cloned())
        }

        async fn insert_session(&self, session: &Session) -> Result<Session> {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&session.session_id) {
                return Err(AppError::AlreadyExists(session.session_id.clone()));
            }
            sessions.insert(session.session_id.clone(), session.clone());
            Ok(session.clone())
        }

        async fn put_if_version(
            &self,
            session: &Session,
            expected_version: i64,
        ) -> Result<Option<Session>> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            if self.reject_writes.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut sessions = self.sessions.lock().unwrap();
            let Some(current) = sessions.get(&session.session_id) else {
                return Ok(None);
            };
            if current.version != expected_version {
                return Ok(None);
            }
            let mut committed = session.clone();
            committed.version = expected_version + 1;
            sessions.insert(committed.session_id.clone(), committed.clone());
            Ok(Some(committed))
        }

        async fn list_open_sessions(&self, limit: i64) -> Result<Vec<Session>> {
            let sessions = self.sessions.lock().unwrap();
            Ok(sessions
                .values()
                .filter(|s| {
                    s.state == SessionState::Waiting && s.visibility == Visibility::Public
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn insert_admin_audit(
            &self,
            actor: &str,
            session_id: &str,
            action: &str,
            _detail: Option<&str>,
        ) -> Result<()> {
            self.audits.lock().unwrap().push((
                actor.to_string(),
                session_id.to_string(),
                action.to_string(),
            ));
            Ok(())
        }
    }

    fn waiting_session(id: &str) -> Session {
        state_machine::create(
            CreateSession {
                session_id: id.to_string(),
                invite_code: hex::encode([0x22u8; INVITE_CODE_BYTES]),
                first_player: "0xalice".to_string(),
                wager_token: "STRK".to_string(),
                wager_amount: Decimal::from(10),
                visibility: Visibility::Public,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn service(store: Arc<MemoryStore>) -> SessionService {
        SessionService::new(store, DeltaPublisher::local(Arc::new(SessionRelay::new())))
    }

    #[tokio::test]
    async fn create_mints_ids_and_persists_waiting() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());

        let session = service
            .create(
                "0xalice".to_string(),
                "STRK".to_string(),
                Decimal::from(10),
                Visibility::Public,
            )
            .await
            .unwrap();

        assert_eq!(session.session_id.len(), SESSION_ID_BYTES * 2);
        assert_eq!(session.invite_code.len(), INVITE_CODE_BYTES * 2);
        let stored = store
            .get_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, SessionState::Waiting);
    }

    #[tokio::test]
    async fn concurrent_writes_at_the_same_version_commit_exactly_once() {
        let store = Arc::new(MemoryStore::default());
        let waiting = waiting_session("s1");
        store.insert_session(&waiting).await.unwrap();

        let join_bob = state_machine::join(&waiting, "0xbob", Utc::now()).unwrap();
        let join_carol = state_machine::join(&waiting, "0xcarol", Utc::now()).unwrap();

        let (bob, carol) = tokio::join!(
            store.put_if_version(&join_bob, 0),
            store.put_if_version(&join_carol, 0),
        );
        let commits = [bob.unwrap(), carol.unwrap()];

        assert_eq!(commits.iter().filter(|c| c.is_some()).count(), 1);
        let stored = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.state, SessionState::Active);
    }

    #[tokio::test]
    async fn persistent_write_conflicts_surface_after_bounded_retries() {
        let store = Arc::new(MemoryStore::default());
        store.insert_session(&waiting_session("s1")).await.unwrap();
        store.reject_writes.store(true, Ordering::SeqCst);
        let service = service(store.clone());

        let err = service.join("s1", "0xbob", None).await.unwrap_err();

        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(
            store.write_attempts.load(Ordering::SeqCst),
            MAX_TRANSITION_ATTEMPTS as usize
        );
    }

    #[tokio::test]
    async fn stale_observed_version_recovers_by_rereading() {
        let store = Arc::new(MemoryStore::default());
        store.insert_session(&waiting_session("s1")).await.unwrap();
        let service = service(store.clone());

        // Caller observed version 7 against a record at version 0;
        // the first attempt is skipped and the re-read commits.
        let session = service.join("s1", "0xbob", Some(7)).await.unwrap();

        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.version, 1);
        assert_eq!(store.write_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn committed_transitions_publish_deltas_in_commit_order() {
        let store = Arc::new(MemoryStore::default());
        store.insert_session(&waiting_session("s1")).await.unwrap();
        let relay = Arc::new(SessionRelay::new());
        let service = SessionService::new(store, DeltaPublisher::local(relay.clone()));
        let (_handle, mut rx) = relay.subscribe("s1");

        service.join("s1", "0xbob", None).await.unwrap();
        service
            .apply_move("s1", "0xalice", "e2e4", None)
            .await
            .unwrap();

        assert!(rx.try_recv().unwrap().contains("\"version\":1"));
        assert!(rx.try_recv().unwrap().contains("\"version\":2"));
    }

    #[tokio::test]
    async fn lock_table_drains_after_transitions() {
        let store = Arc::new(MemoryStore::default());
        store.insert_session(&waiting_session("s1")).await.unwrap();
        store.insert_session(&waiting_session("s2")).await.unwrap();
        let service = service(store.clone());

        service.join("s1", "0xbob", None).await.unwrap();
        service.join("s2", "0xcarol", None).await.unwrap();
        service.resign("s1", "0xbob", None).await.unwrap();

        assert!(service.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_resolve_records_an_audit_row() {
        let store = Arc::new(MemoryStore::default());
        store.insert_session(&waiting_session("s1")).await.unwrap();
        let service = service(store.clone());

        service
            .force_resolve("s1", ForceResolution::Refund, "0xops")
            .await
            .unwrap();

        let audits = store.audits.lock().unwrap();
        assert_eq!(
            audits.as_slice(),
            &[(
                "0xops".to_string(),
                "s1".to_string(),
                "force_refund".to_string()
            )]
        );
    }
}
