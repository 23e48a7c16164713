use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::instrument;

use hinge_core::{SessionId, WalletSessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::session::{Session, WalletSession};

const ACTIVE_SESSION_KEY: &str = "active_session_id";

/// Everything a store needs to come back after a restart.
#[derive(Clone, Debug, Default)]
pub struct PersistedState {
    /// Oldest first.
    pub sessions: Vec<Session>,
    pub wallet_sessions: Vec<WalletSession>,
    pub active_session_id: Option<SessionId>,
}

/// Durable backing for the session store. The store writes through on every
/// mutation and reads once via [`SessionPersistence::load`].
pub trait SessionPersistence: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;
    fn save_wallet_session(&self, wallet_session: &WalletSession) -> Result<(), StoreError>;
    fn delete_wallet_session(&self, id: &WalletSessionId) -> Result<(), StoreError>;
    fn save_active(&self, id: Option<&SessionId>) -> Result<(), StoreError>;
    fn load(&self) -> Result<PersistedState, StoreError>;
}

/// SQLite-backed snapshots: one JSON document per session.
#[derive(Clone)]
pub struct SqlitePersistence {
    db: Database,
}

impl SqlitePersistence {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl SessionPersistence for SqlitePersistence {
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(session)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, wallet_id, status, created_at, snapshot, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    snapshot = excluded.snapshot,
                    updated_at = excluded.updated_at",
                params![
                    session.id.as_str(),
                    session.wallet_id.as_str(),
                    session.status.as_str(),
                    session.created_at,
                    snapshot,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }

    fn save_wallet_session(&self, wallet_session: &WalletSession) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(wallet_session)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO wallet_sessions (id, wallet_id, snapshot, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    snapshot = excluded.snapshot,
                    updated_at = excluded.updated_at",
                params![
                    wallet_session.id.as_str(),
                    wallet_session.wallet_id.as_str(),
                    snapshot,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_wallet_session(&self, id: &WalletSessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM wallet_sessions WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }

    fn save_active(&self, id: Option<&SessionId>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO store_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![ACTIVE_SESSION_KEY, id.map(SessionId::as_str)],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn load(&self) -> Result<PersistedState, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT snapshot FROM sessions ORDER BY created_at ASC, rowid ASC")?;
            let sessions = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|raw| Ok(serde_json::from_str::<Session>(&raw?)?))
                .collect::<Result<Vec<_>, StoreError>>()?;

            let mut stmt = conn.prepare("SELECT snapshot FROM wallet_sessions ORDER BY rowid ASC")?;
            let wallet_sessions = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|raw| Ok(serde_json::from_str::<WalletSession>(&raw?)?))
                .collect::<Result<Vec<_>, StoreError>>()?;

            let active_session_id = conn
                .query_row(
                    "SELECT value FROM store_state WHERE key = ?1",
                    [ACTIVE_SESSION_KEY],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten()
                .map(SessionId::from_raw);

            Ok(PersistedState {
                sessions,
                wallet_sessions,
                active_session_id,
            })
        })
    }
}
