pub mod database;
pub mod error;
pub mod persistence;
pub mod schema;
pub mod session;
pub mod store;

pub use database::Database;
pub use error::StoreError;
pub use persistence::{PersistedState, SessionPersistence, SqlitePersistence};
pub use session::{
    CreateSessionParams, Session, SessionStatus, SwitchKind, SwitchRecord, WalletSession,
};
pub use store::{SessionStore, StoreConfig};
