mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::MemoryStore;

use std::any::Any;

use async_trait::async_trait;

use crate::model::{Room, RoomId, RoomUpdate};

/// Persistence and lookup collaborator the engine runs against.
///
/// The store is the only source of truth: the engine reads a fresh [`Room`]
/// on every call and never caches one across calls.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get_by_id(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Every room, ascending by id.
    async fn list_all(&self) -> Result<Vec<Room>, StoreError>;

    /// Atomically overwrite only the fields present in `update` and persist.
    /// Returns the room as stored afterwards.
    async fn update(&self, id: RoomId, update: RoomUpdate) -> Result<Room, StoreError>;

    /// Take the exclusive guard for one room's read-modify-write.
    ///
    /// Returns `None` if the room does not exist. Guards on different rooms
    /// never contend, and holding one does not block `get_by_id`/`list_all`.
    async fn lock(&self, id: RoomId) -> Result<Option<RoomLock>, StoreError>;
}

/// Held for the duration of one room's read-modify-write; released on drop.
pub struct RoomLock {
    room_id: RoomId,
    _guard: Box<dyn Any + Send + Sync>,
}

impl RoomLock {
    pub fn new(room_id: RoomId, guard: impl Any + Send + Sync) -> Self {
        Self {
            room_id,
            _guard: Box::new(guard),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }
}

impl std::fmt::Debug for RoomLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomLock").field("room_id", &self.room_id).finish()
    }
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(RoomId),
    AlreadyExists(RoomId),
    /// Persisted state failed validation (bad wait list blob, unknown room in log).
    Corrupt(String),
    Io(String),
    Unavailable(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "room {id} not in store"),
            StoreError::AlreadyExists(id) => write!(f, "room {id} already exists"),
            StoreError::Corrupt(e) => write!(f, "corrupt room state: {e}"),
            StoreError::Io(e) => write!(f, "storage I/O error: {e}"),
            StoreError::Unavailable(what) => write!(f, "storage unavailable: {what}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
