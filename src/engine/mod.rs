mod error;
mod mutations;
mod queries;

pub use error::EngineError;
pub use queries::wait_positions_of;

use std::str::FromStr;
use std::sync::Arc;

use crate::limits::*;
use crate::model::*;
use crate::store::{RoomLock, RoomStore};

/// Whether the wait list gates who may enter a free room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Anyone may enter a free room; the wait list is guidance for humans.
    #[default]
    Advisory,
    /// A free room with waiters only admits the head of its wait list.
    StrictFifo,
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "advisory" => Ok(AdmissionPolicy::Advisory),
            "strict" | "strict_fifo" | "fifo" => Ok(AdmissionPolicy::StrictFifo),
            other => Err(format!("unknown admission policy: {other}")),
        }
    }
}

/// Occupancy and wait list rules over a [`RoomStore`].
///
/// Stateless between calls: every operation reads the room fresh from the
/// store. Mutations hold the room's [`RoomLock`] across load, decide and
/// update, so two racing `enter` calls on a free room cannot both succeed.
pub struct Engine {
    store: Arc<dyn RoomStore>,
    policy: AdmissionPolicy,
}

impl Engine {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            store,
            policy: AdmissionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Take the room's exclusion guard. Missing room → `RoomNotFound`.
    pub(super) async fn lock_room(&self, room_id: RoomId) -> Result<RoomLock, EngineError> {
        self.store
            .lock(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))
    }

    /// Fresh read of the room a guard protects.
    pub(super) async fn load_locked(&self, lock: &RoomLock) -> Result<Room, EngineError> {
        let room_id = lock.room_id();
        self.store
            .get_by_id(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidName("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}
