use crate::model::RoomId;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    RoomNotFound(RoomId),
    RoomOccupied {
        room_id: RoomId,
        occupant: String,
    },
    AlreadyWaiting {
        room_id: RoomId,
        name: String,
    },
    /// Strict FIFO admission only: someone else is at the head of the list.
    NotNextInLine {
        room_id: RoomId,
        next: String,
    },
    InvalidName(&'static str),
    LimitExceeded(&'static str),
    Storage(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RoomOccupied { room_id, occupant } => {
                write!(f, "room {room_id} is occupied by {occupant}")
            }
            EngineError::AlreadyWaiting { room_id, name } => {
                write!(f, "{name} already waiting for room {room_id}")
            }
            EngineError::NotNextInLine { room_id, next } => {
                write!(f, "room {room_id} is reserved for {next}, who is next in line")
            }
            EngineError::InvalidName(msg) => write!(f, "invalid name: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::RoomNotFound(id),
            other => EngineError::Storage(other),
        }
    }
}
