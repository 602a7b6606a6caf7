use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock};

use crate::limits::*;
use crate::model::*;

use super::{RoomLock, RoomStore, StoreError};

/// One room's record plus the gate serializing its read-modify-writes.
pub(super) struct Slot {
    pub(super) room: RwLock<Room>,
    gate: Arc<Mutex<()>>,
}

impl Slot {
    fn new(room: Room) -> Self {
        Self {
            room: RwLock::new(room),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// In-process room store. Also the in-memory half of [`super::WalStore`].
pub struct MemoryStore {
    rooms: DashMap<RoomId, Arc<Slot>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Store seeded with sequential ids from 0.
    pub fn with_rooms<S: AsRef<str>>(names: &[S]) -> Result<Self, StoreError> {
        let store = Self::new();
        for (id, name) in names.iter().enumerate() {
            store.seed(id as RoomId, name.as_ref())?;
        }
        Ok(store)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    /// Create a free room with an empty wait list.
    pub fn seed(&self, id: RoomId, name: &str) -> Result<(), StoreError> {
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name too long"));
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        match self.rooms.entry(id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id)),
            Entry::Vacant(v) => {
                v.insert(Arc::new(Slot::new(Room::new(id, name))));
                Ok(())
            }
        }
    }

    pub(super) fn slot(&self, id: RoomId) -> Option<Arc<Slot>> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    /// Slots in ascending id order. Clones the Arcs so no map shard stays
    /// locked across an await.
    pub(super) fn slots_by_id(&self) -> Vec<Arc<Slot>> {
        let mut slots: Vec<(RoomId, Arc<Slot>)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        slots.sort_by_key(|(id, _)| *id);
        slots.into_iter().map(|(_, slot)| slot).collect()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get_by_id(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        match self.slot(id) {
            Some(slot) => Ok(Some(slot.room.read().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for slot in self.slots_by_id() {
            rooms.push(slot.room.read().await.clone());
        }
        Ok(rooms)
    }

    async fn update(&self, id: RoomId, update: RoomUpdate) -> Result<Room, StoreError> {
        let slot = self.slot(id).ok_or(StoreError::NotFound(id))?;
        let mut guard = slot.room.write().await;
        guard.apply(update);
        Ok(guard.clone())
    }

    async fn lock(&self, id: RoomId) -> Result<Option<RoomLock>, StoreError> {
        let Some(slot) = self.slot(id) else {
            return Ok(None);
        };
        let guard = slot.gate.clone().lock_owned().await;
        Ok(Some(RoomLock::new(id, guard)))
    }
}
