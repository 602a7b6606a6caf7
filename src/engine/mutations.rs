use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{validate_name, AdmissionPolicy, Engine, EngineError};

impl Engine {
    /// Occupy a free room. Entering also fulfils any pending wait by `name`
    /// on this room, so the same update drops `name` from its wait list.
    pub async fn enter(&self, room_id: RoomId, name: &str) -> Result<Room, EngineError> {
        validate_name(name)?;
        let lock = self.lock_room(room_id).await?;
        let room = self.load_locked(&lock).await?;

        if let Some(occupancy) = &room.occupancy {
            return Err(EngineError::RoomOccupied {
                room_id,
                occupant: occupancy.occupant.clone(),
            });
        }
        if self.policy == AdmissionPolicy::StrictFifo
            && let Some(head) = room.wait_list.head()
            && head.name != name
        {
            return Err(EngineError::NotNextInLine {
                room_id,
                next: head.name.clone(),
            });
        }

        let update =
            RoomUpdate::occupy(name, now_ms()).with_wait_list(room.wait_list.filter_out_name(name));
        let room = self.store.update(room_id, update).await?;
        drop(lock);

        metrics::gauge!(observability::ROOMS_OCCUPIED).increment(1.0);
        info!("room {room_id} ({}) entered by {name}", room.name);
        Ok(room)
    }

    /// Vacate a room. No identity check; the wait list is left alone and
    /// nobody is admitted automatically.
    pub async fn leave(&self, room_id: RoomId) -> Result<Room, EngineError> {
        let lock = self.lock_room(room_id).await?;
        let before = self.load_locked(&lock).await?;

        let room = self.store.update(room_id, RoomUpdate::vacate()).await?;
        drop(lock);

        match before.occupant() {
            Some(occupant) => {
                metrics::gauge!(observability::ROOMS_OCCUPIED).decrement(1.0);
                info!("room {room_id} ({}) left by {occupant}", room.name);
            }
            None => debug!("room {room_id} left while already free"),
        }
        Ok(room)
    }

    /// Append `name` to the room's wait list. Free rooms accept waiters too.
    pub async fn join_waitlist(&self, room_id: RoomId, name: &str) -> Result<Room, EngineError> {
        validate_name(name)?;
        let lock = self.lock_room(room_id).await?;
        let room = self.load_locked(&lock).await?;

        if room.wait_list.contains(name) {
            return Err(EngineError::AlreadyWaiting {
                room_id,
                name: name.to_string(),
            });
        }
        if room.wait_list.len() >= MAX_WAITLIST_LEN {
            return Err(EngineError::LimitExceeded("wait list full"));
        }

        let mut wait_list = room.wait_list;
        wait_list.enqueue(name, now_ms());
        let room = self
            .store
            .update(room_id, RoomUpdate::wait_list(wait_list))
            .await?;
        drop(lock);

        debug!("{name} waiting for room {room_id} ({} in line)", room.wait_list.len());
        Ok(room)
    }

    /// Drop `name` from every wait list holding it.
    ///
    /// Each room is updated under its own guard; there is no cross-room
    /// transaction, so a storage failure part way leaves earlier rooms
    /// updated. Rooms where `name` turned out to be absent are not written.
    /// Returns the ids of rooms that changed.
    pub async fn leave_waitlist(&self, name: &str) -> Result<Vec<RoomId>, EngineError> {
        let candidates: Vec<RoomId> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|room| room.wait_list.contains(name))
            .map(|room| room.id)
            .collect();

        let mut changed = Vec::with_capacity(candidates.len());
        for room_id in candidates {
            let Some(lock) = self.store.lock(room_id).await? else {
                continue;
            };
            let mut wait_list = self.load_locked(&lock).await?.wait_list;
            if wait_list.remove(name) {
                self.store
                    .update(room_id, RoomUpdate::wait_list(wait_list))
                    .await?;
                changed.push(room_id);
            }
        }

        if !changed.is_empty() {
            debug!("{name} left wait lists for rooms {changed:?}");
        }
        Ok(changed)
    }
}
