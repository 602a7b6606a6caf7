use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// Wait list rows for one room, head first, as seen at `now`.
pub fn wait_positions_of(room: &Room, now: Ms) -> Vec<WaitPosition> {
    room.wait_list
        .iter()
        .enumerate()
        .map(|(position, entry)| WaitPosition {
            room_id: room.id,
            position,
            name: entry.name.clone(),
            time: entry.time,
            waited_ms: entry.waited(now),
        })
        .collect()
}

impl Engine {
    /// Every room with its wait list, ascending by id. Read-only.
    pub async fn list(&self) -> Result<Vec<Room>, EngineError> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get(&self, room_id: RoomId) -> Result<Room, EngineError> {
        self.store
            .get_by_id(room_id)
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))
    }

    /// Derived wait list view, optionally narrowed to one room and/or one
    /// waiter. A named room that does not exist is an error; a name that is
    /// not waiting just yields no rows.
    pub async fn wait_positions(
        &self,
        room_id: Option<RoomId>,
        name: Option<&str>,
    ) -> Result<Vec<WaitPosition>, EngineError> {
        let rooms = match room_id {
            Some(id) => vec![self.get(id).await?],
            None => self.list().await?,
        };
        let now = now_ms();
        Ok(rooms
            .iter()
            .flat_map(|room| wait_positions_of(room, now))
            .filter(|row| name.is_none_or(|n| row.name == n))
            .collect())
    }

    /// Reset the occupied-rooms gauge from the store. Called once at startup;
    /// `enter`/`leave` keep it current afterwards.
    pub async fn publish_occupancy(&self) -> Result<usize, EngineError> {
        let occupied = self
            .list()
            .await?
            .iter()
            .filter(|room| !room.is_free())
            .count();
        metrics::gauge!(observability::ROOMS_OCCUPIED).set(occupied as f64);
        Ok(occupied)
    }
}
