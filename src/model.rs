use serde::{Deserialize, Serialize};

use crate::waitlist::WaitList;

/// Unix milliseconds.
pub type Ms = i64;

/// Stable small integer room id. Seeded rooms count up from 0.
pub type RoomId = u32;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Who holds a room and since when. A room without one is free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub occupant: String,
    pub entered_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub occupancy: Option<Occupancy>,
    pub wait_list: WaitList,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            occupancy: None,
            wait_list: WaitList::new(),
        }
    }

    pub fn occupant(&self) -> Option<&str> {
        self.occupancy.as_ref().map(|o| o.occupant.as_str())
    }

    pub fn entered_at(&self) -> Option<Ms> {
        self.occupancy.as_ref().map(|o| o.entered_at)
    }

    pub fn is_free(&self) -> bool {
        self.occupancy.is_none()
    }

    pub fn is_occupied_by(&self, name: &str) -> bool {
        self.occupant() == Some(name)
    }

    /// Overwrite only the fields present in `update`.
    pub fn apply(&mut self, update: RoomUpdate) {
        if let Some(occupancy) = update.occupancy {
            self.occupancy = occupancy;
        }
        if let Some(wait_list) = update.wait_list {
            self.wait_list = wait_list;
        }
    }
}

/// Partial overwrite of a room's mutable fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomUpdate {
    pub occupancy: Option<Option<Occupancy>>,
    pub wait_list: Option<WaitList>,
}

impl RoomUpdate {
    pub fn occupy(occupant: impl Into<String>, entered_at: Ms) -> Self {
        Self {
            occupancy: Some(Some(Occupancy {
                occupant: occupant.into(),
                entered_at,
            })),
            wait_list: None,
        }
    }

    pub fn vacate() -> Self {
        Self {
            occupancy: Some(None),
            wait_list: None,
        }
    }

    pub fn wait_list(wait_list: WaitList) -> Self {
        Self {
            occupancy: None,
            wait_list: Some(wait_list),
        }
    }

    pub fn with_wait_list(mut self, wait_list: WaitList) -> Self {
        self.wait_list = Some(wait_list);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_none() && self.wait_list.is_none()
    }
}

/// WAL record format.
///
/// The wait list travels as its JSON blob so a record always carries the
/// whole list, replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomSeeded {
        id: RoomId,
        name: String,
    },
    RoomUpdated {
        id: RoomId,
        occupancy: Option<Option<Occupancy>>,
        wait_list: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

/// One row of the derived wait list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPosition {
    pub room_id: RoomId,
    /// People ahead of this waiter; 0 means next.
    pub position: usize,
    pub name: String,
    pub time: Ms,
    pub waited_ms: Ms,
}
