use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;
use crate::waitlist::WaitList;

use super::{MemoryStore, RoomLock, RoomStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Drains every append already queued,
/// buffers them, and fsyncs once for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = Vec::new();
        let mut pending = Some(cmd);

        while let Some(cmd) = pending.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    pending = rx.try_recv().ok();
                }
                other => {
                    // Appends queued ahead of a non-append land first
                    commit_batch(&mut wal, &mut batch);
                    handle_non_append(&mut wal, other);
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes never leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

fn update_event(id: RoomId, update: &RoomUpdate) -> Result<Event, StoreError> {
    let wait_list = match &update.wait_list {
        Some(wl) => Some(wl.to_blob().map_err(|e| StoreError::Corrupt(e.to_string()))?),
        None => None,
    };
    Ok(Event::RoomUpdated {
        id,
        occupancy: update.occupancy.clone(),
        wait_list,
    })
}

/// Room store persisted to an append-only log.
///
/// Rooms live in memory; every update is written to the log and fsynced
/// (group commit) before it becomes visible. Opening replays the log.
pub struct WalStore {
    rooms: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay `wal_path` and start the writer task. Must run inside a tokio
    /// runtime. A record that decodes but fails validation is an error, not
    /// a silently dropped tail.
    pub fn open(wal_path: PathBuf) -> Result<Self, StoreError> {
        let events = Wal::replay(&wal_path)?;
        let rooms = MemoryStore::new();
        for event in &events {
            apply_replayed(&rooms, event)?;
        }

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            "opened {} ({} events, {} rooms)",
            wal_path.display(),
            events.len(),
            rooms.room_count()
        );
        Ok(Self { rooms, wal_tx })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    /// Create rooms with sequential ids from 0. Only acts on an empty store,
    /// so restarting with the same config is a no-op. Returns rooms created.
    pub async fn seed_rooms<S: AsRef<str>>(&self, names: &[S]) -> Result<usize, StoreError> {
        if self.rooms.room_count() > 0 {
            return Ok(0);
        }
        for (id, name) in names.iter().enumerate() {
            let id = id as RoomId;
            let name = name.as_ref();
            self.rooms.seed(id, name)?;
            self.wal_append(&Event::RoomSeeded {
                id,
                name: name.to_string(),
            })
            .await?;
            info!("seeded room {id} ({name})");
        }
        Ok(names.len())
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response"))?
            .map_err(StoreError::from)
    }

    /// Rewrite the log as the minimal event set recreating current state.
    ///
    /// Read locks on every room are held until the swap completes, so no
    /// update can land in the old log after the snapshot was taken.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let slots = self.rooms.slots_by_id();
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            guards.push(slot.room.read().await);
        }

        let mut events = Vec::with_capacity(guards.len() * 2);
        for room in &guards {
            events.push(Event::RoomSeeded {
                id: room.id,
                name: room.name.clone(),
            });
            if room.occupancy.is_some() || !room.wait_list.is_empty() {
                let state = RoomUpdate {
                    occupancy: Some(room.occupancy.clone()),
                    wait_list: Some(room.wait_list.clone()),
                };
                events.push(update_event(room.id, &state)?);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response"))?
            .map_err(StoreError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Apply one replayed event. We are the sole owner during replay, so
/// `try_write` never contends.
fn apply_replayed(rooms: &MemoryStore, event: &Event) -> Result<(), StoreError> {
    match event {
        Event::RoomSeeded { id, name } => rooms.seed(*id, name),
        Event::RoomUpdated {
            id,
            occupancy,
            wait_list,
        } => {
            let slot = rooms
                .slot(*id)
                .ok_or_else(|| StoreError::Corrupt(format!("update for unknown room {id}")))?;
            let wait_list = match wait_list {
                Some(blob) => Some(
                    WaitList::from_blob(blob)
                        .map_err(|e| StoreError::Corrupt(format!("room {id}: {e}")))?,
                ),
                None => None,
            };
            let mut guard = slot
                .room
                .try_write()
                .map_err(|_| StoreError::Unavailable("room locked during replay"))?;
            guard.apply(RoomUpdate {
                occupancy: occupancy.clone(),
                wait_list,
            });
            Ok(())
        }
    }
}

#[async_trait]
impl RoomStore for WalStore {
    async fn get_by_id(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        self.rooms.get_by_id(id).await
    }

    async fn list_all(&self) -> Result<Vec<Room>, StoreError> {
        self.rooms.list_all().await
    }

    async fn update(&self, id: RoomId, update: RoomUpdate) -> Result<Room, StoreError> {
        let slot = self.rooms.slot(id).ok_or(StoreError::NotFound(id))?;
        let mut guard = slot.room.write().await;
        let event = update_event(id, &update)?;
        self.wal_append(&event).await?;
        guard.apply(update);
        Ok(guard.clone())
    }

    async fn lock(&self, id: RoomId) -> Result<Option<RoomLock>, StoreError> {
        self.rooms.lock(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("waitroom_test_store");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn seed_only_when_empty() {
        let path = test_wal_path("seed_once.wal");
        let store = WalStore::open(path.clone()).unwrap();
        assert_eq!(store.seed_rooms(&["Front", "Back"]).await.unwrap(), 2);
        assert_eq!(store.seed_rooms(&["Other"]).await.unwrap(), 0);
        drop(store);

        let reopened = WalStore::open(path).unwrap();
        let rooms = reopened.list_all().await.unwrap();
        let names: Vec<_> = rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Front", "Back"]);
    }

    #[tokio::test]
    async fn updates_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        {
            let store = WalStore::open(path.clone()).unwrap();
            store.seed_rooms(&["Front", "Back"]).await.unwrap();
            store.update(0, RoomUpdate::occupy("alice", 1_000)).await.unwrap();
            let mut wl = WaitList::new();
            wl.enqueue("bob", 1_100);
            wl.enqueue("carol", 1_200);
            store.update(0, RoomUpdate::wait_list(wl)).await.unwrap();
            store.update(1, RoomUpdate::occupy("dave", 1_300)).await.unwrap();
            store.update(1, RoomUpdate::vacate()).await.unwrap();
        }

        let store = WalStore::open(path).unwrap();
        let front = store.get_by_id(0).await.unwrap().unwrap();
        assert_eq!(front.occupant(), Some("alice"));
        assert_eq!(front.entered_at(), Some(1_000));
        assert_eq!(front.wait_list.ahead_of("carol"), Some(1));
        assert_eq!(front.wait_list.find("bob").unwrap().time, 1_100);

        let back = store.get_by_id(1).await.unwrap().unwrap();
        assert!(back.is_free());
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact_state.wal");
        {
            let store = WalStore::open(path.clone()).unwrap();
            store.seed_rooms(&["Front", "Back"]).await.unwrap();
            for i in 0..25 {
                store.update(0, RoomUpdate::occupy("alice", i)).await.unwrap();
                store.update(0, RoomUpdate::vacate()).await.unwrap();
            }
            store.update(1, RoomUpdate::occupy("bob", 99)).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 53);

            let before = fs::metadata(&path).unwrap().len();
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted log should be smaller: {after} < {before}");

            store.update(0, RoomUpdate::occupy("carol", 100)).await.unwrap();
        }

        let store = WalStore::open(path).unwrap();
        let rooms = store.list_all().await.unwrap();
        assert_eq!(rooms[0].occupant(), Some("carol"));
        assert_eq!(rooms[1].occupant(), Some("bob"));
        assert_eq!(rooms[1].entered_at(), Some(99));
    }

    #[tokio::test]
    async fn malformed_wait_list_fails_open() {
        let path = test_wal_path("bad_blob.wal");
        {
            let mut f = fs::File::create(&path).unwrap();
            for event in [
                Event::RoomSeeded {
                    id: 0,
                    name: "Front".into(),
                },
                Event::RoomUpdated {
                    id: 0,
                    occupancy: None,
                    wait_list: Some(r#"[{"name":"bob","time":"yesterday"}]"#.into()),
                },
            ] {
                let payload = bincode::serialize(&event).unwrap();
                f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
                f.write_all(&payload).unwrap();
                f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
            }
        }

        let result = WalStore::open(path);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn update_for_unknown_room_in_log_fails_open() {
        let path = test_wal_path("unknown_room.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_buffered(&Event::RoomUpdated {
                id: 5,
                occupancy: Some(None),
                wait_list: None,
            })
            .unwrap();
            wal.flush_sync().unwrap();
        }
        assert!(matches!(WalStore::open(path), Err(StoreError::Corrupt(_))));
    }
}
