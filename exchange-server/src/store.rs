use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use exchange_core::machine::{self, GiftDraft};
use exchange_core::{Assignment, ExchangeError, GiftSubmission, ParticipantId, Room, RoomId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Shared record of every room. Writes to one room are applied atomically and
/// in order; each committed write is pushed to that room's subscribers as a
/// full snapshot.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_room(&self, host_name: &str) -> Result<(RoomId, ParticipantId), ExchangeError>;

    async fn add_participant(
        &self,
        room_id: &str,
        name: &str,
    ) -> Result<ParticipantId, ExchangeError>;

    async fn submit_gift(
        &self,
        room_id: &str,
        participant_id: &str,
        gift: GiftDraft,
    ) -> Result<GiftSubmission, ExchangeError>;

    async fn begin_exchange(
        &self,
        room_id: &str,
        assignments: Vec<Assignment>,
    ) -> Result<Room, ExchangeError>;

    async fn advance_cursor(&self, room_id: &str, new_cursor: usize)
        -> Result<Room, ExchangeError>;

    async fn complete(&self, room_id: &str) -> Result<Room, ExchangeError>;

    async fn room(&self, room_id: &str) -> Result<Room, ExchangeError>;

    /// Starts with the current snapshot, then yields one per committed change.
    async fn subscribe(&self, room_id: &str) -> Result<RoomSubscription, ExchangeError>;
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

struct RoomSlot {
    room: Room,
    tx: broadcast::Sender<Room>,
}

/// In-process [`SessionStore`] with optional JSON-file persistence.
///
/// All rooms share one `RwLock`. A write keeps the lock held while the room
/// file is rewritten, so with persistence enabled every read, subscribe and
/// write on any room waits for that disk write to finish.
#[derive(Clone)]
pub struct MemoryStore {
    rooms: Arc<RwLock<HashMap<RoomId, RoomSlot>>>,
    persist_path: Option<PathBuf>,
    channel_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            persist_path: None,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Loads rooms from `path` when it holds a saved snapshot; every later
    /// commit rewrites the file before it becomes visible.
    pub async fn with_persistence(path: impl Into<PathBuf>, channel_capacity: usize) -> Self {
        let path = path.into();
        let mut store = Self::new(channel_capacity);
        store.persist_path = Some(path.clone());

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<RoomId, Room>>(&bytes) {
                Ok(saved) => {
                    let mut rooms = store.rooms.write().await;
                    for (id, room) in saved {
                        let (tx, _) = broadcast::channel(store.channel_capacity);
                        rooms.insert(id, RoomSlot { room, tx });
                    }
                    info!(rooms = rooms.len(), path = %path.display(), "loaded saved rooms");
                }
                Err(err) => warn!(path = %path.display(), "ignoring unreadable room file: {err}"),
            },
            Err(err) => debug!(path = %path.display(), "no saved rooms: {err}"),
        }
        store
    }

    async fn persist(
        &self,
        rooms: &HashMap<RoomId, RoomSlot>,
        candidate: &Room,
    ) -> Result<(), ExchangeError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let mut snapshot: BTreeMap<&str, &Room> = rooms
            .iter()
            .map(|(id, slot)| (id.as_str(), &slot.room))
            .collect();
        snapshot.insert(candidate.id.as_str(), candidate);

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| ExchangeError::StoreWriteFailed(err.to_string()))?;
        // Write a sibling file and rename it over the target so a crash never
        // leaves a half-written room file behind.
        let staging = staging_path(path);
        let written = match tokio::fs::write(&staging, json).await {
            Ok(()) => tokio::fs::rename(&staging, path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            warn!(path = %path.display(), room_id = %candidate.id, "persist error: {err}");
            return Err(ExchangeError::StoreWriteFailed(err.to_string()));
        }
        Ok(())
    }

    /// Runs `apply` on a working copy of the room and commits it only if the
    /// rule succeeds and the write reaches disk. Rules that leave the version
    /// untouched are no-ops and notify nobody.
    async fn mutate<T, F>(&self, room_id: &str, apply: F) -> Result<(Room, T), ExchangeError>
    where
        F: FnOnce(&mut Room) -> Result<T, ExchangeError>,
    {
        let mut rooms = self.rooms.write().await;
        let mut working = rooms
            .get(room_id)
            .ok_or(ExchangeError::RoomNotFound)?
            .room
            .clone();
        let before = working.version;
        let out = apply(&mut working)?;
        if working.version == before {
            return Ok((working, out));
        }

        self.persist(&rooms, &working).await?;

        let slot = rooms.get_mut(room_id).ok_or(ExchangeError::RoomNotFound)?;
        slot.room = working.clone();
        let receivers = slot.tx.send(working.clone()).unwrap_or(0);
        debug!(
            room_id,
            version = working.version,
            status = ?working.session.status,
            cursor = working.session.cursor,
            receivers,
            "room committed"
        );
        Ok((working, out))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_room(&self, host_name: &str) -> Result<(RoomId, ParticipantId), ExchangeError> {
        let room_id = Uuid::new_v4().to_string();
        let host_id = Uuid::new_v4().to_string();
        let room = Room::new(room_id.clone(), host_id.clone(), host_name, now_millis())?;

        let mut rooms = self.rooms.write().await;
        self.persist(&rooms, &room).await?;
        let (tx, _) = broadcast::channel(self.channel_capacity);
        rooms.insert(room_id.clone(), RoomSlot { room, tx });

        info!(room_id = %room_id, host_id = %host_id, "room created");
        Ok((room_id, host_id))
    }

    async fn add_participant(
        &self,
        room_id: &str,
        name: &str,
    ) -> Result<ParticipantId, ExchangeError> {
        let participant_id = Uuid::new_v4().to_string();
        let id = participant_id.clone();
        self.mutate(room_id, move |room| {
            machine::join(room, id, name, now_millis())
        })
        .await?;

        info!(room_id, participant_id = %participant_id, "participant joined");
        Ok(participant_id)
    }

    async fn submit_gift(
        &self,
        room_id: &str,
        participant_id: &str,
        gift: GiftDraft,
    ) -> Result<GiftSubmission, ExchangeError> {
        let gift_id = Uuid::new_v4().to_string();
        let (_, submission) = self
            .mutate(room_id, move |room| {
                machine::submit_gift(room, participant_id, gift_id, gift, now_millis())
            })
            .await?;

        info!(room_id, participant_id, gift_id = %submission.id, "gift submitted");
        Ok(submission)
    }

    async fn begin_exchange(
        &self,
        room_id: &str,
        assignments: Vec<Assignment>,
    ) -> Result<Room, ExchangeError> {
        let (room, _) = self
            .mutate(room_id, move |room| {
                machine::begin_exchange(room, assignments, now_millis())
            })
            .await?;

        info!(room_id, assignments = room.assignments.len(), "exchange started");
        Ok(room)
    }

    async fn advance_cursor(
        &self,
        room_id: &str,
        new_cursor: usize,
    ) -> Result<Room, ExchangeError> {
        let (room, moved) = self
            .mutate(room_id, move |room| {
                machine::advance_cursor(room, new_cursor, now_millis())
            })
            .await?;

        if moved {
            info!(room_id, cursor = new_cursor, "cursor advanced");
        } else {
            debug!(room_id, cursor = new_cursor, "cursor already at target");
        }
        Ok(room)
    }

    async fn complete(&self, room_id: &str) -> Result<Room, ExchangeError> {
        let (room, changed) = self.mutate(room_id, machine::complete).await?;
        if changed {
            info!(room_id, "exchange completed");
        }
        Ok(room)
    }

    async fn room(&self, room_id: &str) -> Result<Room, ExchangeError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|slot| slot.room.clone())
            .ok_or(ExchangeError::RoomNotFound)
    }

    async fn subscribe(&self, room_id: &str) -> Result<RoomSubscription, ExchangeError> {
        // Snapshot and receiver are taken under the same lock so no commit
        // falls between them.
        let rooms = self.rooms.read().await;
        let slot = rooms.get(room_id).ok_or(ExchangeError::RoomNotFound)?;
        debug!(room_id, "subscriber attached");
        Ok(RoomSubscription {
            pending: Some(slot.room.clone()),
            last_version: None,
            rx: slot.tx.subscribe(),
        })
    }
}

/// Stream of room snapshots. Snapshots that are not newer than the last one
/// handed out are dropped; a receiver that falls behind skips ahead.
pub struct RoomSubscription {
    pending: Option<Room>,
    last_version: Option<u64>,
    rx: broadcast::Receiver<Room>,
}

impl RoomSubscription {
    pub async fn next(&mut self) -> Option<Room> {
        if let Some(room) = self.pending.take() {
            self.last_version = Some(room.version);
            return Some(room);
        }
        loop {
            match self.rx.recv().await {
                Ok(room) => {
                    if self.last_version.is_some_and(|seen| room.version <= seen) {
                        continue;
                    }
                    self.last_version = Some(room.version);
                    return Some(room);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// Runs `on_change` for every snapshot of the room until the handle is
/// unsubscribed or dropped.
pub async fn watch_room<S, F>(
    store: &S,
    room_id: &str,
    mut on_change: F,
) -> Result<SubscriptionHandle, ExchangeError>
where
    S: SessionStore + ?Sized,
    F: FnMut(Room) + Send + 'static,
{
    let mut subscription = store.subscribe(room_id).await?;
    let task = tokio::spawn(async move {
        while let Some(room) = subscription.next().await {
            on_change(room);
        }
    });
    Ok(SubscriptionHandle { task })
}

pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
