use std::sync::Arc;

use exchange_core::machine::{self, Step};
use exchange_core::{engine, ExchangeError, ParticipantId, Room, RoomId, SessionStatus};
use rand::Rng;
use tracing::info;

use crate::store::SessionStore;

/// The host's side of a room: the only writer of status and cursor. Attaching
/// checks the caller against the host recorded in the room, but the store
/// itself does not lock these fields to one writer.
pub struct SessionHost<S: ?Sized> {
    store: Arc<S>,
    room_id: RoomId,
    host_id: ParticipantId,
}

impl<S: SessionStore + ?Sized> SessionHost<S> {
    pub async fn attach(
        store: Arc<S>,
        room_id: &str,
        participant_id: &str,
    ) -> Result<Self, ExchangeError> {
        let room = store.room(room_id).await?;
        if room.participant(participant_id).is_none() {
            return Err(ExchangeError::ParticipantNotFound);
        }
        if room.session.host_id != participant_id {
            return Err(ExchangeError::NotHost);
        }
        Ok(Self {
            store,
            room_id: room_id.to_string(),
            host_id: participant_id.to_string(),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Draws the assignments, shuffles the reveal order and writes both with
    /// the status change in one update.
    pub async fn begin_exchange<R>(&self, rng: &mut R) -> Result<Room, ExchangeError>
    where
        R: Rng + Send + ?Sized,
    {
        let room = self.store.room(&self.room_id).await?;
        if !room.status().is_open() {
            return Err(ExchangeError::AlreadyStarted);
        }
        machine::check_ready(&room)?;

        let assignments = engine::assign(&room.participants, &room.gifts, rng)?;
        let assignments = engine::shuffle_order(assignments, rng);

        info!(
            room_id = %self.room_id,
            host_id = %self.host_id,
            participants = assignments.len(),
            "host starting exchange"
        );
        self.store.begin_exchange(&self.room_id, assignments).await
    }

    /// Moves on from the reveal the host was looking at. Repeating the call
    /// with the same `observed_cursor` changes nothing, including after the
    /// last reveal has completed the room.
    pub async fn advance_from(&self, observed_cursor: usize) -> Result<Room, ExchangeError> {
        let room = self.store.room(&self.room_id).await?;
        match room.status() {
            SessionStatus::Completed => return Ok(room),
            SessionStatus::Exchange => {}
            _ => return Err(ExchangeError::NotInExchange),
        }
        let len = room.assignments.len();
        if observed_cursor >= len {
            return Err(ExchangeError::CursorOutOfRange {
                requested: observed_cursor,
                len,
            });
        }

        match machine::next_step(observed_cursor, len) {
            Step::Advance(target) => self.store.advance_cursor(&self.room_id, target).await,
            Step::Complete => self.store.complete(&self.room_id).await,
        }
    }
}
