//! Transition rules for a room. Every function takes the room by `&mut` and
//! either applies the whole transition or returns an error without touching
//! it, so a store can run them against a working copy and commit on success.

use serde::{Deserialize, Serialize};

use crate::engine;
use crate::{
    Assignment, ExchangeError, GiftId, GiftSubmission, Participant, ParticipantId, Room,
    SessionStatus, REASON_MAX_CHARS, RECOMMENDATION_MAX_CHARS, TITLE_MAX_CHARS,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GiftDraft {
    pub title: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl GiftDraft {
    /// Trims every field and enforces the length bounds. An empty
    /// recommendation becomes `None`.
    pub fn validate(self) -> Result<GiftDraft, ExchangeError> {
        let title = self.title.trim().to_string();
        let reason = self.reason.trim().to_string();
        let recommendation = self
            .recommendation
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        if title.is_empty() {
            return Err(ExchangeError::InvalidInput("title required".into()));
        }
        check_len("title", &title, TITLE_MAX_CHARS)?;
        check_len("reason", &reason, REASON_MAX_CHARS)?;
        if let Some(r) = &recommendation {
            check_len("recommendation", r, RECOMMENDATION_MAX_CHARS)?;
        }

        Ok(GiftDraft {
            title,
            reason,
            recommendation,
        })
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), ExchangeError> {
    if value.chars().count() > max {
        return Err(ExchangeError::InvalidInput(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

pub(crate) fn normalize_name(name: &str) -> Result<String, ExchangeError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ExchangeError::InvalidInput("name required".into()));
    }
    Ok(name.to_string())
}

/// What the host should do next given the cursor it is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advance(usize),
    Complete,
}

pub fn next_step(observed_cursor: usize, assignment_count: usize) -> Step {
    match observed_cursor.checked_add(1) {
        Some(next) if next < assignment_count => Step::Advance(next),
        _ => Step::Complete,
    }
}

fn commit(room: &mut Room) {
    room.version += 1;
}

pub fn join(
    room: &mut Room,
    participant_id: impl Into<ParticipantId>,
    name: &str,
    now: u64,
) -> Result<(), ExchangeError> {
    if !room.status().is_open() {
        return Err(ExchangeError::AlreadyStarted);
    }
    let name = normalize_name(name)?;

    room.participants.push(Participant {
        id: participant_id.into(),
        name,
        is_host: false,
        has_submitted: false,
        joined_at: now,
    });
    commit(room);
    Ok(())
}

/// Stores the gift and flips the participant's flag together. The first
/// submission in a room opens the input phase.
pub fn submit_gift(
    room: &mut Room,
    participant_id: &str,
    gift_id: impl Into<GiftId>,
    draft: GiftDraft,
    now: u64,
) -> Result<GiftSubmission, ExchangeError> {
    let index = room
        .participants
        .iter()
        .position(|p| p.id == participant_id)
        .ok_or(ExchangeError::ParticipantNotFound)?;

    if !room.status().is_open() {
        return Err(ExchangeError::AlreadyStarted);
    }
    if room.participants[index].has_submitted || room.gift_by_giver(participant_id).is_some() {
        return Err(ExchangeError::DuplicateSubmission);
    }
    let draft = draft.validate()?;

    let gift = GiftSubmission {
        id: gift_id.into(),
        giver_id: participant_id.to_string(),
        title: draft.title,
        reason: draft.reason,
        recommendation: draft.recommendation,
        created_at: now,
    };

    room.gifts.push(gift.clone());
    room.participants[index].has_submitted = true;
    if room.session.status == SessionStatus::Registration {
        room.session.status = SessionStatus::Input;
    }
    commit(room);
    Ok(gift)
}

/// Every current participant has submitted and there are at least two of them.
pub fn check_ready(room: &Room) -> Result<(), ExchangeError> {
    let waiting = room.participants.iter().filter(|p| !p.has_submitted).count();
    if waiting > 0 {
        return Err(ExchangeError::NotReady(format!(
            "{waiting} participant(s) have not submitted a gift"
        )));
    }
    if room.submitted_count() < 2 {
        return Err(ExchangeError::NotReady(
            "at least two participants must submit a gift".into(),
        ));
    }
    Ok(())
}

pub fn begin_exchange(
    room: &mut Room,
    mut assignments: Vec<Assignment>,
    now: u64,
) -> Result<(), ExchangeError> {
    if !room.status().is_open() {
        return Err(ExchangeError::AlreadyStarted);
    }
    check_ready(room)?;
    engine::validate(&room.participants, &room.gifts, &assignments)?;

    if let Some(first) = assignments.first_mut() {
        first.revealed_at = Some(now);
    }
    room.assignments = assignments;
    room.session.status = SessionStatus::Exchange;
    room.session.cursor = 0;
    commit(room);
    Ok(())
}

/// Moves the cursor to `target`. Returns `false` when the cursor is already
/// there, so a repeated trigger for the same reveal changes nothing.
pub fn advance_cursor(room: &mut Room, target: usize, now: u64) -> Result<bool, ExchangeError> {
    if room.status() != SessionStatus::Exchange {
        return Err(ExchangeError::NotInExchange);
    }
    let current = room.session.cursor;
    if target == current {
        return Ok(false);
    }
    if target != current + 1 {
        return Err(ExchangeError::CursorOutOfOrder {
            current,
            requested: target,
        });
    }
    let len = room.assignments.len();
    if target >= len {
        return Err(ExchangeError::CursorOutOfRange {
            requested: target,
            len,
        });
    }

    room.session.cursor = target;
    room.assignments[target].revealed_at = Some(now);
    commit(room);
    Ok(true)
}

/// Ends the exchange once the last assignment is on screen. The cursor stays
/// on the last assignment. Returns `false` if the room was already completed.
pub fn complete(room: &mut Room) -> Result<bool, ExchangeError> {
    match room.status() {
        SessionStatus::Completed => return Ok(false),
        SessionStatus::Exchange => {}
        _ => return Err(ExchangeError::NotInExchange),
    }
    let remaining = room
        .assignments
        .len()
        .saturating_sub(room.session.cursor + 1);
    if remaining > 0 {
        return Err(ExchangeError::NotReady(format!(
            "{remaining} assignment(s) not yet revealed"
        )));
    }

    room.session.status = SessionStatus::Completed;
    commit(room);
    Ok(true)
}
