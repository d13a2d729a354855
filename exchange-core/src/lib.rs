use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod engine;
pub mod machine;
pub mod view;

pub use engine::{assign, shuffle_order, MAX_DERANGEMENT_ATTEMPTS};
pub use machine::{GiftDraft, Step};
pub use view::{project, Screen};

pub type RoomId = String;
pub type ParticipantId = String;
pub type GiftId = String;
pub type AssignmentId = String;

pub const TITLE_MAX_CHARS: usize = 20;
pub const REASON_MAX_CHARS: usize = 50;
pub const RECOMMENDATION_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub is_host: bool,
    pub has_submitted: bool,
    pub joined_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GiftSubmission {
    pub id: GiftId,
    pub giver_id: ParticipantId,
    pub title: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub giver_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub gift_id: GiftId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Registration,
    Input,
    Exchange,
    Completed,
}

impl SessionStatus {
    /// True while participants may still join and submit gifts.
    pub fn is_open(self) -> bool {
        matches!(self, SessionStatus::Registration | SessionStatus::Input)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub cursor: usize,
    pub host_id: ParticipantId,
    pub created_at: u64,
}

/// The single versioned record kept per room. Every committed mutation bumps
/// `version` by one, and the whole record is what subscribers receive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub version: u64,
    pub session: SessionState,
    pub participants: Vec<Participant>,
    pub gifts: Vec<GiftSubmission>,
    pub assignments: Vec<Assignment>,
}

impl Room {
    pub fn new(
        id: impl Into<RoomId>,
        host_id: impl Into<ParticipantId>,
        host_name: &str,
        now: u64,
    ) -> Result<Self, ExchangeError> {
        let name = machine::normalize_name(host_name)?;
        let host_id = host_id.into();
        Ok(Self {
            id: id.into(),
            version: 0,
            session: SessionState {
                status: SessionStatus::Registration,
                cursor: 0,
                host_id: host_id.clone(),
                created_at: now,
            },
            participants: vec![Participant {
                id: host_id,
                name,
                is_host: true,
                has_submitted: false,
                joined_at: now,
            }],
            gifts: Vec::new(),
            assignments: Vec::new(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn host(&self) -> Option<&Participant> {
        self.participant(&self.session.host_id)
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn gift(&self, id: &str) -> Option<&GiftSubmission> {
        self.gifts.iter().find(|g| g.id == id)
    }

    pub fn gift_by_giver(&self, giver_id: &str) -> Option<&GiftSubmission> {
        self.gifts.iter().find(|g| g.giver_id == giver_id)
    }

    pub fn receiver_of_gift(&self, gift_id: &str) -> Option<&Participant> {
        self.assignments
            .iter()
            .find(|a| a.gift_id == gift_id)
            .and_then(|a| self.participant(&a.receiver_id))
    }

    pub fn all_submitted(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(|p| p.has_submitted)
    }

    pub fn submitted_count(&self) -> usize {
        self.participants.iter().filter(|p| p.has_submitted).count()
    }

    /// The assignment being revealed, if the exchange has started.
    pub fn current_assignment(&self) -> Option<&Assignment> {
        match self.session.status {
            SessionStatus::Exchange | SessionStatus::Completed => {
                self.assignments.get(self.session.cursor)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("at least two participants must have submitted a gift")]
    InsufficientParticipants,
    #[error("could not draw a derangement, try again")]
    DerangementUnobtainable,
    #[error("participant already submitted a gift")]
    DuplicateSubmission,
    #[error("room not found")]
    RoomNotFound,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("exchange already started")]
    AlreadyStarted,
    #[error("room is not ready: {0}")]
    NotReady(String),
    #[error("room is not in the exchange phase")]
    NotInExchange,
    #[error("cursor must advance one step at a time (at {current}, requested {requested})")]
    CursorOutOfOrder { current: usize, requested: usize },
    #[error("cursor {requested} is past the last assignment ({len} total)")]
    CursorOutOfRange { requested: usize, len: usize },
    #[error("only the host may drive the session")]
    NotHost,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid assignment set: {0}")]
    InvalidAssignments(String),
    #[error("store write failed: {0}")]
    StoreWriteFailed(String),
}

impl ExchangeError {
    /// Probabilistic or transient failures; everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::DerangementUnobtainable | ExchangeError::StoreWriteFailed(_)
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Room with `names[0]` as host and every participant already submitted.
    pub fn ready_room(names: &[&str]) -> Room {
        let mut room = Room::new("r1", names[0], names[0], 0).unwrap();
        for name in &names[1..] {
            machine::join(&mut room, *name, name, 1).unwrap();
        }
        for (i, name) in names.iter().enumerate() {
            machine::submit_gift(
                &mut room,
                name,
                format!("g-{name}"),
                GiftDraft {
                    title: format!("gift {i}"),
                    reason: "because".into(),
                    recommendation: None,
                },
                2,
            )
            .unwrap();
        }
        room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::ready_room;

    #[test]
    fn new_room_contains_only_the_host() {
        let room = Room::new("r1", "h", "  Hana ", 10).unwrap();
        assert_eq!(room.status(), SessionStatus::Registration);
        assert_eq!(room.session.cursor, 0);
        assert_eq!(room.participants.len(), 1);
        let host = room.host().unwrap();
        assert!(host.is_host);
        assert_eq!(host.name, "Hana");
        assert!(!room.all_submitted());
    }

    #[test]
    fn lookup_helpers_follow_assignments() {
        let mut room = ready_room(&["a", "b", "c"]);
        room.assignments = vec![
            Assignment {
                id: "exchange_a_b".into(),
                giver_id: "a".into(),
                receiver_id: "b".into(),
                gift_id: "g-a".into(),
                revealed_at: None,
            },
        ];
        assert_eq!(room.gift_by_giver("c").map(|g| g.id.as_str()), Some("g-c"));
        assert_eq!(room.receiver_of_gift("g-a").map(|p| p.id.as_str()), Some("b"));
        assert!(room.receiver_of_gift("g-b").is_none());
        assert!(room.current_assignment().is_none());
        assert_eq!(room.submitted_count(), 3);
    }

    #[test]
    fn retryable_errors_are_the_transient_ones() {
        assert!(ExchangeError::DerangementUnobtainable.is_retryable());
        assert!(ExchangeError::StoreWriteFailed("disk".into()).is_retryable());
        assert!(!ExchangeError::DuplicateSubmission.is_retryable());
        assert!(!ExchangeError::NotReady("x".into()).is_retryable());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::Registration).unwrap();
        assert_eq!(json, "\"registration\"");
        assert!(SessionStatus::Input < SessionStatus::Exchange);
    }
}
