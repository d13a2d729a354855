use serde::{Deserialize, Serialize};

use crate::{ExchangeError, Room, SessionStatus};

/// Which screen a client should show for a given room snapshot. Clients
/// rebuild this from every snapshot they receive instead of keeping their own
/// copy of the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "screen")]
pub enum Screen {
    HostLobby,
    GiftInput,
    Waiting,
    Reveal { cursor: usize },
    Results,
}

pub fn project(room: &Room, viewer: &str) -> Result<Screen, ExchangeError> {
    let participant = room
        .participant(viewer)
        .ok_or(ExchangeError::ParticipantNotFound)?;

    let screen = match room.status() {
        SessionStatus::Registration | SessionStatus::Input => {
            if participant.id == room.session.host_id {
                Screen::HostLobby
            } else if participant.has_submitted {
                Screen::Waiting
            } else {
                Screen::GiftInput
            }
        }
        SessionStatus::Exchange => Screen::Reveal {
            cursor: room.session.cursor,
        },
        SessionStatus::Completed => Screen::Results,
    };
    Ok(screen)
}
