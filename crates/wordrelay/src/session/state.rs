//! Session states, actions, and the transition table that links them.

use std::fmt;

use serde::Serialize;

use super::event::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No hosts; initial and terminal.
    Empty,
    /// Below quota.
    Connecting,
    /// Quota met, waiting for every host to ack.
    AllHere,
    /// Steady state.
    Connected,
    /// Game underway with one or more hosts gone.
    Missing,
    /// Tearing down.
    Disconnecting,
}

impl SessionState {
    /// States in which the room has (or is gathering) hosts.
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AllHere | Self::Connected | Self::Missing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SendConnectResponse,
    SendReconnectResponse,
    NoteAck,
    DropDevice,
    SendNoRoom,
    Forward,
    TryTell,
    TimerDisconnect,
    Shutdown,
    HeartDisconnect,
    Disconnect,
    RemoveDevice,
    TellGameDead,
    NoteHeartbeat,
    NotifyDisconnect,
    RemoveSocket,
    RemoveSocketNotify,
    NoteFull,
    NoteShort,
    SendAllHere,
    NoteEmpty,
    None,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Look up what to do with `event` in `state`. `None` is a protocol
/// violation.
pub const fn transition(state: SessionState, event: EventKind) -> Option<(Action, SessionState)> {
    use EventKind as E;
    use SessionState as S;

    let stay = state;
    Some(match (state, event) {
        (S::Empty | S::Connecting, E::DeviceConnect) => (Action::SendConnectResponse, S::Connecting),
        (S::AllHere | S::Connected | S::Missing | S::Disconnecting, E::DeviceConnect)
        | (S::Disconnecting, E::DeviceReconnect) => (Action::SendNoRoom, stay),

        (S::Empty | S::Connecting, E::DeviceReconnect) => {
            (Action::SendReconnectResponse, S::Connecting)
        }
        (S::AllHere | S::Connected | S::Missing, E::DeviceReconnect) => {
            (Action::SendReconnectResponse, stay)
        }

        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::AckReceived) => {
            (Action::NoteAck, stay)
        }
        (S::Empty | S::Disconnecting, E::AckReceived)
        | (_, E::NoMoreMessages)
        | (S::Empty | S::Disconnecting, E::RoomShort | E::HeartbeatReceived)
        | (S::Empty | S::Disconnecting, E::Shutdown)
        | (S::Empty | S::AllHere | S::Connected | S::Disconnecting, E::AllConnectedTimer)
        | (S::Disconnecting, E::HeartbeatFailed)
        | (S::Empty, E::Disconnect)
        | (S::Empty | S::Connecting | S::Connected | S::Missing | S::Disconnecting, E::AllHere) => {
            (Action::None, stay)
        }
        (_, E::AckTimeout) => (Action::DropDevice, stay),

        (S::Connecting | S::Missing, E::RoomFull) => (Action::NoteFull, S::AllHere),
        (S::AllHere, E::RoomShort) => (Action::NoteShort, S::Connecting),
        (S::Connected, E::RoomShort) => (Action::NoteShort, S::Missing),
        (S::Connecting | S::Missing, E::RoomShort) => (Action::NoteShort, stay),
        (S::AllHere, E::AllHere) => (Action::SendAllHere, S::Connected),

        (S::Connecting | S::AllHere | S::Connected | S::Missing | S::Disconnecting, E::ForwardMessage)
        | (_, E::ProxyMessage) => (Action::Forward, stay),
        (_, E::TryTell) => (Action::TryTell, stay),

        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::Disconnect) => {
            (Action::Disconnect, stay)
        }
        (S::Disconnecting, E::Disconnect) | (S::Empty | S::Disconnecting, E::RemoveSocket) => {
            (Action::RemoveSocket, stay)
        }

        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::HeartbeatReceived) => {
            (Action::NoteHeartbeat, stay)
        }
        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::HeartbeatFailed) => {
            (Action::HeartDisconnect, stay)
        }
        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::RemoveSocket) => {
            (Action::RemoveSocketNotify, stay)
        }
        (_, E::NotifyDisconnect) => (Action::NotifyDisconnect, stay),

        (S::Connecting | S::AllHere | S::Connected | S::Missing, E::Shutdown) => {
            (Action::Shutdown, S::Disconnecting)
        }
        (S::Connecting | S::Missing, E::AllConnectedTimer) => {
            (Action::TimerDisconnect, S::Disconnecting)
        }

        (_, E::NoMoreSockets) => (Action::NoteEmpty, S::Empty),
        (_, E::DeviceGone) => (Action::RemoveDevice, stay),
        (_, E::GameDead) => (Action::TellGameDead, stay),

        (S::Empty, E::ForwardMessage | E::HeartbeatFailed)
        | (S::AllHere | S::Connected | S::Disconnecting | S::Empty, E::RoomFull) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [SessionState; 6] = [
        SessionState::Empty,
        SessionState::Connecting,
        SessionState::AllHere,
        SessionState::Connected,
        SessionState::Missing,
        SessionState::Disconnecting,
    ];

    #[test]
    fn connect_opens_room_only_when_gathering() {
        assert_eq!(
            transition(SessionState::Empty, EventKind::DeviceConnect),
            Some((Action::SendConnectResponse, SessionState::Connecting))
        );
        for state in [
            SessionState::AllHere,
            SessionState::Connected,
            SessionState::Missing,
            SessionState::Disconnecting,
        ] {
            assert_eq!(
                transition(state, EventKind::DeviceConnect),
                Some((Action::SendNoRoom, state))
            );
        }
    }

    #[test]
    fn quota_moves() {
        assert_eq!(
            transition(SessionState::Connecting, EventKind::RoomFull),
            Some((Action::NoteFull, SessionState::AllHere))
        );
        assert_eq!(
            transition(SessionState::AllHere, EventKind::AllHere),
            Some((Action::SendAllHere, SessionState::Connected))
        );
        assert_eq!(
            transition(SessionState::Connected, EventKind::RoomShort),
            Some((Action::NoteShort, SessionState::Missing))
        );
        assert_eq!(
            transition(SessionState::Missing, EventKind::RoomFull),
            Some((Action::NoteFull, SessionState::AllHere))
        );
    }

    #[test]
    fn holes_are_violations() {
        assert_eq!(transition(SessionState::Empty, EventKind::ForwardMessage), None);
        assert_eq!(transition(SessionState::Empty, EventKind::HeartbeatFailed), None);
        assert_eq!(transition(SessionState::Connected, EventKind::RoomFull), None);
    }

    #[test]
    fn teardown_paths() {
        assert_eq!(
            transition(SessionState::Connected, EventKind::Shutdown),
            Some((Action::Shutdown, SessionState::Disconnecting))
        );
        assert_eq!(
            transition(SessionState::Missing, EventKind::AllConnectedTimer),
            Some((Action::TimerDisconnect, SessionState::Disconnecting))
        );
        assert_eq!(
            transition(SessionState::Disconnecting, EventKind::RemoveSocket),
            Some((Action::RemoveSocket, SessionState::Disconnecting))
        );
        assert_eq!(
            transition(SessionState::Connected, EventKind::RemoveSocket),
            Some((Action::RemoveSocketNotify, SessionState::Connected))
        );
    }

    #[test]
    fn no_more_sockets_always_empties() {
        for state in STATES {
            assert_eq!(
                transition(state, EventKind::NoMoreSockets),
                Some((Action::NoteEmpty, SessionState::Empty))
            );
        }
    }

    #[test]
    fn timers_and_messages_never_fall_through() {
        for state in STATES {
            assert!(transition(state, EventKind::AckTimeout).is_some());
            assert!(transition(state, EventKind::AllConnectedTimer).is_some());
            assert!(transition(state, EventKind::ProxyMessage).is_some());
            assert!(transition(state, EventKind::NotifyDisconnect).is_some());
        }
    }
}
