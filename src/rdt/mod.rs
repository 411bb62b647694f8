use std::time::Duration;

mod endpoint;
mod inner;
mod packet;
mod seq;
mod timer;
mod window;

pub use endpoint::Endpoint;
pub use packet::{Flags, Packet};

/// Largest payload carried by a single segment, in bytes.
pub const MSS: usize = 1400;

/// Wire header: 4-byte big-endian sequence number plus one flag byte.
pub const HEADER_LEN: usize = 5;

pub(crate) const MAX_DATAGRAM: usize = MSS + HEADER_LEN;

/// Read-timeout tick of the background loops and of blocking waits.
pub(crate) const SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for handshake completion, ACK progress and queue dequeues.
pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Polling granularity of the retransmission-timer loop.
pub(crate) const TIMER_TICK: Duration = Duration::from_millis(10);

/// FIN exchange attempts before `close` gives up on the peer.
pub(crate) const CLOSING_LOOP_LIMIT: u32 = 5;

pub(crate) const GO_BACK_N_WINDOW: u32 = 100 * MSS as u32;
pub(crate) const STOP_AND_WAIT_WINDOW: u32 = MSS as u32;

/// Loss-recovery strategy negotiated by the connecting side. The choice
/// travels in the SYN payload as a big-endian `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Windowed pipeline; on loss, everything from the first unacknowledged
    /// byte is retransmitted.
    GoBackN = 1,
    /// One segment in flight at a time.
    StopAndWait = 2,
}

impl RecoveryMode {
    pub(crate) fn window_capacity(self) -> u32 {
        match self {
            RecoveryMode::GoBackN => GO_BACK_N_WINDOW,
            RecoveryMode::StopAndWait => STOP_AND_WAIT_WINDOW,
        }
    }

    /// Duplicate-ACK count beyond which the sender retransmits.
    pub(crate) fn repeat_threshold(self) -> u32 {
        match self {
            RecoveryMode::GoBackN => 2,
            RecoveryMode::StopAndWait => 0,
        }
    }

    pub(crate) fn to_payload(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }

    pub(crate) fn from_payload(data: &[u8]) -> Option<RecoveryMode> {
        let word = data.get(..4)?;
        match u32::from_be_bytes(word.try_into().unwrap()) {
            1 => Some(RecoveryMode::GoBackN),
            2 => Some(RecoveryMode::StopAndWait),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_payload_round_trip() {
        assert_eq!(RecoveryMode::GoBackN.to_payload(), [0, 0, 0, 1]);
        assert_eq!(
            RecoveryMode::from_payload(&RecoveryMode::StopAndWait.to_payload()),
            Some(RecoveryMode::StopAndWait)
        );
    }

    #[test]
    fn mode_payload_rejects_garbage() {
        assert_eq!(RecoveryMode::from_payload(&[0, 0]), None);
        assert_eq!(RecoveryMode::from_payload(&[0, 0, 0, 9]), None);
    }
}
