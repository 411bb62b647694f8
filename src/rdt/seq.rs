use std::sync::Mutex;

/// The sender's two stream cursors: `send` is the next byte to transmit,
/// `ack` the highest offset the peer has cumulatively acknowledged.
/// `ack <= send` always; `ack` never rewinds.
#[derive(Debug, Default)]
pub struct Sequence {
    inner: Mutex<Cursors>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursors {
    send: u32,
    ack: u32,
}

impl Sequence {
    pub fn send(&self) -> u32 {
        self.inner.lock().unwrap().send
    }

    pub fn ack(&self) -> u32 {
        self.inner.lock().unwrap().ack
    }

    pub fn set_ack(&self, ack: u32) {
        self.inner.lock().unwrap().ack = ack;
    }

    /// Go-back-N rollback: rewind the send cursor to the acknowledged edge.
    pub fn reset(&self) {
        let mut cursors = self.inner.lock().unwrap();
        cursors.send = cursors.ack;
    }

    /// True when every transmitted byte has been acknowledged.
    pub fn are_equal(&self) -> bool {
        let cursors = self.inner.lock().unwrap();
        cursors.send == cursors.ack
    }

    /// Sender-side cursor sync. A rollback may have rewound the shared cursor
    /// below the sender's `local` copy; in that case the lower value wins.
    /// Otherwise the shared cursor moves forward to `advanced`. Returns the
    /// new local cursor and an `ack` snapshot taken under the same lock.
    pub fn sync_send(&self, local: u32, advanced: u32) -> (u32, u32) {
        let mut cursors = self.inner.lock().unwrap();

        if cursors.send < local {
            (cursors.send, cursors.ack)
        } else {
            cursors.send = advanced;
            (advanced, cursors.ack)
        }
    }
}
