use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, error, warn};

use super::packet::{Flags, Packet};
use super::seq::Sequence;
use super::timer::RtoTimer;
use super::window::Window;
use super::{RecoveryMode, MAX_DATAGRAM, SOCKET_TIMEOUT, STOP_AND_WAIT_WINDOW, TIMER_TICK};

/// State shared between the caller-facing endpoint and its two background
/// loops. The receive loop is the only reader of the socket; the caller
/// thread sends through it concurrently.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) socket: UdpSocket,
    /// Local bind address, reused when accepting on ephemeral sockets.
    pub(crate) host: Mutex<Option<IpAddr>>,
    /// The connected peer, once the handshake fixes it.
    pub(crate) peer: Mutex<Option<SocketAddr>>,
    /// Signals `connect` when the receive loop records the peer.
    pub(crate) peer_var: Condvar,
    pub(crate) sequence: Sequence,
    pub(crate) window: Window,
    pub(crate) timer: RtoTimer,
    /// Next expected in-order byte offset. Written only by the receive loop.
    pub(crate) received_ack: AtomicU32,
    /// Duplicate-ACK count beyond which the sender retransmits.
    pub(crate) repeat_threshold: AtomicU32,
    pub(crate) shutdown: AtomicBool,
    /// Set once `close` starts the FIN exchange; the receive loop then
    /// treats incoming ACKs as answers to our FIN.
    pub(crate) closing: AtomicBool,
    pub(crate) close_state: Mutex<CloseState>,
    pub(crate) close_var: Condvar,
    /// Producer half of the in-order payload queue. The receive loop takes
    /// it when it starts and drops it when it exits, which is how `recv`
    /// learns that no more data can arrive.
    pub(crate) data_tx: Mutex<Option<Sender<Vec<u8>>>>,
    /// Pending connection requests. Present only while listening.
    pub(crate) accept_tx: Mutex<Option<Sender<(SocketAddr, RecoveryMode)>>>,
    /// Peer currently completing its handshake in `accept`; its
    /// retransmitted SYNs must not be queued again.
    pub(crate) accepting: Mutex<Option<SocketAddr>>,
}

#[derive(Debug, Default)]
pub(crate) struct CloseState {
    pub(crate) fin_acked: bool,
    pub(crate) peer_fin_received: bool,
}

impl Shared {
    pub(crate) fn new(socket: UdpSocket) -> Shared {
        Shared {
            socket,
            host: Mutex::new(None),
            peer: Mutex::new(None),
            peer_var: Condvar::new(),
            sequence: Sequence::default(),
            window: Window::new(STOP_AND_WAIT_WINDOW),
            timer: RtoTimer::new(),
            received_ack: AtomicU32::new(0),
            repeat_threshold: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close_state: Mutex::new(CloseState::default()),
            close_var: Condvar::new(),
            data_tx: Mutex::new(None),
            accept_tx: Mutex::new(None),
            accepting: Mutex::new(None),
        }
    }

    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    /// Applies the negotiated recovery mode: window capacity and the
    /// duplicate-ACK threshold for fast retransmit.
    pub(crate) fn set_mode(&self, mode: RecoveryMode) {
        self.window.reset(Some(mode.window_capacity()));
        self.repeat_threshold
            .store(mode.repeat_threshold(), Ordering::Release);
    }

    /// Go-back-N rollback: rewind the send cursor, reopen the window, disarm
    /// the timer. Idempotent, so the receive loop and the timer loop may
    /// both trigger it.
    pub(crate) fn rollback(&self) {
        self.sequence.reset();
        self.window.reset(None);
        self.timer.stop();
    }

    pub(crate) fn send_packet(&self, packet: &Packet, to: SocketAddr) -> io::Result<()> {
        self.socket.send_to(&packet.encode(), to)?;
        Ok(())
    }
}

/// Polls the retransmission timer and rolls the sender back on expiry.
pub(crate) fn timer_loop(shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.timer.is_expired() {
            debug!("time out: packet lost");
            shared.rollback();
        }
        thread::sleep(TIMER_TICK);
    }
}

/// The sole reader of the socket. Dispatches each segment to the handshake,
/// teardown, ACK-ingestion or data path, and re-checks the retransmission
/// timer once per read tick.
pub(crate) fn recv_loop(shared: Arc<Shared>) {
    if let Err(err) = shared.socket.set_read_timeout(Some(SOCKET_TIMEOUT)) {
        error!(%err, "cannot configure the socket read timeout");
        fail(&shared);
        return;
    }

    let data_tx = shared.data_tx.lock().unwrap().take();
    let mut repeated_acks: HashMap<u32, u32> = HashMap::new();
    let mut buf = [0u8; MAX_DATAGRAM];

    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.timer.is_expired() {
            debug!("time out: packet lost");
            shared.rollback();
        }

        let (n, addr) = match shared.socket.recv_from(&mut buf) {
            Ok(read) => read,
            Err(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(err) => {
                error!(%err, "socket failed, dropping the connection");
                fail(&shared);
                break;
            }
        };

        let Some(packet) = Packet::decode(&buf[..n]) else {
            debug!(%addr, len = n, "undecodable segment - IGNORED");
            continue;
        };

        let handled = if packet.flags.contains(Flags::SYN) {
            on_syn(&shared, addr, &packet)
        } else if packet.flags.contains(Flags::FIN) {
            on_fin(&shared, addr)
        } else if packet.flags.contains(Flags::ACK) {
            on_ack(&shared, addr, &packet, &mut repeated_acks)
        } else {
            on_data(&shared, addr, packet, data_tx.as_ref())
        };

        if let Err(err) = handled {
            error!(%err, "socket failed, dropping the connection");
            fail(&shared);
        }
    }
}

/// Fatal-error path of the receive loop: stop every flow that could still
/// be waiting on this endpoint.
fn fail(shared: &Shared) {
    shared.shutdown.store(true, Ordering::Release);
    shared.accept_tx.lock().unwrap().take();
    shared.close_var.notify_all();
}

/// Handshake segments. A SYN|ACK answers our active open; a bare SYN is a
/// connection request for the accept queue.
fn on_syn(shared: &Shared, addr: SocketAddr, packet: &Packet) -> io::Result<()> {
    if packet.flags.contains(Flags::ACK) {
        let mut peer = shared.peer.lock().unwrap();

        if peer.is_some_and(|current| current != addr) {
            debug!(%addr, "SYN|ACK from a foreign address - IGNORED");
            return Ok(());
        }

        // Answer every SYN|ACK: the peer's accept loop keeps resending it
        // until our ACK gets through.
        shared.send_packet(&Packet::control(Flags::ACK), addr)?;

        if peer.is_none() {
            debug!(%addr, "SYN|ACK received, peer fixed");
            *peer = Some(addr);
            shared.peer_var.notify_all();
        }

        return Ok(());
    }

    if shared.peer.lock().unwrap().is_some() {
        debug!(%addr, "SYN on an established endpoint - IGNORED");
        return Ok(());
    }
    if *shared.accepting.lock().unwrap() == Some(addr) {
        debug!(%addr, "SYN from the peer being accepted - IGNORED");
        return Ok(());
    }

    let accept_tx = shared.accept_tx.lock().unwrap();
    let Some(accept_tx) = accept_tx.as_ref() else {
        return Ok(());
    };

    let Some(mode) = RecoveryMode::from_payload(&packet.payload) else {
        warn!(%addr, %packet, "SYN with an undecodable mode - IGNORED");
        return Ok(());
    };

    match accept_tx.try_send((addr, mode)) {
        Ok(()) => debug!(%addr, ?mode, "connection request queued"),
        Err(TrySendError::Full(_)) => warn!(%addr, "accept queue full, SYN dropped"),
        Err(TrySendError::Disconnected(_)) => {}
    }

    Ok(())
}

/// Peer teardown: acknowledge the FIN and wake a closer parked in `close`.
fn on_fin(shared: &Shared, addr: SocketAddr) -> io::Result<()> {
    if shared.peer() != Some(addr) {
        debug!(%addr, "FIN from an unknown address - IGNORED");
        return Ok(());
    }

    debug!(%addr, "FIN received");
    shared.send_packet(&Packet::ack(shared.received_ack.load(Ordering::Acquire)), addr)?;

    let mut close_state = shared.close_state.lock().unwrap();
    close_state.peer_fin_received = true;
    shared.close_var.notify_all();

    Ok(())
}

/// Sender-side ACK ingestion: advance the acknowledged cursor and reopen the
/// window, or count duplicates toward fast retransmit.
fn on_ack(
    shared: &Shared,
    addr: SocketAddr,
    packet: &Packet,
    repeated_acks: &mut HashMap<u32, u32>,
) -> io::Result<()> {
    if shared.peer() != Some(addr) {
        debug!(%addr, "ACK from an unknown address - IGNORED");
        return Ok(());
    }

    debug!(%packet, "ACK received");

    if shared.closing.load(Ordering::Acquire) {
        let mut close_state = shared.close_state.lock().unwrap();
        if !close_state.fin_acked {
            close_state.fin_acked = true;
            shared.close_var.notify_all();
        }
    }

    let ack = shared.sequence.ack();
    if packet.seq > ack {
        shared.window.increase(packet.seq - ack);
        shared.sequence.set_ack(packet.seq);
        shared.timer.update_rtt();
        shared.timer.stop();
        repeated_acks.clear();
    } else if packet.seq == ack {
        let count = repeated_acks.entry(packet.seq).or_insert(0);
        *count += 1;
        if *count > shared.repeat_threshold.load(Ordering::Acquire) {
            debug!(seq = packet.seq, count = *count, "repeated ACK - RESENDING");
            shared.rollback();
            *count = 0;
        }
    }
    // packet.seq < ack: stale, drop.

    Ok(())
}

/// Receiver side. Only the next expected offset is accepted; everything else
/// is discarded and re-answered with the cumulative ACK.
fn on_data(
    shared: &Shared,
    addr: SocketAddr,
    packet: Packet,
    data_tx: Option<&Sender<Vec<u8>>>,
) -> io::Result<()> {
    if shared.peer() != Some(addr) {
        debug!(%addr, "data from an unknown address - IGNORED");
        return Ok(());
    }

    let expected = shared.received_ack.load(Ordering::Acquire);
    if packet.seq == expected {
        debug!(%packet, "ACCEPTED");
        let next = expected.wrapping_add(packet.payload.len() as u32);
        shared.received_ack.store(next, Ordering::Release);
        if let Some(data_tx) = data_tx {
            let _ = data_tx.send(packet.payload);
        }
    } else {
        debug!(%packet, expected, "out of order - IGNORED");
    }

    shared.send_packet(
        &Packet::ack(shared.received_ack.load(Ordering::Acquire)),
        addr,
    )?;

    Ok(())
}
