use std::cmp;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, info};

use super::inner::{recv_loop, timer_loop, Shared};
use super::packet::{Flags, Packet};
use super::{
    RecoveryMode, CLOSING_LOOP_LIMIT, CONNECTION_TIMEOUT, MAX_DATAGRAM, MSS, SOCKET_TIMEOUT,
};
use crate::Error;

/// A connection-oriented byte-stream endpoint over UDP.
///
/// The passive side runs [`Endpoint::bind`], [`Endpoint::listen`] and
/// [`Endpoint::accept`]; the active side runs [`Endpoint::connect`]. Either
/// way the result is an established endpoint whose [`Endpoint::send_all`]
/// and [`Endpoint::recv`] move bytes reliably and in order.
#[derive(Debug)]
pub struct Endpoint {
    shared: Arc<Shared>,
    data_rx: Receiver<Vec<u8>>,
    accept_rx: Option<Receiver<(SocketAddr, RecoveryMode)>>,
    threads: Vec<JoinHandle<()>>,
    /// Bytes dequeued beyond what an earlier `recv` asked for.
    stash: Vec<u8>,
    closed: bool,
}

impl Endpoint {
    fn from_socket(socket: UdpSocket) -> Endpoint {
        let shared = Arc::new(Shared::new(socket));
        let (data_tx, data_rx) = unbounded();
        *shared.data_tx.lock().unwrap() = Some(data_tx);

        Endpoint {
            shared,
            data_rx,
            accept_rx: None,
            threads: Vec::new(),
            stash: Vec::new(),
            closed: false,
        }
    }

    /// Binds the passive side to a local address.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Endpoint, Error> {
        let socket = UdpSocket::bind(addr)?;
        let local = socket.local_addr()?;

        let endpoint = Endpoint::from_socket(socket);
        *endpoint.shared.host.lock().unwrap() = Some(local.ip());

        Ok(endpoint)
    }

    /// Starts queueing incoming connection requests, keeping at most
    /// `maxsize` of them pending (zero means no bound).
    pub fn listen(&mut self, maxsize: usize) {
        let (accept_tx, accept_rx) = if maxsize == 0 {
            unbounded()
        } else {
            bounded(maxsize)
        };

        *self.shared.accept_tx.lock().unwrap() = Some(accept_tx);
        self.accept_rx = Some(accept_rx);
        self.start();
    }

    fn start(&mut self) {
        let shared = self.shared.clone();
        self.threads.push(thread::spawn(move || recv_loop(shared)));

        let shared = self.shared.clone();
        self.threads.push(thread::spawn(move || timer_loop(shared)));
    }

    /// Blocks for the next pending connection request and completes its
    /// handshake on a fresh ephemeral socket. A peer that never answers the
    /// SYN|ACK is abandoned after the connection timeout and the next
    /// request is served instead.
    pub fn accept(&mut self) -> Result<Endpoint, Error> {
        let host = self.shared.host.lock().unwrap().ok_or(Error::NotListening)?;
        let accept_rx = self.accept_rx.as_ref().ok_or(Error::NotListening)?;

        loop {
            let (addr, mode) = accept_rx.recv().map_err(|_| Error::NotListening)?;

            debug!(%addr, ?mode, "accepting connection");
            *self.shared.accepting.lock().unwrap() = Some(addr);
            let handshake = complete_handshake(host, addr);
            *self.shared.accepting.lock().unwrap() = None;

            let socket = match handshake {
                Ok(Some(socket)) => socket,
                Ok(None) => {
                    debug!(%addr, "handshake never completed, abandoning peer");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut endpoint = Endpoint::from_socket(socket);
            *endpoint.shared.host.lock().unwrap() = Some(host);
            *endpoint.shared.peer.lock().unwrap() = Some(addr);
            endpoint.shared.set_mode(mode);
            endpoint.start();

            info!(peer = %addr, ?mode, "connection accepted");
            return Ok(endpoint);
        }
    }

    /// Active open against `addr`, negotiating `mode`. The SYN is resent
    /// once per read-timeout tick until the SYN|ACK arrives.
    pub fn connect(addr: impl ToSocketAddrs, mode: RecoveryMode) -> Result<Endpoint, Error> {
        let server = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to")
        })?;

        let bind_addr: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let mut endpoint = Endpoint::from_socket(UdpSocket::bind(bind_addr)?);
        endpoint.start();

        debug!(%server, ?mode, "attempting to establish a connection");

        let syn = Packet::syn(mode.to_payload().to_vec());
        let deadline = Instant::now() + CONNECTION_TIMEOUT;

        let mut peer = endpoint.shared.peer.lock().unwrap();
        while peer.is_none() {
            if Instant::now() > deadline {
                drop(peer);
                endpoint.close();
                return Err(Error::HandshakeTimeout(server));
            }

            if let Err(err) = endpoint.shared.send_packet(&syn, server) {
                drop(peer);
                endpoint.close();
                return Err(err.into());
            }

            let (guard, _timed_out) = endpoint
                .shared
                .peer_var
                .wait_timeout(peer, SOCKET_TIMEOUT)
                .unwrap();
            peer = guard;
        }
        let peer_addr = peer.unwrap();
        drop(peer);

        endpoint.shared.set_mode(mode);

        info!(peer = %peer_addr, ?mode, "connection established");
        Ok(endpoint)
    }

    /// Transmits the whole buffer, blocking until every byte has been
    /// cumulatively acknowledged. Fails if the peer stops acknowledging for
    /// the connection timeout.
    pub fn send_all(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        if self.closed {
            return Err(Error::NotConnected);
        }
        let peer = self.shared.peer().ok_or(Error::NotConnected)?;

        // Base of this call within the stream; `cursor` is the sender's
        // local copy of the shared send cursor.
        let offset = self.shared.sequence.send();
        let mut cursor = offset;
        let mut acked = self.shared.sequence.ack();
        let mut progress_deadline = Instant::now() + CONNECTION_TIMEOUT;

        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return Err(Error::PeerClosed);
            }

            let start = cursor.wrapping_sub(offset) as usize;
            let window = self.shared.window.size().max(0) as usize;
            let len = cmp::min(MSS, cmp::min(window, data.len() - start));

            if len > 0 {
                let packet = Packet::data(cursor, &data[start..start + len]);
                self.shared.send_packet(&packet, peer)?;
                debug!(%packet, %peer, "SENT");

                // Arm the timer only when this segment opened the pipeline.
                if self.shared.sequence.are_equal() {
                    self.shared.timer.set();
                }
                self.shared.window.decrease(len);
            } else if !self.shared.timer.is_set() {
                self.shared.timer.set();
            }

            let advanced = offset.wrapping_add((start + len) as u32);
            let (next, ack) = self.shared.sequence.sync_send(cursor, advanced);
            cursor = next;

            if ack.wrapping_sub(offset) as usize == data.len() {
                return Ok(());
            }

            if ack != acked {
                acked = ack;
                progress_deadline = Instant::now() + CONNECTION_TIMEOUT;
            } else if Instant::now() > progress_deadline {
                return Err(Error::AckTimeout);
            }

            if len == 0 {
                // Window closed, or everything is in flight: park until an
                // ACK reopens it, at most one smoothed round trip.
                self.shared.window.wait_until_non_empty(self.shared.timer.srtt());
            }
        }
    }

    /// Reads exactly `size` bytes, blocking until they have all arrived.
    /// Bytes accumulated before a failure stay buffered in the endpoint.
    pub fn recv(&mut self, size: usize) -> Result<Vec<u8>, Error> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if self.closed {
            return Err(Error::NotConnected);
        }

        let mut buffer = Vec::with_capacity(size);

        // Serve what a previous call over-read first.
        if !self.stash.is_empty() {
            let take = cmp::min(size, self.stash.len());
            buffer.extend(self.stash.drain(..take));
        }

        while buffer.len() < size {
            match self.dequeue() {
                Ok(payload) => buffer.extend_from_slice(&payload),
                Err(err) => {
                    self.stash = buffer;
                    return Err(err);
                }
            }
        }

        if buffer.len() > size {
            self.stash = buffer.split_off(size);
        }

        Ok(buffer)
    }

    /// Takes the next in-order payload off the receive queue, giving up
    /// after the connection timeout. Wakes once per read tick to notice a
    /// FIN or a dead loop early.
    fn dequeue(&self) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + CONNECTION_TIMEOUT;

        loop {
            match self.data_rx.recv_timeout(SOCKET_TIMEOUT) {
                Ok(payload) => return Ok(payload),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::PeerClosed),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.close_state.lock().unwrap().peer_fin_received {
                        return Err(Error::PeerClosed);
                    }
                    if Instant::now() > deadline {
                        return Err(Error::ReceiveTimeout);
                    }
                }
            }
        }
    }

    /// Runs the FIN exchange with the peer (when there is one), then stops
    /// the background loops and releases the socket. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(peer) = self.shared.peer() {
            self.shared.closing.store(true, Ordering::Release);
            let srtt = self.shared.timer.srtt();
            let mut last_fin: Option<Instant> = None;

            let mut close_state = self.shared.close_state.lock().unwrap();
            for _ in 0..CLOSING_LOOP_LIMIT {
                if close_state.fin_acked && close_state.peer_fin_received {
                    break;
                }

                if !close_state.fin_acked
                    && last_fin.map_or(true, |at| at.elapsed() > srtt * 2)
                {
                    let fin = Packet::fin(self.shared.sequence.send());
                    if self.shared.send_packet(&fin, peer).is_err() {
                        break;
                    }
                    debug!(%peer, "FIN sent");
                    last_fin = Some(Instant::now());
                }

                let (guard, _timed_out) = self
                    .shared
                    .close_var
                    .wait_timeout(close_state, SOCKET_TIMEOUT)
                    .unwrap();
                close_state = guard;
            }
        }

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.accept_tx.lock().unwrap().take();

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        debug!("endpoint closed");
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// The connected peer, once the handshake has fixed it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

/// Passive-side handshake on a fresh socket: resend SYN|ACK until the
/// peer's plain ACK arrives. `Ok(None)` means the peer went silent.
fn complete_handshake(host: IpAddr, addr: SocketAddr) -> io::Result<Option<UdpSocket>> {
    let socket = UdpSocket::bind((host, 0))?;
    socket.set_read_timeout(Some(SOCKET_TIMEOUT))?;

    let syn_ack = Packet::control(Flags::SYN | Flags::ACK).encode();
    let deadline = Instant::now() + CONNECTION_TIMEOUT;
    let mut buf = [0u8; MAX_DATAGRAM];

    while Instant::now() < deadline {
        socket.send_to(&syn_ack, addr)?;

        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(read) => read,
            Err(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(err) => return Err(err),
        };

        let Some(packet) = Packet::decode(&buf[..n]) else {
            continue;
        };

        if from == addr
            && packet.flags.contains(Flags::ACK)
            && !packet.flags.intersects(Flags::SYN | Flags::FIN)
        {
            return Ok(Some(socket));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::thread;

    use super::*;

    #[test]
    fn clean_transfer_updates_both_cursors() {
        let mut listener = Endpoint::bind("127.0.0.1:0").unwrap();
        listener.listen(0);
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let mut peer = listener.accept().unwrap();
            let data = peer.recv(11).unwrap();
            assert_eq!(data, b"HELLO WORLD");
            assert_eq!(peer.shared.received_ack.load(Ordering::Acquire), 11);
            (listener, peer)
        });

        let mut client =
            Endpoint::connect(("127.0.0.1", port), RecoveryMode::GoBackN).unwrap();
        client.send_all(b"HELLO WORLD").unwrap();
        assert_eq!(client.shared.sequence.ack(), 11);

        let (mut listener, mut peer) = server.join().unwrap();
        client.close();
        peer.close();
        listener.close();
    }

    #[test]
    fn zero_byte_operations_return_immediately() {
        let mut endpoint = Endpoint::bind("127.0.0.1:0").unwrap();
        endpoint.send_all(b"").unwrap();
        assert_eq!(endpoint.recv(0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn data_calls_need_a_peer() {
        let mut endpoint = Endpoint::bind("127.0.0.1:0").unwrap();
        assert!(matches!(
            endpoint.send_all(b"x"),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn accept_needs_listen_first() {
        let mut endpoint = Endpoint::bind("127.0.0.1:0").unwrap();
        assert!(matches!(endpoint.accept(), Err(Error::NotListening)));
    }
}
