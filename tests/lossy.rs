//! Retransmission runs through a relay that drops or reorders datagrams.
//! The relay is part of the harness: the endpoints under test only ever see
//! a normal UDP peer.

use std::collections::HashSet;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rdtp::{Endpoint, RecoveryMode};

enum RelayAction {
    Forward,
    Drop,
    /// Hold the datagram back until the next forwarded one has gone out.
    Delay,
}

/// Forwards datagrams between the connecting client (the first sender seen)
/// and the server side, consulting `policy` for each one.
fn spawn_relay<F>(server: SocketAddr, mut policy: F) -> SocketAddr
where
    F: FnMut(&[u8], bool) -> RelayAction + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let relay_addr = socket.local_addr().unwrap();

    thread::spawn(move || {
        let mut client: Option<SocketAddr> = None;
        let mut server_target = server;
        let mut held: Vec<(Vec<u8>, bool)> = Vec::new();
        let mut buf = [0u8; 2048];

        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf) else {
                return;
            };
            let datagram = buf[..n].to_vec();

            let from_client = match client {
                Some(addr) => from == addr,
                None => {
                    client = Some(from);
                    true
                }
            };
            if !from_client {
                // The server answers from an ephemeral socket; route the
                // client's traffic there from now on.
                server_target = from;
            }

            match policy(&datagram, from_client) {
                RelayAction::Drop => continue,
                RelayAction::Delay => held.push((datagram, from_client)),
                RelayAction::Forward => {
                    let dest = |to_server: bool| {
                        if to_server {
                            server_target
                        } else {
                            client.unwrap()
                        }
                    };
                    let _ = socket.send_to(&datagram, dest(from_client));
                    for (late, late_from_client) in held.drain(..) {
                        let _ = socket.send_to(&late, dest(late_from_client));
                    }
                }
            }
        }
    });

    relay_addr
}

/// Sequence number of a data segment, if that is what the datagram carries.
fn data_seq(datagram: &[u8]) -> Option<u32> {
    if datagram.len() > 5 && datagram[4] == 0 {
        Some(u32::from_be_bytes(datagram[..4].try_into().unwrap()))
    } else {
        None
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn serve_one(mut listener: Endpoint, len: usize, expected: Vec<u8>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut peer = listener.accept().unwrap();
        let received = peer.recv(len).unwrap();
        assert_eq!(received, expected);
        peer.close();
        listener.close();
    })
}

#[test]
fn dropped_segment_is_retransmitted() {
    let mut listener = Endpoint::bind("127.0.0.1:0").unwrap();
    listener.listen(0);
    let server_addr = listener.local_addr().unwrap();

    let dropped = Arc::new(AtomicBool::new(false));
    let seen: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));

    let relay = {
        let dropped = dropped.clone();
        let seen = seen.clone();
        spawn_relay(server_addr, move |datagram, from_client| {
            if from_client {
                if let Some(seq) = data_seq(datagram) {
                    seen.lock().unwrap().insert(seq);
                    if seq == 1400 && !dropped.swap(true, Ordering::SeqCst) {
                        return RelayAction::Drop;
                    }
                }
            }
            RelayAction::Forward
        })
    };

    let data = pattern(4096);
    let server = serve_one(listener, data.len(), data.clone());

    let mut client = Endpoint::connect(relay, RecoveryMode::GoBackN).unwrap();
    client.send_all(&data).unwrap();
    client.close();
    server.join().unwrap();

    assert!(dropped.load(Ordering::SeqCst));
    let seen = seen.lock().unwrap();
    for seq in [0, 1400, 2800] {
        assert!(seen.contains(&seq), "no data segment with seq {seq}");
    }
}

#[test]
fn duplicate_acks_trigger_fast_retransmit() {
    let mut listener = Endpoint::bind("127.0.0.1:0").unwrap();
    listener.listen(0);
    let server_addr = listener.local_addr().unwrap();

    let dropped = Arc::new(AtomicBool::new(false));

    let relay = {
        let dropped = dropped.clone();
        spawn_relay(server_addr, move |datagram, from_client| {
            if from_client
                && data_seq(datagram) == Some(1400)
                && !dropped.swap(true, Ordering::SeqCst)
            {
                return RelayAction::Drop;
            }
            RelayAction::Forward
        })
    };

    // Enough segments behind the dropped one to produce more duplicate
    // cumulative ACKs than the go-back-N threshold tolerates.
    let data = pattern(16 * 1024);
    let server = serve_one(listener, data.len(), data.clone());

    let mut client = Endpoint::connect(relay, RecoveryMode::GoBackN).unwrap();
    client.send_all(&data).unwrap();
    client.close();
    server.join().unwrap();

    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn reordered_segments_are_recovered() {
    let mut listener = Endpoint::bind("127.0.0.1:0").unwrap();
    listener.listen(0);
    let server_addr = listener.local_addr().unwrap();

    let delayed = Arc::new(AtomicBool::new(false));

    let relay = {
        let delayed = delayed.clone();
        spawn_relay(server_addr, move |datagram, from_client| {
            if from_client {
                if let Some(seq) = data_seq(datagram) {
                    // Hold the first segment back so its successor arrives
                    // ahead of it.
                    if seq == 0 && !delayed.swap(true, Ordering::SeqCst) {
                        return RelayAction::Delay;
                    }
                }
            }
            RelayAction::Forward
        })
    };

    let data = pattern(2800);
    let server = serve_one(listener, data.len(), data.clone());

    let mut client = Endpoint::connect(relay, RecoveryMode::GoBackN).unwrap();
    client.send_all(&data).unwrap();
    client.close();
    server.join().unwrap();

    assert!(delayed.load(Ordering::SeqCst));
}

#[test]
fn stop_and_wait_survives_a_drop() {
    let mut listener = Endpoint::bind("127.0.0.1:0").unwrap();
    listener.listen(0);
    let server_addr = listener.local_addr().unwrap();

    let dropped = Arc::new(AtomicBool::new(false));

    let relay = {
        let dropped = dropped.clone();
        spawn_relay(server_addr, move |datagram, from_client| {
            if from_client && data_seq(datagram) == Some(1400)
                && !dropped.swap(true, Ordering::SeqCst)
            {
                return RelayAction::Drop;
            }
            RelayAction::Forward
        })
    };

    let data = pattern(3000);
    let server = serve_one(listener, data.len(), data.clone());

    let mut client = Endpoint::connect(relay, RecoveryMode::StopAndWait).unwrap();
    client.send_all(&data).unwrap();
    client.close();
    server.join().unwrap();

    assert!(dropped.load(Ordering::SeqCst));
}
