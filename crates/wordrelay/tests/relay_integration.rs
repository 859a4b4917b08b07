#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests over real TCP sockets.
//!
//! Each test binds a relay on an ephemeral port with a file-backed store
//! and drives it with plain framed clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use wordrelay::manager::SessionRegistry;
use wordrelay::registry::{DeviceDirectory, SocketPool};
use wordrelay::server::{ConnectionSettings, RelayServer, spawn_timer_dispatch};
use wordrelay::session::RelayContext;
use wordrelay::storage::RelayDatabase;
use wordrelay::timers::TimerService;
use wordrelay_core::config::SessionConfig;
use wordrelay_proto::codes::PROTO_VERSION;
use wordrelay_proto::framing::{read_frame, write_frame};
use wordrelay_proto::writer::FrameWriter;
use wordrelay_proto::{Reason, RelayCmd};

struct Relay {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    _dir: tempfile::TempDir,
}

async fn start_relay() -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let db = RelayDatabase::open(&dir.path().join("relay.db")).await.unwrap();
    let (timers, fired_rx) = TimerService::new();
    let ctx = RelayContext::new(
        db,
        SocketPool::new(),
        DeviceDirectory::new(),
        timers,
        SessionConfig::default(),
    );
    let registry = Arc::new(SessionRegistry::new(ctx));
    spawn_timer_dispatch(Arc::clone(&registry), fired_rx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(RelayServer::new(
        Arc::clone(&registry),
        ConnectionSettings::default(),
    ));
    tokio::spawn(server.serve(listener));

    Relay {
        addr,
        registry,
        _dir: dir,
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(relay: &Relay) -> Self {
        Self {
            stream: TcpStream::connect(relay.addr).await.unwrap(),
        }
    }

    async fn send(&mut self, frame: &[u8]) {
        write_frame(&mut self.stream, frame).await.unwrap();
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.stream, 4096))
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
    }

    async fn expect(&mut self, cmd: RelayCmd) -> Vec<u8> {
        loop {
            let frame = self.recv().await.expect("relay closed the socket");
            if frame[0] == cmd.as_u8() {
                return frame;
            }
        }
    }

    /// Join, acknowledge, and return (host id, room id).
    async fn join(&mut self, seed: u16) -> (u8, u16) {
        self.send(&connect_frame(seed)).await;
        let resp = self.expect(RelayCmd::ConnectResp).await;
        let host_id = resp[1];
        self.send(&[RelayCmd::Ack.as_u8(), host_id]).await;
        (host_id, u16::from_be_bytes([resp[2], resp[3]]))
    }
}

fn connect_frame(seed: u16) -> Vec<u8> {
    FrameWriter::new(RelayCmd::GameConnect)
        .u8(PROTO_VERSION)
        .u16(3)
        .string("lobby")
        .u8(0)
        .u8(0)
        .u8(1)
        .u8(2)
        .u16(seed)
        .u8(1)
        .finish()
}

fn reconnect_frame(host_id: u8, seed: u16, conn_name: &str) -> Vec<u8> {
    FrameWriter::new(RelayCmd::GameReconnect)
        .u8(PROTO_VERSION)
        .u16(3)
        .string("lobby")
        .u8(0)
        .u8(0)
        .u8(host_id)
        .u8(1)
        .u8(2)
        .u16(seed)
        .u8(1)
        .string(conn_name)
        .finish()
}

fn message(cid: u16, src: u8, dest: u8, payload: &[u8]) -> Vec<u8> {
    FrameWriter::new(RelayCmd::MsgToRelay)
        .u16(cid)
        .u8(src)
        .u8(dest)
        .bytes(payload)
        .finish()
}

/// Connection name carried by an all-here frame.
fn all_here_name(frame: &[u8]) -> String {
    let len = usize::from(frame[2]);
    String::from_utf8(frame[3..3 + len].to_vec()).unwrap()
}

#[tokio::test]
async fn game_runs_end_to_end() {
    let relay = start_relay().await;
    let mut a = Client::connect(&relay).await;
    let mut b = Client::connect(&relay).await;

    let (a_hid, cid) = a.join(0x11).await;
    let (b_hid, _) = b.join(0x22).await;
    a.expect(RelayCmd::AllHere).await;
    b.expect(RelayCmd::AllHere).await;

    a.send(&message(cid, a_hid, b_hid, b"hello")).await;
    let got = b.expect(RelayCmd::MsgFromRelay).await;
    assert!(got.ends_with(b"hello"));

    b.send(&message(cid, b_hid, a_hid, b"hi back")).await;
    let got = a.expect(RelayCmd::MsgFromRelay).await;
    assert!(got.ends_with(b"hi back"));

    // Leaving politely tells the other host.
    let disconnect = FrameWriter::new(RelayCmd::GameDisconnect)
        .u16(cid)
        .u8(b_hid)
        .finish();
    b.send(&disconnect).await;
    assert_eq!(
        a.expect(RelayCmd::DisconnectOther).await,
        vec![
            RelayCmd::DisconnectOther.as_u8(),
            Reason::OtherDiscon.as_u8(),
            b_hid
        ]
    );
    assert!(b.recv().await.is_none());
}

#[tokio::test]
async fn messages_wait_for_host_that_reconnects() {
    let relay = start_relay().await;
    let mut a = Client::connect(&relay).await;
    let mut b = Client::connect(&relay).await;

    let (a_hid, cid) = a.join(0x31).await;
    let (b_hid, _) = b.join(0x32).await;
    let conn_name = all_here_name(&a.expect(RelayCmd::AllHere).await);
    b.expect(RelayCmd::AllHere).await;

    // B's connection drops; A hears about it.
    drop(b);
    let lost = a.expect(RelayCmd::DisconnectOther).await;
    assert_eq!(lost[1], Reason::LostOther.as_u8());
    assert_eq!(lost[2], b_hid);

    a.send(&message(cid, a_hid, b_hid, b"while you were out")).await;

    let mut b = Client::connect(&relay).await;
    b.send(&reconnect_frame(b_hid, 0x32, &conn_name)).await;
    let resp = b.expect(RelayCmd::ReconnectResp).await;
    assert_eq!(resp[1], b_hid);

    let got = b.expect(RelayCmd::MsgFromRelay).await;
    assert!(got.ends_with(b"while you were out"));
    assert_eq!(relay.registry.room_count().await, 1);
}

#[tokio::test]
async fn shutdown_disconnects_everyone() {
    let relay = start_relay().await;
    let mut a = Client::connect(&relay).await;
    let mut b = Client::connect(&relay).await;
    a.join(0x41).await;
    b.join(0x42).await;
    a.expect(RelayCmd::AllHere).await;
    b.expect(RelayCmd::AllHere).await;

    relay.registry.shutdown_all().await;

    assert_eq!(
        a.expect(RelayCmd::DisconnectYou).await,
        vec![RelayCmd::DisconnectYou.as_u8(), Reason::Shutdown.as_u8()]
    );
    assert!(a.recv().await.is_none());
    assert_eq!(relay.registry.room_count().await, 0);
}
