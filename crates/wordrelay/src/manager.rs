//! Registry of live rooms.
//!
//! The registry owns every [`Session`]. Callers never touch a session
//! directly: they get a [`SafeHandle`], which holds that room's lock for as
//! long as it lives. A room is deleted when it is released empty.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use wordrelay_proto::codes::HOST_ID_NONE;
use wordrelay_proto::outbound::encode_denied;
use wordrelay_proto::{JoinRequest, Reason, RejoinRequest};

use crate::session::{
    Address, ConnId, CookieId, HostId, JoinArgs, RelayContext, Session, SessionError,
    SessionSnapshot,
};
use crate::storage::DatabaseError;
use crate::timers::FiredTimer;

/// Attempts at finding a room before giving up on a connect.
const CONNECT_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("No room with id {0}")]
    UnknownRoom(CookieId),

    #[error("No game named {0}")]
    UnknownGame(String),

    #[error("Socket {0} is not in a room")]
    UnknownSocket(ConnId),

    #[error("Room {0} was deleted")]
    Gone(CookieId),
}

/// Exclusive access to one session. Dropping it releases the room.
pub struct SafeHandle {
    guard: OwnedMutexGuard<Session>,
}

impl SafeHandle {
    async fn acquire(session: Arc<Mutex<Session>>) -> Result<Self, RegistryError> {
        let guard = session.lock_owned().await;
        if guard.is_retired() {
            return Err(RegistryError::Gone(guard.cid()));
        }
        Ok(Self { guard })
    }
}

impl Deref for SafeHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SafeHandle {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

#[derive(Clone)]
struct RoomEntry {
    session: Arc<Mutex<Session>>,
    cookie: String,
    lang: u8,
    n_total: u8,
    conn_name: Option<String>,
}

pub struct SessionRegistry {
    ctx: RelayContext,
    rooms: RwLock<HashMap<CookieId, RoomEntry>>,
    /// Room each socket joined.
    conns: RwLock<HashMap<ConnId, CookieId>>,
    next_cid: AtomicU16,
}

impl SessionRegistry {
    pub fn new(ctx: RelayContext) -> Self {
        Self {
            ctx,
            rooms: RwLock::new(HashMap::new()),
            conns: RwLock::new(HashMap::new()),
            next_cid: AtomicU16::new(1),
        }
    }

    pub const fn context(&self) -> &RelayContext {
        &self.ctx
    }

    // === Joining ===

    /// Put a device into an open room for its cookie, creating one if
    /// needed. Returns whether it was admitted.
    pub async fn connect(&self, join: &JoinRequest, addr: Address) -> Result<bool, RegistryError> {
        let args = JoinArgs {
            addr,
            host: HOST_ID_NONE,
            n_here: join.n_here,
            n_total: join.n_total,
            seed: join.seed,
            lang: join.lang,
            client_version: join.client_version,
            devid: join.devid.clone(),
        };

        for _ in 0..CONNECT_ATTEMPTS {
            let mut handle = match self.open_room(join).await {
                Ok(handle) => handle,
                Err(RegistryError::Gone(cid)) => {
                    debug!(cid, "Room went away while joining, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let result = handle.connect(args.clone()).await;
            if matches!(result, Ok(true)) {
                self.conns.write().await.insert(addr.conn, handle.cid());
            }
            self.release(handle).await;
            return Ok(result?);
        }

        warn!(addr = %addr, cookie = %join.cookie, "No room could be joined");
        self.deny(addr, Reason::RelayBusy).await;
        Ok(false)
    }

    /// Rejoin the game named in the request, restoring it from the store if
    /// no live room has it.
    pub async fn reconnect(&self, rejoin: &RejoinRequest, addr: Address) -> Result<bool, RegistryError> {
        let join = &rejoin.join;
        let args = JoinArgs {
            addr,
            host: rejoin.host_id,
            n_here: join.n_here,
            n_total: join.n_total,
            seed: join.seed,
            lang: join.lang,
            client_version: join.client_version,
            devid: join.devid.clone(),
        };

        let Some(mut handle) = self.room_by_name(&rejoin.conn_name).await? else {
            info!(conn_name = %rejoin.conn_name, addr = %addr, "Reconnect to unknown game");
            self.deny(addr, Reason::NoReconnect).await;
            return Ok(false);
        };
        let result = handle.reconnect(args, false).await;
        if matches!(result, Ok(true)) {
            self.conns.write().await.insert(addr.conn, handle.cid());
        }
        self.release(handle).await;
        Ok(result?)
    }

    // === In-room traffic ===

    pub async fn handle_ack(&self, addr: Address, host: HostId) -> Result<(), RegistryError> {
        let cid = self
            .conns
            .read()
            .await
            .get(&addr.conn)
            .copied()
            .ok_or(RegistryError::UnknownSocket(addr.conn))?;
        let mut handle = self.room_by_cid(cid).await?;
        let result = handle.handle_ack(host, addr).await;
        self.release(handle).await;
        Ok(result?)
    }

    pub async fn heartbeat(&self, cid: CookieId, host: HostId, addr: Address) -> Result<(), RegistryError> {
        let mut handle = self.room_by_cid(cid).await?;
        let result = handle.handle_heartbeat(host, addr).await;
        self.release(handle).await;
        Ok(result?)
    }

    pub async fn disconnect(&self, cid: CookieId, host: HostId, addr: Address) -> Result<(), RegistryError> {
        let mut handle = self.room_by_cid(cid).await?;
        let result = handle.disconnect(addr, host).await;
        self.conns.write().await.remove(&addr.conn);
        self.release(handle).await;
        Ok(result?)
    }

    pub async fn put_message(
        &self,
        cid: CookieId,
        addr: Address,
        src: HostId,
        dest: HostId,
        frame: Vec<u8>,
    ) -> Result<(), RegistryError> {
        let mut handle = self.room_by_cid(cid).await?;
        let result = handle.put_message(addr, src, dest, frame).await;
        self.release(handle).await;
        Ok(result?)
    }

    /// Message addressed by game name rather than room id.
    pub async fn forward(
        &self,
        conn_name: &str,
        addr: Address,
        src: HostId,
        dest: HostId,
        frame: Vec<u8>,
    ) -> Result<(), RegistryError> {
        let mut handle = self
            .room_by_name(conn_name)
            .await?
            .ok_or_else(|| RegistryError::UnknownGame(conn_name.to_owned()))?;
        let result = handle.forward(addr, src, dest, frame).await;
        self.release(handle).await;
        Ok(result?)
    }

    pub async fn device_gone(&self, conn_name: &str, host: HostId, seed: u16) -> Result<(), RegistryError> {
        let mut handle = self
            .room_by_name(conn_name)
            .await?
            .ok_or_else(|| RegistryError::UnknownGame(conn_name.to_owned()))?;
        let result = handle.device_gone(host, seed).await;
        self.release(handle).await;
        Ok(result?)
    }

    /// The connection behind `addr` ended.
    pub async fn socket_closed(&self, addr: Address) -> Result<(), RegistryError> {
        let Some(cid) = self.conns.write().await.remove(&addr.conn) else {
            return Ok(());
        };
        let mut handle = match self.room_by_cid(cid).await {
            Ok(handle) => handle,
            Err(RegistryError::UnknownRoom(_) | RegistryError::Gone(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let result = handle.remove_socket(addr).await;
        self.release(handle).await;
        Ok(result?)
    }

    // === Housekeeping ===

    pub async fn on_timer(&self, fired: FiredTimer) -> Result<(), RegistryError> {
        let mut handle = match self.room_by_cid(fired.key.cid).await {
            Ok(handle) => handle,
            Err(RegistryError::UnknownRoom(_) | RegistryError::Gone(_)) => {
                debug!(cid = fired.key.cid, "Timer for deleted room ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let result = handle.on_timer(fired).await;
        self.release(handle).await;
        Ok(result?)
    }

    /// Sweep every room for hosts that stopped sending heartbeats.
    pub async fn check_heartbeats(&self, now: Instant) {
        for (cid, entry) in self.entries().await {
            let Ok(mut handle) = SafeHandle::acquire(entry.session).await else {
                continue;
            };
            if let Err(e) = handle.check_heartbeats(now).await {
                warn!(cid, error = %e, "Heartbeat sweep failed");
            }
            self.release(handle).await;
        }
    }

    pub async fn shutdown_all(&self) {
        let entries = self.entries().await;
        info!(rooms = entries.len(), "Shutting down all rooms");
        for (cid, entry) in entries {
            let Ok(mut handle) = SafeHandle::acquire(entry.session).await else {
                continue;
            };
            if let Err(e) = handle.shutdown().await {
                warn!(cid, error = %e, "Room shutdown failed");
            }
            self.release(handle).await;
        }
    }

    pub async fn snapshots(&self, now: Instant) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for (_, entry) in self.entries().await {
            if let Ok(handle) = SafeHandle::acquire(entry.session).await {
                match handle.snapshot(now).await {
                    Ok(snap) => snapshots.push(snap),
                    Err(e) => warn!(cid = handle.cid(), error = %e, "Room snapshot failed"),
                }
            }
        }
        snapshots.sort_by_key(|s| s.cid);
        snapshots
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // === Lookup ===

    async fn entries(&self) -> Vec<(CookieId, RoomEntry)> {
        self.rooms
            .read()
            .await
            .iter()
            .map(|(cid, entry)| (*cid, entry.clone()))
            .collect()
    }

    async fn room_by_cid(&self, cid: CookieId) -> Result<SafeHandle, RegistryError> {
        let session = self
            .rooms
            .read()
            .await
            .get(&cid)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or(RegistryError::UnknownRoom(cid))?;
        SafeHandle::acquire(session).await
    }

    async fn live_by_name(&self, conn_name: &str) -> Option<Arc<Mutex<Session>>> {
        self.rooms
            .read()
            .await
            .values()
            .find(|entry| entry.conn_name.as_deref() == Some(conn_name))
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Live room for a game, else the game restored from the store.
    async fn room_by_name(&self, conn_name: &str) -> Result<Option<SafeHandle>, RegistryError> {
        if let Some(session) = self.live_by_name(conn_name).await {
            match SafeHandle::acquire(session).await {
                Ok(handle) => return Ok(Some(handle)),
                Err(RegistryError::Gone(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let Some(game) = self.ctx.db.find_game(conn_name).await? else {
            return Ok(None);
        };

        let mut rooms = self.rooms.write().await;
        if let Some(entry) = rooms
            .values()
            .find(|entry| entry.conn_name.as_deref() == Some(conn_name))
        {
            let session = Arc::clone(&entry.session);
            drop(rooms);
            return SafeHandle::acquire(session).await.map(Some);
        }

        let cid = self.allocate_cid(&rooms);
        let lang = u8::try_from(game.lang).unwrap_or_default();
        let n_total = u8::try_from(game.n_total).unwrap_or_default();
        let session = Session::restored(
            self.ctx.clone(),
            game.cookie.clone(),
            game.conn_name.clone(),
            cid,
            lang,
            n_total,
            game.is_dead(),
        );
        let session = Arc::new(Mutex::new(session));
        rooms.insert(
            cid,
            RoomEntry {
                session: Arc::clone(&session),
                cookie: game.cookie,
                lang,
                n_total,
                conn_name: Some(game.conn_name),
            },
        );
        drop(rooms);

        self.ctx.db.set_game_cid(conn_name, cid).await?;
        info!(cid, conn_name = %conn_name, "Game restored from store");
        SafeHandle::acquire(session).await.map(Some)
    }

    /// A locked room that can take this connect: the room the store has
    /// already seen the device's seed in, an open room for the same cookie,
    /// or a new one.
    async fn open_room(&self, join: &JoinRequest) -> Result<SafeHandle, RegistryError> {
        if let Some(conn_name) = self
            .ctx
            .db
            .find_game_by_seed(&join.cookie, join.lang, join.n_total, join.seed)
            .await?
        {
            if let Some(session) = self.live_by_name(&conn_name).await {
                debug!(conn_name = %conn_name, seed = join.seed, "Seed seen before in live room");
                return SafeHandle::acquire(session).await;
            }
        }

        let candidates: Vec<_> = self
            .entries()
            .await
            .into_iter()
            .filter(|(_, e)| e.cookie == join.cookie && e.lang == join.lang && e.n_total == join.n_total)
            .collect();
        for (_, entry) in candidates {
            let Ok(handle) = SafeHandle::acquire(entry.session).await else {
                continue;
            };
            if handle.has_room_for(join.n_here) {
                return Ok(handle);
            }
        }

        let mut rooms = self.rooms.write().await;
        let cid = self.allocate_cid(&rooms);
        let session = Session::new(self.ctx.clone(), join.cookie.clone(), cid, join.lang, join.n_total);
        let session = Arc::new(Mutex::new(session));
        rooms.insert(
            cid,
            RoomEntry {
                session: Arc::clone(&session),
                cookie: join.cookie.clone(),
                lang: join.lang,
                n_total: join.n_total,
                conn_name: None,
            },
        );
        drop(rooms);

        info!(cid, cookie = %join.cookie, n_total = join.n_total, "Room created");
        SafeHandle::acquire(session).await
    }

    fn allocate_cid(&self, rooms: &HashMap<CookieId, RoomEntry>) -> CookieId {
        loop {
            let cid = self.next_cid.fetch_add(1, Ordering::Relaxed);
            if cid != 0 && !rooms.contains_key(&cid) {
                return cid;
            }
        }
    }

    /// Release a room, deleting it when nobody is left in it.
    async fn release(&self, mut handle: SafeHandle) {
        let cid = handle.cid();
        if handle.should_die() {
            handle.retire();
            self.rooms.write().await.remove(&cid);
            self.conns.write().await.retain(|_, room| *room != cid);
            info!(cid, "Room deleted");
            return;
        }

        let Some(conn_name) = handle.conn_name() else {
            return;
        };
        let known = self
            .rooms
            .read()
            .await
            .get(&cid)
            .is_some_and(|entry| entry.conn_name.is_some());
        if !known {
            if let Some(entry) = self.rooms.write().await.get_mut(&cid) {
                entry.conn_name = Some(conn_name.to_owned());
            }
        }
    }

    async fn deny(&self, addr: Address, reason: Reason) {
        self.ctx.sockets.send(addr, &encode_denied(reason)).await;
        self.ctx.sockets.close(addr).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceDirectory, SocketPool};
    use crate::session::{ClientToken, SessionState};
    use crate::storage::RelayDatabase;
    use crate::timers::TimerService;
    use tokio::sync::mpsc;
    use wordrelay_core::config::SessionConfig;
    use wordrelay_proto::codes::RelayCmd;

    async fn registry() -> SessionRegistry {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        let (timers, _fired) = TimerService::new();
        let ctx = RelayContext::new(
            db,
            SocketPool::new(),
            DeviceDirectory::new(),
            timers,
            SessionConfig::default(),
        );
        SessionRegistry::new(ctx)
    }

    async fn socket(reg: &SessionRegistry, conn: u64) -> (Address, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(32);
        reg.context().sockets.register(ConnId(conn), tx).await;
        (Address::new(ConnId(conn), ClientToken(7)), rx)
    }

    fn join(cookie: &str, seed: u16, n_total: u8) -> JoinRequest {
        JoinRequest {
            proto: wordrelay_proto::codes::PROTO_VERSION,
            client_version: 1,
            cookie: cookie.into(),
            seeks_public: false,
            advertise: false,
            n_here: 1,
            n_total,
            seed,
            lang: 1,
            devid: None,
        }
    }

    #[tokio::test]
    async fn connects_share_a_room_until_full() {
        let reg = registry().await;
        let (a, _a_rx) = socket(&reg, 1).await;
        let (b, _b_rx) = socket(&reg, 2).await;
        let (c, _c_rx) = socket(&reg, 3).await;

        assert!(reg.connect(&join("room", 1, 2), a).await.unwrap());
        assert!(reg.connect(&join("room", 2, 2), b).await.unwrap());
        assert_eq!(reg.room_count().await, 1);

        // Room is full; the third device opens a second room.
        assert!(reg.connect(&join("room", 3, 2), c).await.unwrap());
        assert_eq!(reg.room_count().await, 2);

        let snaps = reg.snapshots(Instant::now()).await;
        assert_eq!(snaps[0].players_here, 2);
        assert_eq!(snaps[0].state, SessionState::AllHere);
        assert_eq!(snaps[1].players_here, 1);
    }

    #[tokio::test]
    async fn different_cookies_get_different_rooms() {
        let reg = registry().await;
        let (a, _a_rx) = socket(&reg, 1).await;
        let (b, _b_rx) = socket(&reg, 2).await;

        reg.connect(&join("north", 1, 2), a).await.unwrap();
        reg.connect(&join("south", 2, 2), b).await.unwrap();
        assert_eq!(reg.room_count().await, 2);
    }

    #[tokio::test]
    async fn closing_last_socket_deletes_room() {
        let reg = registry().await;
        let (a, _a_rx) = socket(&reg, 1).await;
        reg.connect(&join("room", 1, 2), a).await.unwrap();
        assert_eq!(reg.room_count().await, 1);

        reg.socket_closed(a).await.unwrap();
        assert_eq!(reg.room_count().await, 0);
        assert!(matches!(
            reg.handle_ack(a, 1).await,
            Err(RegistryError::UnknownSocket(_))
        ));
    }

    #[tokio::test]
    async fn reconnect_restores_game_from_store() {
        let reg = registry().await;
        let (a, mut a_rx) = socket(&reg, 1).await;
        reg.connect(&join("room", 0x10, 2), a).await.unwrap();
        reg.handle_ack(a, 1).await.unwrap();
        let conn_name = reg.snapshots(Instant::now()).await[0].conn_name.clone().unwrap();

        // Room goes away with its only socket; the acked host stays stored.
        reg.socket_closed(a).await.unwrap();
        assert_eq!(reg.room_count().await, 0);
        while a_rx.try_recv().is_ok() {}

        let (a2, mut a2_rx) = socket(&reg, 2).await;
        let rejoin = RejoinRequest {
            join: join("room", 0x10, 2),
            host_id: 1,
            conn_name: conn_name.clone(),
        };
        assert!(reg.reconnect(&rejoin, a2).await.unwrap());
        assert_eq!(reg.room_count().await, 1);
        assert_eq!(a2_rx.try_recv().unwrap()[0], RelayCmd::ReconnectResp.as_u8());

        let snaps = reg.snapshots(Instant::now()).await;
        assert_eq!(snaps[0].conn_name.as_deref(), Some(conn_name.as_str()));
        let game = reg.context().db.find_game(&conn_name).await.unwrap().unwrap();
        assert_eq!(game.cid, i64::from(snaps[0].cid));
    }

    #[tokio::test]
    async fn reconnect_to_unknown_game_is_denied() {
        let reg = registry().await;
        let (a, mut a_rx) = socket(&reg, 1).await;
        let rejoin = RejoinRequest {
            join: join("room", 1, 2),
            host_id: 1,
            conn_name: "no-such-game".into(),
        };

        assert!(!reg.reconnect(&rejoin, a).await.unwrap());
        assert_eq!(
            a_rx.try_recv().unwrap(),
            vec![RelayCmd::ConnectDenied.as_u8(), Reason::NoReconnect.as_u8()]
        );
    }

    #[tokio::test]
    async fn shutdown_all_clears_rooms() {
        let reg = registry().await;
        let (a, _a_rx) = socket(&reg, 1).await;
        let (b, _b_rx) = socket(&reg, 2).await;
        reg.connect(&join("north", 1, 2), a).await.unwrap();
        reg.connect(&join("south", 2, 2), b).await.unwrap();

        reg.shutdown_all().await;
        assert_eq!(reg.room_count().await, 0);
        assert_eq!(reg.context().sockets.count().await, 0);
    }
}
