//! One multiplayer room and the state machine that drives it.
//!
//! Every public operation pushes a [`SessionEvent`] and drains the queue:
//! each event is looked up in the transition table, its action runs (and
//! may push further events), and then the state advances. Callers hold the
//! session lock (see [`crate::manager::SafeHandle`]) for the whole call.

mod actions;
mod address;
mod event;
mod roster;
mod state;


use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace};
use wordrelay_core::config::SessionConfig;
use wordrelay_proto::codes::MAX_HOSTS;

pub use address::{Address, ClientToken, ConnId, CookieId, HostId};
pub use event::{EventKind, JoinArgs, MessageArgs, SessionEvent};
pub use roster::{AckNote, HeartbeatNote, HostRecord, Roster};
pub use state::{Action, SessionState, transition};

use crate::buffer::{BufferError, MessageBuffer};
use crate::registry::{DeviceDirectory, SocketPool};
use crate::storage::{DatabaseError, RelayDatabase};
use crate::timers::{FiredTimer, TimerKind, TimerService, TimerToken};

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct RelayContext {
    pub db: RelayDatabase,
    pub buffer: MessageBuffer,
    pub sockets: SocketPool,
    pub devices: DeviceDirectory,
    pub timers: TimerService,
    pub config: SessionConfig,
}

impl RelayContext {
    pub fn new(
        db: RelayDatabase,
        sockets: SocketPool,
        devices: DeviceDirectory,
        timers: TimerService,
        config: SessionConfig,
    ) -> Self {
        let buffer = MessageBuffer::new(db.clone(), sockets.clone());
        Self {
            db,
            buffer,
            sockets,
            devices,
            timers,
            config,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session {0} is no longer live")]
    Retired(CookieId),
}

impl From<BufferError> for SessionError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Storage(e) => Self::Database(e),
        }
    }
}

/// Serialisable view of a room for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub cookie: String,
    pub conn_name: Option<String>,
    pub cid: CookieId,
    pub lang: u8,
    pub state: SessionState,
    pub players_sought: u8,
    pub players_here: u8,
    pub age_secs: u64,
    /// Messages stored for absent hosts.
    pub stored_messages: i64,
    pub hosts: Vec<HostSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub host_id: HostId,
    pub seed: u16,
    pub conn: ConnId,
    pub n_players: u8,
    pub ack_pending: bool,
    pub idle_secs: u64,
    pub stored_messages: i64,
}

pub struct Session {
    ctx: RelayContext,
    cookie: String,
    conn_name: Option<String>,
    cid: CookieId,
    state: SessionState,
    queue: VecDeque<SessionEvent>,
    lang: u8,
    players_sought: u8,
    players_here: u8,
    created: Instant,
    roster: Roster,
    ack_timers: [Option<TimerToken>; MAX_HOSTS],
    all_connected_timer: Option<TimerToken>,
    send_delay: Duration,
    draining: bool,
    game_dead: bool,
    retired: bool,
}

impl Session {
    /// A fresh room; its connection name is assigned on first connect.
    pub fn new(
        ctx: RelayContext,
        cookie: impl Into<String>,
        cid: CookieId,
        lang: u8,
        players_sought: u8,
    ) -> Self {
        let send_delay = ctx.config.send_delay();
        Self {
            ctx,
            cookie: cookie.into(),
            conn_name: None,
            cid,
            state: SessionState::Empty,
            queue: VecDeque::new(),
            lang,
            players_sought,
            players_here: 0,
            created: Instant::now(),
            roster: Roster::new(),
            ack_timers: [None; MAX_HOSTS],
            all_connected_timer: None,
            send_delay,
            draining: false,
            game_dead: false,
            retired: false,
        }
    }

    /// A room brought back from the store; hosts rejoin through reconnect.
    pub fn restored(
        ctx: RelayContext,
        cookie: impl Into<String>,
        conn_name: String,
        cid: CookieId,
        lang: u8,
        players_sought: u8,
        game_dead: bool,
    ) -> Self {
        let mut session = Self::new(ctx, cookie, cid, lang, players_sought);
        session.conn_name = Some(conn_name);
        session.game_dead = game_dead;
        session
    }

    pub const fn cid(&self) -> CookieId {
        self.cid
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn conn_name(&self) -> Option<&str> {
        self.conn_name.as_deref()
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn lang(&self) -> u8 {
        self.lang
    }

    pub const fn players_sought(&self) -> u8 {
        self.players_sought
    }

    pub const fn players_here(&self) -> u8 {
        self.players_here
    }

    /// Shared handle on the host list, readable without the session lock.
    pub fn roster(&self) -> Roster {
        self.roster.clone()
    }

    /// Whether `n` more players fit and the room still accepts connects.
    pub fn has_room_for(&self, n: u8) -> bool {
        matches!(self.state, SessionState::Empty | SessionState::Connecting)
            && u16::from(self.players_here) + u16::from(n) <= u16::from(self.players_sought)
    }

    /// An idle room with nobody in it may be deleted.
    pub fn should_die(&self) -> bool {
        self.state == SessionState::Empty && self.roster.is_empty() && !self.draining
    }

    pub const fn is_retired(&self) -> bool {
        self.retired
    }

    /// Called by the registry when the room is removed; later lock
    /// acquisitions fail.
    pub fn retire(&mut self) {
        self.retired = true;
        self.ctx.timers.cancel_room(self.cid);
    }

    // === Operations ===

    /// Returns whether the device ended up in the room.
    pub async fn connect(&mut self, args: JoinArgs) -> Result<bool, SessionError> {
        let addr = args.addr;
        match self.roster.by_seed(args.seed) {
            Some(prev) if prev.addr == addr => {
                debug!(cid = self.cid, host_id = prev.host_id, "Duplicate connect swallowed");
                return Ok(true);
            }
            Some(prev) => {
                info!(
                    cid = self.cid,
                    host_id = prev.host_id,
                    old = %prev.addr,
                    new = %addr,
                    "Same seed from new socket, evicting stale host"
                );
                self.evict(prev.host_id).await?;
            }
            None => {}
        }
        if self.roster.by_addr(addr).is_some() {
            info!(cid = self.cid, addr = %addr, "Socket already holds a host in this room");
            return Ok(false);
        }

        self.push(SessionEvent::DeviceConnect(args));
        self.drain().await?;
        Ok(self.roster.by_addr(addr).is_some())
    }

    /// Returns `false` only when the claimed slot belongs to another device.
    pub async fn reconnect(&mut self, args: JoinArgs, game_dead: bool) -> Result<bool, SessionError> {
        let addr = args.addr;
        self.game_dead |= game_dead;

        let mut admit = true;
        let owner_seed = match self.roster.by_host(args.host) {
            Some(prev) => Some(prev.seed),
            None => self.stored_seed(args.host).await?,
        };
        if owner_seed.is_some_and(|seed| seed != args.seed) {
            info!(
                cid = self.cid,
                host_id = args.host,
                "Reconnect seed does not match slot owner"
            );
            self.deny(addr, wordrelay_proto::Reason::NoReconnect).await;
            return Ok(false);
        }
        if let Some(prev) = self.roster.by_host(args.host) {
            if prev.addr == addr {
                debug!(cid = self.cid, host_id = args.host, "Duplicate reconnect swallowed");
                admit = false;
            } else {
                self.evict(prev.host_id).await?;
            }
        }

        if admit {
            self.push(SessionEvent::DeviceReconnect(args));
        }
        if self.game_dead {
            self.push(SessionEvent::GameDead { addr });
        }
        self.drain().await?;
        Ok(true)
    }

    /// Seed of the stored row for a slot nobody currently holds.
    async fn stored_seed(&self, host: HostId) -> Result<Option<u16>, SessionError> {
        match &self.conn_name {
            Some(conn_name) => Ok(self.ctx.db.host_seed(conn_name, host).await?),
            None => Ok(None),
        }
    }

    pub async fn handle_ack(&mut self, host: HostId, addr: Address) -> Result<(), SessionError> {
        self.push(SessionEvent::AckReceived { host, addr });
        self.drain().await
    }

    /// In-room message sent on the host's own socket.
    pub async fn put_message(
        &mut self,
        addr: Address,
        src: HostId,
        dest: HostId,
        frame: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.push(SessionEvent::ForwardMessage(MessageArgs {
            addr,
            src,
            dest,
            frame,
        }));
        self.drain().await
    }

    /// Message addressed by connection name, possibly from outside the room.
    pub async fn forward(
        &mut self,
        addr: Address,
        src: HostId,
        dest: HostId,
        frame: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.push(SessionEvent::ProxyMessage(MessageArgs {
            addr,
            src,
            dest,
            frame,
        }));
        self.drain().await
    }

    pub async fn disconnect(&mut self, addr: Address, host: HostId) -> Result<(), SessionError> {
        self.push(SessionEvent::Disconnect { addr, host });
        self.drain().await
    }

    pub async fn device_gone(&mut self, host: HostId, seed: u16) -> Result<(), SessionError> {
        self.push(SessionEvent::DeviceGone { host, seed });
        self.drain().await
    }

    pub async fn remove_socket(&mut self, addr: Address) -> Result<(), SessionError> {
        self.push(SessionEvent::RemoveSocket { addr });
        self.drain().await
    }

    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.push(SessionEvent::Shutdown);
        self.drain().await
    }

    pub async fn handle_heartbeat(&mut self, host: HostId, addr: Address) -> Result<(), SessionError> {
        self.push(SessionEvent::HeartbeatReceived { host, addr });
        self.drain().await
    }

    /// Fail every host silent for longer than the heartbeat interval.
    pub async fn check_heartbeats(&mut self, now: Instant) -> Result<(), SessionError> {
        let silent = self.roster.silent(now, self.ctx.config.heartbeat());
        if silent.is_empty() {
            return Ok(());
        }
        for addr in silent {
            info!(cid = self.cid, addr = %addr, "Heartbeat missed");
            self.push(SessionEvent::HeartbeatFailed { addr });
        }
        self.drain().await
    }

    /// All-connected deadline fired. Stale tokens are ignored.
    pub async fn check_all_connected(&mut self, token: TimerToken) -> Result<(), SessionError> {
        if self.all_connected_timer != Some(token) {
            trace!(cid = self.cid, "Stale all-connected timer ignored");
            return Ok(());
        }
        self.all_connected_timer = None;
        self.push(SessionEvent::AllConnectedTimer);
        self.drain().await
    }

    /// Ack deadline for `host` fired. Stale tokens are ignored.
    pub async fn check_not_acked(&mut self, host: HostId, token: TimerToken) -> Result<(), SessionError> {
        let Some(slot) = ack_slot(host) else {
            return Ok(());
        };
        if self.ack_timers[slot] != Some(token) {
            trace!(cid = self.cid, host_id = host, "Stale ack timer ignored");
            return Ok(());
        }
        self.ack_timers[slot] = None;
        self.push(SessionEvent::AckTimeout { host });
        self.drain().await
    }

    pub async fn on_timer(&mut self, fired: FiredTimer) -> Result<(), SessionError> {
        match fired.key.kind {
            TimerKind::AllConnected => self.check_all_connected(fired.token).await,
            TimerKind::AckTimeout(host) => self.check_not_acked(host, fired.token).await,
        }
    }

    pub async fn snapshot(&self, now: Instant) -> Result<SessionSnapshot, SessionError> {
        let mut hosts = Vec::new();
        for h in self.roster.records() {
            let stored_messages = match &self.conn_name {
                Some(conn_name) => self.ctx.buffer.count_for_host(conn_name, h.host_id).await?,
                None => 0,
            };
            hosts.push(HostSnapshot {
                host_id: h.host_id,
                seed: h.seed,
                conn: h.addr.conn,
                n_players: h.n_players,
                ack_pending: h.ack_pending,
                idle_secs: now.saturating_duration_since(h.last_heartbeat).as_secs(),
                stored_messages,
            });
        }
        let stored_messages = match &self.conn_name {
            Some(conn_name) => self.ctx.buffer.count_for_room(conn_name).await?,
            None => 0,
        };
        Ok(SessionSnapshot {
            cookie: self.cookie.clone(),
            conn_name: self.conn_name.clone(),
            cid: self.cid,
            lang: self.lang,
            state: self.state,
            players_sought: self.players_sought,
            players_here: self.players_here,
            age_secs: now.saturating_duration_since(self.created).as_secs(),
            stored_messages,
            hosts,
        })
    }

    // === Queue ===

    fn push(&mut self, event: SessionEvent) {
        trace!(cid = self.cid, event = %event.kind(), "Event queued");
        self.queue.push_back(event);
    }

    async fn drain(&mut self) -> Result<(), SessionError> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let mut result = self.run_queue().await;
        if result.is_ok() && self.players_here > self.players_sought {
            error!(
                cid = self.cid,
                here = self.players_here,
                sought = self.players_sought,
                "More players than the room seeks, shutting room down"
            );
            self.queue.push_back(SessionEvent::Shutdown);
            result = self.run_queue().await;
        }
        self.draining = false;

        if let Err(e) = &result {
            error!(cid = self.cid, error = %e, dropped = self.queue.len(), "Drain aborted");
            self.queue.clear();
        }
        result
    }

    async fn run_queue(&mut self) -> Result<(), SessionError> {
        while let Some(event) = self.queue.pop_front() {
            let kind = event.kind();
            let Some((action, next)) = transition(self.state, kind) else {
                error!(
                    cid = self.cid,
                    state = %self.state,
                    event = %kind,
                    "No transition for event, shutting room down"
                );
                self.queue.push_back(SessionEvent::Shutdown);
                continue;
            };

            trace!(cid = self.cid, state = %self.state, event = %kind, action = %action, "Running action");
            self.run(action, event).await?;

            if next != self.state {
                debug!(cid = self.cid, from = %self.state, to = %next, "State change");
                self.state = next;
            }
        }
        Ok(())
    }
}

/// Index into the ack timer array for a valid host id.
fn ack_slot(host: HostId) -> Option<usize> {
    let slot = usize::from(host).checked_sub(1)?;
    (slot < MAX_HOSTS).then_some(slot)
}
