//! What each transition-table action does.

use std::time::Instant;

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use wordrelay_proto::codes::{HOST_ID_NONE, MAX_HOSTS};
use wordrelay_proto::outbound::{
    encode_all_here, encode_denied, encode_disconnect_other, encode_disconnect_you,
    encode_have_msgs, encode_status, parse_relay_id, relabel_forward,
};
use wordrelay_proto::{ConnectResponse, DevId, DevIdReply, DevIdType, Reason};

use super::{
    AckNote, Action, Address, HeartbeatNote, HostId, HostRecord, JoinArgs, MessageArgs,
    Session, SessionError, SessionEvent, ack_slot,
};
use crate::storage::NewHost;
use crate::timers::TimerKey;

impl Session {
    pub(super) async fn run(&mut self, action: Action, event: SessionEvent) -> Result<(), SessionError> {
        match (action, event) {
            (Action::SendConnectResponse, SessionEvent::DeviceConnect(args)) => {
                self.send_connect_response(args).await
            }
            (Action::SendReconnectResponse, SessionEvent::DeviceReconnect(args)) => {
                self.send_reconnect_response(args).await
            }
            (Action::NoteAck, SessionEvent::AckReceived { host, addr }) => {
                self.note_ack(host, addr).await
            }
            (Action::DropDevice, SessionEvent::AckTimeout { host }) => self.drop_device(host).await,
            (Action::Forward, SessionEvent::ForwardMessage(msg) | SessionEvent::ProxyMessage(msg)) => {
                self.forward_or_store(msg).await
            }
            (Action::TryTell, SessionEvent::TryTell { addr, token }) => {
                if self.ctx.sockets.send(addr, &encode_have_msgs(token)).await {
                    debug!(cid = self.cid, addr = %addr, token, "Told device it has messages");
                }
                Ok(())
            }
            (Action::TimerDisconnect, _) => {
                info!(cid = self.cid, "Room stayed short too long, disconnecting");
                self.disconnect_all(Reason::Timeout);
                Ok(())
            }
            (Action::Shutdown, _) => {
                self.disconnect_all(Reason::Shutdown);
                Ok(())
            }
            (Action::HeartDisconnect, SessionEvent::HeartbeatFailed { addr }) => {
                self.heart_disconnect(addr).await
            }
            (Action::Disconnect, SessionEvent::Disconnect { addr, host }) => {
                self.disconnect_host(addr, host).await
            }
            (Action::RemoveDevice, SessionEvent::DeviceGone { host, seed }) => {
                self.remove_device(host, seed).await
            }
            (Action::TellGameDead, SessionEvent::GameDead { addr }) => {
                self.ctx.sockets.send(addr, &encode_status(Reason::Deleted)).await;
                Ok(())
            }
            (Action::NoteHeartbeat, SessionEvent::HeartbeatReceived { host, addr }) => {
                self.note_heartbeat(host, addr);
                Ok(())
            }
            (Action::NotifyDisconnect, SessionEvent::NotifyDisconnect { addr, reason }) => {
                self.ctx.sockets.send(addr, &encode_disconnect_you(reason)).await;
                self.ctx.sockets.close(addr).await;
                Ok(())
            }
            (Action::RemoveSocketNotify, SessionEvent::RemoveSocket { addr }) => {
                if let Some(rec) = self.roster.by_addr(addr) {
                    self.notify_others(addr, Reason::LostOther, rec.host_id).await;
                }
                self.remove_addr(addr).await
            }
            (Action::RemoveSocket, event) => match event.addr() {
                Some(addr) => self.remove_addr(addr).await,
                None => Ok(()),
            },
            (Action::SendNoRoom, event) => {
                if let Some(addr) = event.addr() {
                    self.deny(addr, Reason::NoRoom).await;
                }
                Ok(())
            }
            (Action::NoteFull, _) => {
                self.cancel_all_connected();
                self.check_all_here().await
            }
            (Action::NoteShort, _) => {
                self.arm_all_connected();
                Ok(())
            }
            (Action::SendAllHere, _) => self.send_all_here().await,
            (Action::NoteEmpty, _) => self.note_empty().await,
            (Action::None, _) => Ok(()),
            (action, event) => {
                error!(cid = self.cid, %action, event = %event.kind(), "Action does not fit its event");
                Ok(())
            }
        }
    }

    // === Joining ===

    async fn send_connect_response(&mut self, args: JoinArgs) -> Result<(), SessionError> {
        let addr = args.addr;
        if let Some(reason) = self.quota_denial(&args) {
            self.refuse(addr, reason).await;
            return Ok(());
        }

        let conn_name = self.ensure_conn_name().await?;
        if self.roster.by_seed(args.seed).is_none() {
            let purged = self.ctx.db.rm_device_by_seed(&conn_name, args.seed).await?;
            if purged > 0 {
                debug!(cid = self.cid, seed = args.seed, purged, "Stale host rows removed");
            }
        }

        let (devid, reply) = self.resolve_devid(args.devid.as_ref()).await?;
        let new_host = NewHost {
            conn_name: &conn_name,
            hid: HOST_ID_NONE,
            n_players: args.n_here,
            seed: args.seed,
            devid,
            client_version: args.client_version,
            addr,
            acked: false,
        };
        let Some(host_id) = self.ctx.db.add_device(&new_host).await? else {
            self.refuse(addr, Reason::TooMany).await;
            return Ok(());
        };
        if !self.admit(host_id, &args, true, devid).await? {
            return Ok(());
        }
        self.arm_ack_timer(host_id);

        info!(
            cid = self.cid,
            host_id,
            addr = %addr,
            here = self.players_here,
            sought = self.players_sought,
            "Host connected"
        );
        self.respond(false, host_id, addr, &conn_name, reply).await
    }

    async fn send_reconnect_response(&mut self, args: JoinArgs) -> Result<(), SessionError> {
        let addr = args.addr;
        if usize::from(args.host) > MAX_HOSTS {
            self.refuse(addr, Reason::BadProto).await;
            return Ok(());
        }
        if let Some(reason) = self.quota_denial(&args) {
            self.refuse(addr, reason).await;
            return Ok(());
        }

        let conn_name = self.ensure_conn_name().await?;
        let (devid, reply) = self.resolve_devid(args.devid.as_ref()).await?;
        let new_host = NewHost {
            conn_name: &conn_name,
            hid: args.host,
            n_players: args.n_here,
            seed: args.seed,
            devid,
            client_version: args.client_version,
            addr,
            acked: true,
        };
        let Some(host_id) = self.ctx.db.add_device(&new_host).await? else {
            self.refuse(addr, Reason::TooMany).await;
            return Ok(());
        };
        if !self.admit(host_id, &args, false, devid).await? {
            return Ok(());
        }

        info!(
            cid = self.cid,
            host_id,
            addr = %addr,
            here = self.players_here,
            sought = self.players_sought,
            "Host reconnected"
        );
        self.respond(true, host_id, addr, &conn_name, reply).await
    }

    fn quota_denial(&self, args: &JoinArgs) -> Option<Reason> {
        if args.n_total != self.players_sought {
            return Some(Reason::DupRoom);
        }
        let wanted = u16::from(self.players_here) + u16::from(args.n_here);
        (wanted > u16::from(self.players_sought)).then_some(Reason::TooMany)
    }

    /// Put the host on the roster and count its players.
    async fn admit(
        &mut self,
        host_id: HostId,
        args: &JoinArgs,
        ack_pending: bool,
        devid: Option<u32>,
    ) -> Result<bool, SessionError> {
        let record = HostRecord {
            host_id,
            addr: args.addr,
            n_players: args.n_here,
            seed: args.seed,
            last_heartbeat: Instant::now(),
            ack_pending,
        };
        if !self.roster.add(record) {
            warn!(cid = self.cid, host_id, "Slot already on roster");
            if ack_pending {
                if let Some(conn_name) = &self.conn_name {
                    self.ctx.db.rm_device_by_hid(conn_name, host_id).await?;
                }
            }
            self.refuse(args.addr, Reason::TooMany).await;
            return Ok(false);
        }
        self.players_here += args.n_here;
        if let Some(devid) = devid {
            self.ctx.devices.remember(devid, args.addr).await;
        }
        Ok(true)
    }

    /// Queue the quota event, send the (re)connect response, then flush
    /// anything stored for the host.
    async fn respond(
        &mut self,
        reconnect: bool,
        host_id: HostId,
        addr: Address,
        conn_name: &str,
        devid: DevIdReply,
    ) -> Result<(), SessionError> {
        if self.players_here >= self.players_sought {
            self.push(SessionEvent::RoomFull);
        } else {
            self.push(SessionEvent::RoomShort);
        }

        let response = ConnectResponse {
            reconnect,
            host_id,
            cid: self.cid,
            heartbeat_secs: self.ctx.config.heartbeat_secs,
            n_total: self.players_sought,
            n_here: self.players_here,
            conn_name: conn_name.to_owned(),
            devid,
        }
        .encode();
        if self.send(addr, &response).await? {
            self.flush_stored(conn_name, host_id, addr).await?;
        }
        Ok(())
    }

    async fn ensure_conn_name(&mut self) -> Result<String, SessionError> {
        if let Some(name) = &self.conn_name {
            return Ok(name.clone());
        }
        let name = Uuid::new_v4().hyphenated().to_string();
        self.ctx
            .db
            .add_game(&name, &self.cookie, self.cid, self.lang, self.players_sought)
            .await?;
        info!(cid = self.cid, cookie = %self.cookie, conn_name = %name, "Game created");
        self.conn_name = Some(name.clone());
        Ok(name)
    }

    async fn resolve_devid(&self, devid: Option<&DevId>) -> Result<(Option<u32>, DevIdReply), SessionError> {
        let Some(devid) = devid else {
            return Ok((None, DevIdReply::None));
        };
        if devid.kind.is_platform() {
            let id = self.ctx.db.register_device(devid.kind.as_u8(), &devid.id).await?;
            return Ok((Some(id), DevIdReply::Assigned(id)));
        }
        if devid.kind == DevIdType::Relay {
            if let Some(id) = parse_relay_id(&devid.id) {
                if self.ctx.db.validate_device(id).await? {
                    return Ok((Some(id), DevIdReply::Known));
                }
            }
            info!(cid = self.cid, devid = %devid.id, "Unknown relay id");
        }
        Ok((None, DevIdReply::None))
    }

    async fn note_ack(&mut self, host: HostId, addr: Address) -> Result<(), SessionError> {
        match self.roster.note_ack(host, addr) {
            AckNote::Acked => {
                self.cancel_ack_timer(host);
                if let Some(conn_name) = &self.conn_name {
                    self.ctx.db.note_acked(conn_name, host).await?;
                }
                debug!(cid = self.cid, host_id = host, addr = %addr, "Host acked");
            }
            AckNote::WrongAddr => {
                error!(cid = self.cid, host_id = host, addr = %addr, "Ack from wrong socket");
                return Ok(());
            }
            AckNote::AlreadyAcked | AckNote::Unknown => {
                debug!(cid = self.cid, host_id = host, addr = %addr, "Ack for unknown or acked host");
            }
        }
        self.check_all_here().await
    }

    async fn check_all_here(&mut self) -> Result<(), SessionError> {
        if self.players_here < self.players_sought {
            return Ok(());
        }
        let Some(conn_name) = &self.conn_name else {
            return Ok(());
        };
        if self.ctx.db.all_devs_acked(conn_name).await? {
            self.push(SessionEvent::AllHere);
        }
        Ok(())
    }

    async fn send_all_here(&mut self) -> Result<(), SessionError> {
        self.cancel_all_connected();
        let Some(conn_name) = self.conn_name.clone() else {
            return Ok(());
        };

        for host in self.ctx.db.get_hosts(&conn_name).await? {
            let Ok(hid) = HostId::try_from(host.hid) else {
                continue;
            };
            let frame = encode_all_here(hid, &conn_name);
            let sent = match self.roster.by_host(hid) {
                Some(rec) => self.send(rec.addr, &frame).await?,
                None => false,
            };
            if !sent {
                self.ctx.buffer.store(&conn_name, hid, &frame).await?;
            }
        }
        info!(cid = self.cid, conn_name = %conn_name, "All players here");
        Ok(())
    }

    // === Messages ===

    async fn forward_or_store(&mut self, msg: MessageArgs) -> Result<(), SessionError> {
        let Some(out) = relabel_forward(&msg.frame) else {
            warn!(cid = self.cid, addr = %msg.addr, "Not a relay-bound message, dropped");
            return Ok(());
        };
        let Some(conn_name) = self.conn_name.clone() else {
            warn!(cid = self.cid, "Message for a room with no game, dropped");
            return Ok(());
        };

        let dest = self.roster.by_host(msg.dest);
        let delivered = match &dest {
            Some(rec) => {
                if !self.send_delay.is_zero() {
                    tokio::time::sleep(self.send_delay).await;
                }
                self.send(rec.addr, &out).await?
            }
            None => false,
        };

        if !delivered {
            self.ctx.buffer.store(&conn_name, msg.dest, &out).await?;
            if dest.is_none() {
                self.tell_device(&conn_name, msg.dest).await?;
            }
        }

        self.ctx.db.record_address(&conn_name, msg.src, msg.addr).await?;
        if let Some(src) = self.roster.by_host(msg.src) {
            self.push(SessionEvent::HeartbeatReceived {
                host: msg.src,
                addr: src.addr,
            });
        }
        Ok(())
    }

    /// If the absent host's device is reachable elsewhere, queue a
    /// have-messages notice for it.
    async fn tell_device(&mut self, conn_name: &str, host: HostId) -> Result<(), SessionError> {
        let Some(route) = self.ctx.db.token_for(conn_name, host).await? else {
            return Ok(());
        };
        if let Some(addr) = self.ctx.devices.get(route.devid).await {
            let pending = self.ctx.buffer.count_for_device(route.devid).await?;
            debug!(
                cid = self.cid,
                host_id = host,
                devid = route.devid,
                pending,
                "Device reachable elsewhere"
            );
            self.push(SessionEvent::TryTell {
                addr,
                token: route.token,
            });
        }
        Ok(())
    }

    async fn flush_stored(&mut self, conn_name: &str, host: HostId, addr: Address) -> Result<(), SessionError> {
        let flushed = self.ctx.buffer.flush(conn_name, host, addr).await?;
        if flushed.send_failed {
            self.ctx.sockets.close(addr).await;
            self.push(SessionEvent::RemoveSocket { addr });
        }
        Ok(())
    }

    // === Leaving ===

    fn disconnect_all(&mut self, reason: Reason) {
        let addrs = self.roster.addrs();
        if addrs.is_empty() {
            self.push(SessionEvent::NoMoreSockets);
            return;
        }
        for addr in addrs {
            self.push(SessionEvent::NotifyDisconnect { addr, reason });
            self.push(SessionEvent::RemoveSocket { addr });
        }
    }

    async fn heart_disconnect(&mut self, addr: Address) -> Result<(), SessionError> {
        let Some(rec) = self.roster.by_addr(addr) else {
            return Ok(());
        };
        info!(cid = self.cid, host_id = rec.host_id, addr = %addr, "Dropping silent host");
        self.notify_others(addr, Reason::HeartOther, rec.host_id).await;
        self.ctx.sockets.send(addr, &encode_disconnect_you(Reason::HeartYou)).await;
        self.remove_addr(addr).await
    }

    async fn disconnect_host(&mut self, addr: Address, host: HostId) -> Result<(), SessionError> {
        let Some(rec) = self.roster.by_addr(addr) else {
            debug!(cid = self.cid, host_id = host, addr = %addr, "Disconnect from unknown socket");
            return Ok(());
        };
        if rec.host_id != host {
            warn!(cid = self.cid, claimed = host, actual = rec.host_id, "Disconnect names wrong host");
        }
        info!(cid = self.cid, host_id = rec.host_id, "Host disconnected");
        self.notify_others(addr, Reason::OtherDiscon, rec.host_id).await;
        self.remove_addr(addr).await
    }

    async fn drop_device(&mut self, host: HostId) -> Result<(), SessionError> {
        match self.roster.by_host(host) {
            Some(rec) if rec.ack_pending => {
                info!(cid = self.cid, host_id = host, "Host never acked, dropping");
                self.remove_addr(rec.addr).await
            }
            _ => {
                trace!(cid = self.cid, host_id = host, "Ack timeout for acked or gone host");
                Ok(())
            }
        }
    }

    async fn remove_device(&mut self, host: HostId, seed: u16) -> Result<(), SessionError> {
        let Some(conn_name) = self.conn_name.clone() else {
            return Ok(());
        };
        if !self.ctx.db.have_device(&conn_name, host, seed).await? {
            info!(cid = self.cid, host_id = host, seed, "Device gone for unknown host");
            return Ok(());
        }

        self.ctx.db.kill_game(&conn_name).await?;
        self.game_dead = true;
        if let Some(rec) = self.roster.by_host(host) {
            self.remove_addr(rec.addr).await?;
        }
        self.ctx.db.rm_device_by_hid(&conn_name, host).await?;

        let status = encode_status(Reason::Deleted);
        for addr in self.roster.addrs() {
            self.ctx.sockets.send(addr, &status).await;
        }
        info!(cid = self.cid, host_id = host, conn_name = %conn_name, "Game deleted by device");
        Ok(())
    }

    /// Evict a stale record ahead of a fresh admission.
    pub(super) async fn evict(&mut self, host: HostId) -> Result<(), SessionError> {
        if let Some(rec) = self.roster.by_host(host) {
            self.remove_addr(rec.addr).await?;
        }
        Ok(())
    }

    /// Take the host at `addr` off the roster, close its socket and roll
    /// back what it brought with it.
    async fn remove_addr(&mut self, addr: Address) -> Result<(), SessionError> {
        self.ctx.sockets.close(addr).await;
        if let Some(rec) = self.roster.remove_addr(addr) {
            self.players_here = self.players_here.saturating_sub(rec.n_players);
            if rec.ack_pending {
                self.cancel_ack_timer(rec.host_id);
                if let Some(conn_name) = &self.conn_name {
                    self.ctx.db.rm_device_by_hid(conn_name, rec.host_id).await?;
                }
            }
            debug!(
                cid = self.cid,
                host_id = rec.host_id,
                here = self.players_here,
                "Host removed"
            );
            self.push(SessionEvent::RoomShort);
        }
        if self.roster.is_empty() {
            self.push(SessionEvent::NoMoreSockets);
        }
        Ok(())
    }

    fn note_heartbeat(&self, host: HostId, addr: Address) {
        match self.roster.note_heartbeat(host, addr, Instant::now()) {
            HeartbeatNote::Updated => trace!(cid = self.cid, host_id = host, "Heartbeat"),
            HeartbeatNote::WrongAddr => {
                error!(cid = self.cid, host_id = host, addr = %addr, "Heartbeat from wrong socket");
            }
            HeartbeatNote::Unknown => debug!(cid = self.cid, host_id = host, "Heartbeat for unknown host"),
        }
    }

    async fn note_empty(&mut self) -> Result<(), SessionError> {
        self.cancel_all_connected();
        for host in 1..=MAX_HOSTS {
            if let Ok(host) = HostId::try_from(host) {
                self.cancel_ack_timer(host);
            }
        }
        if self.players_here != 0 {
            warn!(cid = self.cid, here = self.players_here, "Empty room still counted players");
            self.players_here = 0;
        }

        let pending = match &self.conn_name {
            Some(conn_name) => self.ctx.buffer.count_for_room(conn_name).await?,
            None => 0,
        };
        if pending == 0 {
            self.push(SessionEvent::NoMoreMessages);
        } else {
            debug!(cid = self.cid, pending, "Room empty with stored messages");
        }
        Ok(())
    }

    // === Sending ===

    /// Send on a host socket. A failure closes the socket and queues its
    /// removal; the room carries on.
    async fn send(&mut self, addr: Address, frame: &[u8]) -> Result<bool, SessionError> {
        if self.ctx.sockets.send(addr, frame).await {
            if let (Some(conn_name), Some(rec)) = (&self.conn_name, self.roster.by_addr(addr)) {
                self.ctx.db.record_sent(conn_name, rec.host_id, frame.len()).await?;
            }
            return Ok(true);
        }
        warn!(cid = self.cid, addr = %addr, "Send failed, dropping socket");
        self.ctx.sockets.close(addr).await;
        self.push(SessionEvent::RemoveSocket { addr });
        Ok(false)
    }

    async fn notify_others(&self, except: Address, reason: Reason, host: HostId) {
        let frame = encode_disconnect_other(reason, host);
        for addr in self.roster.addrs() {
            if addr != except {
                self.ctx.sockets.send(addr, &frame).await;
            }
        }
    }

    /// Deny a join. A room the denied device was about to open falls back
    /// to empty.
    async fn refuse(&mut self, addr: Address, reason: Reason) {
        self.deny(addr, reason).await;
        if self.roster.is_empty() {
            self.push(SessionEvent::NoMoreSockets);
        }
    }

    pub(super) async fn deny(&self, addr: Address, reason: Reason) {
        info!(cid = self.cid, addr = %addr, ?reason, "Connect denied");
        self.ctx.sockets.send(addr, &encode_denied(reason)).await;
        self.ctx.sockets.close(addr).await;
    }

    // === Timers ===

    fn arm_ack_timer(&mut self, host: HostId) {
        if let Some(slot) = ack_slot(host) {
            let token = self
                .ctx
                .timers
                .schedule(TimerKey::ack(self.cid, host), self.ctx.config.device_ack_timeout());
            self.ack_timers[slot] = Some(token);
        }
    }

    fn cancel_ack_timer(&mut self, host: HostId) {
        if let Some(slot) = ack_slot(host) {
            if self.ack_timers[slot].take().is_some() {
                self.ctx.timers.cancel(TimerKey::ack(self.cid, host));
            }
        }
    }

    fn arm_all_connected(&mut self) {
        let token = self.ctx.timers.schedule(
            TimerKey::all_connected(self.cid),
            self.ctx.config.all_connected_timeout(),
        );
        self.all_connected_timer = Some(token);
    }

    fn cancel_all_connected(&mut self) {
        if self.all_connected_timer.take().is_some() {
            self.ctx.timers.cancel(TimerKey::all_connected(self.cid));
        }
    }
}
