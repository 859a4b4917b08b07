//! Hosts currently connected to a room.
//!
//! The roster sits behind its own reader/writer lock so status readers can
//! look at it without taking the session lock. Every method takes the lock
//! for the duration of one call only.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use wordrelay_proto::codes::MAX_HOSTS;

use super::address::{Address, HostId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host_id: HostId,
    pub addr: Address,
    pub n_players: u8,
    pub seed: u16,
    pub last_heartbeat: Instant,
    pub ack_pending: bool,
}

/// Outcome of recording a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatNote {
    Updated,
    /// The host exists but is connected through another socket.
    WrongAddr,
    Unknown,
}

/// Outcome of recording an ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckNote {
    Acked,
    AlreadyAcked,
    /// The ack came in on a socket the host is not connected through.
    WrongAddr,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    hosts: Arc<RwLock<Vec<HostRecord>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Refused when the room already has four hosts or the
    /// slot is taken.
    pub fn add(&self, record: HostRecord) -> bool {
        let mut hosts = self.write();
        if hosts.len() >= MAX_HOSTS || hosts.iter().any(|h| h.host_id == record.host_id) {
            return false;
        }
        hosts.push(record);
        true
    }

    pub fn by_host(&self, host_id: HostId) -> Option<HostRecord> {
        self.read().iter().find(|h| h.host_id == host_id).cloned()
    }

    pub fn by_addr(&self, addr: Address) -> Option<HostRecord> {
        self.read().iter().find(|h| h.addr == addr).cloned()
    }

    pub fn by_seed(&self, seed: u16) -> Option<HostRecord> {
        self.read().iter().find(|h| h.seed == seed).cloned()
    }

    pub fn remove_host(&self, host_id: HostId) -> Option<HostRecord> {
        self.remove_where(|h| h.host_id == host_id)
    }

    pub fn remove_addr(&self, addr: Address) -> Option<HostRecord> {
        self.remove_where(|h| h.addr == addr)
    }

    fn remove_where(&self, pred: impl Fn(&HostRecord) -> bool) -> Option<HostRecord> {
        let mut hosts = self.write();
        let idx = hosts.iter().position(pred)?;
        Some(hosts.remove(idx))
    }

    /// Clear the ack-pending flag, but only for an ack sent on the host's
    /// own socket.
    pub fn note_ack(&self, host_id: HostId, addr: Address) -> AckNote {
        let mut hosts = self.write();
        match hosts.iter_mut().find(|h| h.host_id == host_id) {
            Some(host) if host.addr != addr => AckNote::WrongAddr,
            Some(host) if host.ack_pending => {
                host.ack_pending = false;
                AckNote::Acked
            }
            Some(_) => AckNote::AlreadyAcked,
            None => AckNote::Unknown,
        }
    }

    pub fn note_heartbeat(&self, host_id: HostId, addr: Address, now: Instant) -> HeartbeatNote {
        let mut hosts = self.write();
        match hosts.iter_mut().find(|h| h.host_id == host_id) {
            Some(host) if host.addr == addr => {
                host.last_heartbeat = now;
                HeartbeatNote::Updated
            }
            Some(_) => HeartbeatNote::WrongAddr,
            None => HeartbeatNote::Unknown,
        }
    }

    /// Addresses of hosts not heard from for longer than `interval`.
    pub fn silent(&self, now: Instant, interval: Duration) -> Vec<Address> {
        self.read()
            .iter()
            .filter(|h| now.saturating_duration_since(h.last_heartbeat) > interval)
            .map(|h| h.addr)
            .collect()
    }

    pub fn records(&self) -> Vec<HostRecord> {
        self.read().clone()
    }

    pub fn addrs(&self) -> Vec<Address> {
        self.read().iter().map(|h| h.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<HostRecord>> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<HostRecord>> {
        self.hosts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientToken, ConnId};

    fn addr(conn: u64) -> Address {
        Address::new(ConnId(conn), ClientToken(0))
    }

    fn record(host_id: HostId, conn: u64, seed: u16) -> HostRecord {
        HostRecord {
            host_id,
            addr: addr(conn),
            n_players: 1,
            seed,
            last_heartbeat: Instant::now(),
            ack_pending: true,
        }
    }

    #[test]
    fn add_rejects_duplicates_and_overflow() {
        let roster = Roster::new();
        assert!(roster.add(record(1, 1, 10)));
        assert!(!roster.add(record(1, 2, 11)));
        for hid in 2..=4 {
            assert!(roster.add(record(hid, u64::from(hid), u16::from(hid))));
        }
        assert!(!roster.add(record(5, 5, 15)));
        assert_eq!(roster.len(), 4);
    }

    #[test]
    fn lookups_and_removal() {
        let roster = Roster::new();
        roster.add(record(1, 1, 10));
        roster.add(record(2, 2, 20));

        assert_eq!(roster.by_addr(addr(2)).unwrap().host_id, 2);
        assert_eq!(roster.by_seed(10).unwrap().host_id, 1);
        assert!(roster.by_host(3).is_none());

        assert_eq!(roster.remove_addr(addr(1)).unwrap().seed, 10);
        assert!(roster.remove_addr(addr(1)).is_none());
        assert_eq!(roster.remove_host(2).unwrap().seed, 20);
        assert!(roster.is_empty());
    }

    #[test]
    fn ack_only_counts_once() {
        let roster = Roster::new();
        roster.add(record(1, 1, 10));
        assert_eq!(roster.note_ack(1, addr(1)), AckNote::Acked);
        assert_eq!(roster.note_ack(1, addr(1)), AckNote::AlreadyAcked);
        assert_eq!(roster.note_ack(2, addr(1)), AckNote::Unknown);
        assert!(!roster.by_host(1).unwrap().ack_pending);
    }

    #[test]
    fn ack_from_another_socket_is_ignored() {
        let roster = Roster::new();
        roster.add(record(1, 1, 10));
        roster.add(record(2, 2, 20));

        assert_eq!(roster.note_ack(1, addr(2)), AckNote::WrongAddr);
        assert!(roster.by_host(1).unwrap().ack_pending);
    }

    #[test]
    fn heartbeat_requires_matching_address() {
        let roster = Roster::new();
        let start = Instant::now();
        roster.add(record(1, 1, 10));

        let later = start + Duration::from_secs(90);
        assert_eq!(roster.note_heartbeat(1, addr(2), later), HeartbeatNote::WrongAddr);
        assert_eq!(roster.note_heartbeat(3, addr(1), later), HeartbeatNote::Unknown);
        assert_eq!(roster.silent(later, Duration::from_secs(60)), vec![addr(1)]);

        assert_eq!(roster.note_heartbeat(1, addr(1), later), HeartbeatNote::Updated);
        assert!(roster.silent(later, Duration::from_secs(60)).is_empty());
    }
}
