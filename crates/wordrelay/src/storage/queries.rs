//! Room, host and device queries for the wordrelay server.

use wordrelay_core::db::unix_timestamp;

use super::db::{DatabaseError, RelayDatabase};
use super::models::{Device, Game, Host, HostRoute};
use crate::session::{Address, CookieId, HostId};

/// Highest slot a room can hand out.
const MAX_HID: i64 = 4;

/// Parameters for admitting a host into a room.
pub struct NewHost<'a> {
    pub conn_name: &'a str,
    /// Slot being reclaimed on reconnect; `0` asks for the lowest free slot.
    pub hid: HostId,
    pub n_players: u8,
    pub seed: u16,
    pub devid: Option<u32>,
    pub client_version: u16,
    pub addr: Address,
    pub acked: bool,
}

#[allow(clippy::cast_possible_wrap)]
const fn conn_col(addr: Address) -> i64 {
    addr.conn.0 as i64
}

impl RelayDatabase {
    // =========================================================================
    // Device queries
    // =========================================================================

    /// Issue (or look up) the relay id for a platform device id.
    pub async fn register_device(
        &self,
        id_type: u8,
        platform_id: &str,
    ) -> Result<u32, DatabaseError> {
        sqlx::query(
            "INSERT INTO devices (id_type, platform_id, registered_at) VALUES (?, ?, ?)
             ON CONFLICT (id_type, platform_id) DO NOTHING",
        )
        .bind(i64::from(id_type))
        .bind(platform_id)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        let device = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE id_type = ? AND platform_id = ?",
        )
        .bind(i64::from(id_type))
        .bind(platform_id)
        .fetch_one(self.pool())
        .await?;

        u32::try_from(device.id).map_err(|_| DatabaseError::OutOfRange {
            column: "devices.id",
            value: device.id,
        })
    }

    /// Whether a relay id was issued by this relay.
    pub async fn validate_device(&self, relay_id: u32) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE id = ?")
            .bind(i64::from(relay_id))
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    // =========================================================================
    // Game queries
    // =========================================================================

    pub async fn add_game(
        &self,
        conn_name: &str,
        cookie: &str,
        cid: CookieId,
        lang: u8,
        n_total: u8,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO games (conn_name, cookie, cid, lang, n_total, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conn_name)
        .bind(cookie)
        .bind(i64::from(cid))
        .bind(i64::from(lang))
        .bind(i64::from(n_total))
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_game(&self, conn_name: &str) -> Result<Option<Game>, DatabaseError> {
        let game = sqlx::query_as::<_, Game>("SELECT * FROM games WHERE conn_name = ?")
            .bind(conn_name)
            .fetch_optional(self.pool())
            .await?;
        Ok(game)
    }

    /// Live game for this cookie in which a host with `seed` has been seen.
    pub async fn find_game_by_seed(
        &self,
        cookie: &str,
        lang: u8,
        n_total: u8,
        seed: u16,
    ) -> Result<Option<String>, DatabaseError> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT g.conn_name FROM games g JOIN hosts h ON h.conn_name = g.conn_name
             WHERE g.cookie = ? AND g.lang = ? AND g.n_total = ? AND g.dead = 0 AND h.seed = ?
             ORDER BY g.created_at DESC LIMIT 1",
        )
        .bind(cookie)
        .bind(i64::from(lang))
        .bind(i64::from(n_total))
        .bind(i64::from(seed))
        .fetch_optional(self.pool())
        .await?;
        Ok(name)
    }

    /// Record the id a restored room now runs under.
    pub async fn set_game_cid(&self, conn_name: &str, cid: CookieId) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE games SET cid = ? WHERE conn_name = ?")
            .bind(i64::from(cid))
            .bind(conn_name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Flag a game as dead; later reconnects are told it was deleted.
    pub async fn kill_game(&self, conn_name: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE games SET dead = 1 WHERE conn_name = ?")
            .bind(conn_name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Host queries
    // =========================================================================

    /// Admit a host. Returns the slot assigned, or `None` when every slot is
    /// taken. A reconnect (`hid != 0`) overwrites its own slot.
    pub async fn add_device(&self, host: &NewHost<'_>) -> Result<Option<HostId>, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let hid = if host.hid == 0 {
            let used: Vec<i64> =
                sqlx::query_scalar("SELECT hid FROM hosts WHERE conn_name = ? ORDER BY hid")
                    .bind(host.conn_name)
                    .fetch_all(&mut *tx)
                    .await?;
            match (1..=MAX_HID).find(|id| !used.contains(id)) {
                Some(id) => id,
                None => return Ok(None),
            }
        } else {
            i64::from(host.hid)
        };

        sqlx::query(
            "INSERT INTO hosts (conn_name, hid, devid, n_players, seed, acked, client_version, conn_id, token, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (conn_name, hid) DO UPDATE SET
                devid = excluded.devid, n_players = excluded.n_players, seed = excluded.seed,
                acked = excluded.acked, client_version = excluded.client_version,
                conn_id = excluded.conn_id, token = excluded.token, last_seen = excluded.last_seen",
        )
        .bind(host.conn_name)
        .bind(hid)
        .bind(host.devid.map(i64::from))
        .bind(i64::from(host.n_players))
        .bind(i64::from(host.seed))
        .bind(i64::from(host.acked))
        .bind(i64::from(host.client_version))
        .bind(conn_col(host.addr))
        .bind(i64::from(host.addr.token.0))
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(HostId::try_from(hid).ok())
    }

    pub async fn note_acked(&self, conn_name: &str, hid: HostId) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE hosts SET acked = 1 WHERE conn_name = ? AND hid = ?")
            .bind(conn_name)
            .bind(i64::from(hid))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// No host row of the room is still waiting for its ack.
    pub async fn all_devs_acked(&self, conn_name: &str) -> Result<bool, DatabaseError> {
        let pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM hosts WHERE conn_name = ? AND acked = 0")
                .bind(conn_name)
                .fetch_one(self.pool())
                .await?;
        Ok(pending == 0)
    }

    /// `(players sought, players known)` for a room.
    pub async fn get_player_counts(&self, conn_name: &str) -> Result<(u8, u8), DatabaseError> {
        let (total, here): (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT (SELECT n_total FROM games WHERE conn_name = ?1),
                    (SELECT SUM(n_players) FROM hosts WHERE conn_name = ?1)",
        )
        .bind(conn_name)
        .fetch_one(self.pool())
        .await?;
        let clamp = |v: Option<i64>| u8::try_from(v.unwrap_or(0)).unwrap_or(u8::MAX);
        Ok((clamp(total), clamp(here)))
    }

    pub async fn get_hosts(&self, conn_name: &str) -> Result<Vec<Host>, DatabaseError> {
        let hosts =
            sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE conn_name = ? ORDER BY hid")
                .bind(conn_name)
                .fetch_all(self.pool())
                .await?;
        Ok(hosts)
    }

    pub async fn rm_device_by_hid(
        &self,
        conn_name: &str,
        hid: HostId,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM hosts WHERE conn_name = ? AND hid = ?")
            .bind(conn_name)
            .bind(i64::from(hid))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn rm_device_by_seed(&self, conn_name: &str, seed: u16) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM hosts WHERE conn_name = ? AND seed = ?")
            .bind(conn_name)
            .bind(i64::from(seed))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Seed stored for a slot, if the slot has a row.
    pub async fn host_seed(&self, conn_name: &str, hid: HostId) -> Result<Option<u16>, DatabaseError> {
        let seed: Option<i64> =
            sqlx::query_scalar("SELECT seed FROM hosts WHERE conn_name = ? AND hid = ?")
                .bind(conn_name)
                .bind(i64::from(hid))
                .fetch_optional(self.pool())
                .await?;
        Ok(seed.and_then(|s| u16::try_from(s).ok()))
    }

    /// Whether the room has a row for this slot with this seed.
    pub async fn have_device(
        &self,
        conn_name: &str,
        hid: HostId,
        seed: u16,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM hosts WHERE conn_name = ? AND hid = ? AND seed = ?",
        )
        .bind(conn_name)
        .bind(i64::from(hid))
        .bind(i64::from(seed))
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    /// Remember where a host was last heard from.
    pub async fn record_address(
        &self,
        conn_name: &str,
        hid: HostId,
        addr: Address,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE hosts SET conn_id = ?, token = ?, last_seen = ? WHERE conn_name = ? AND hid = ?",
        )
        .bind(conn_col(addr))
        .bind(i64::from(addr.token.0))
        .bind(unix_timestamp())
        .bind(conn_name)
        .bind(i64::from(hid))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_sent(
        &self,
        conn_name: &str,
        hid: HostId,
        bytes: usize,
    ) -> Result<(), DatabaseError> {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        sqlx::query(
            "UPDATE hosts SET bytes_sent = bytes_sent + ? WHERE conn_name = ? AND hid = ?",
        )
        .bind(bytes)
        .bind(conn_name)
        .bind(i64::from(hid))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Device and token to notify when a message for this slot is stored.
    pub async fn token_for(
        &self,
        conn_name: &str,
        hid: HostId,
    ) -> Result<Option<HostRoute>, DatabaseError> {
        let row: Option<(Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT devid, token FROM hosts WHERE conn_name = ? AND hid = ?",
        )
        .bind(conn_name)
        .bind(i64::from(hid))
        .fetch_optional(self.pool())
        .await?;

        Ok(row.and_then(|(devid, token)| {
            Some(HostRoute {
                devid: u32::try_from(devid?).ok()?,
                token: u32::try_from(token?).ok()?,
            })
        }))
    }
}
