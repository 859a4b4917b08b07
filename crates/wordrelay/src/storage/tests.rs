//! Storage layer tests for wordrelay.

use super::db::RelayDatabase;
use super::queries::NewHost;
use crate::session::{Address, ClientToken, ConnId};

async fn test_db() -> RelayDatabase {
    RelayDatabase::open_in_memory().await.unwrap()
}

const fn addr(conn: u64) -> Address {
    Address::new(ConnId(conn), ClientToken(conn as u32 + 100))
}

fn host(conn_name: &str, hid: u8, seed: u16, conn: u64) -> NewHost<'_> {
    NewHost {
        conn_name,
        hid,
        n_players: 1,
        seed,
        devid: None,
        client_version: 1,
        addr: addr(conn),
        acked: false,
    }
}

async fn db_with_game() -> RelayDatabase {
    let db = test_db().await;
    db.add_game("g1", "room", 7, 1, 2).await.unwrap();
    db
}

// === Device tests ===

#[tokio::test]
async fn register_device_is_idempotent() {
    let db = test_db().await;
    let first = db.register_device(3, "gcm-abc").await.unwrap();
    let again = db.register_device(3, "gcm-abc").await.unwrap();
    let other = db.register_device(3, "gcm-def").await.unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert!(db.validate_device(first).await.unwrap());
    assert!(!db.validate_device(9999).await.unwrap());
}

// === Game tests ===

#[tokio::test]
async fn add_and_find_game() {
    let db = db_with_game().await;

    let game = db.find_game("g1").await.unwrap().unwrap();
    assert_eq!(game.cookie, "room");
    assert_eq!(game.cid, 7);
    assert!(!game.is_dead());

    assert!(db.kill_game("g1").await.unwrap());
    assert!(db.find_game("g1").await.unwrap().unwrap().is_dead());
    assert!(db.find_game("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn find_game_by_seed_skips_dead_games() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 42, 1)).await.unwrap();

    assert_eq!(
        db.find_game_by_seed("room", 1, 2, 42).await.unwrap().as_deref(),
        Some("g1")
    );
    assert!(db.find_game_by_seed("room", 1, 2, 43).await.unwrap().is_none());
    assert!(db.find_game_by_seed("room", 2, 2, 42).await.unwrap().is_none());

    db.kill_game("g1").await.unwrap();
    assert!(db.find_game_by_seed("room", 1, 2, 42).await.unwrap().is_none());
}

// === Host tests ===

#[tokio::test]
async fn add_device_assigns_lowest_free_slot() {
    let db = db_with_game().await;

    assert_eq!(db.add_device(&host("g1", 0, 1, 1)).await.unwrap(), Some(1));
    assert_eq!(db.add_device(&host("g1", 0, 2, 2)).await.unwrap(), Some(2));
    assert!(db.rm_device_by_hid("g1", 1).await.unwrap());
    assert_eq!(db.add_device(&host("g1", 0, 3, 3)).await.unwrap(), Some(1));
}

#[tokio::test]
async fn add_device_full_room() {
    let db = db_with_game().await;
    for seed in 1..=4 {
        assert!(db.add_device(&host("g1", 0, seed, u64::from(seed))).await.unwrap().is_some());
    }
    assert_eq!(db.add_device(&host("g1", 0, 5, 5)).await.unwrap(), None);
}

#[tokio::test]
async fn reconnect_overwrites_own_slot() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 10, 1)).await.unwrap();

    let mut again = host("g1", 1, 10, 9);
    again.acked = true;
    assert_eq!(db.add_device(&again).await.unwrap(), Some(1));

    let hosts = db.get_hosts("g1").await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].conn_id, Some(9));
    assert_eq!(hosts[0].acked, 1);
}

#[tokio::test]
async fn ack_tracking() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 1, 1)).await.unwrap();
    db.add_device(&host("g1", 0, 2, 2)).await.unwrap();

    assert!(!db.all_devs_acked("g1").await.unwrap());
    db.note_acked("g1", 1).await.unwrap();
    assert!(!db.all_devs_acked("g1").await.unwrap());
    db.note_acked("g1", 2).await.unwrap();
    assert!(db.all_devs_acked("g1").await.unwrap());
    assert!(!db.note_acked("g1", 3).await.unwrap());
}

#[tokio::test]
async fn player_counts_sum_hosts() {
    let db = db_with_game().await;
    assert_eq!(db.get_player_counts("g1").await.unwrap(), (2, 0));

    db.add_device(&host("g1", 0, 1, 1)).await.unwrap();
    assert_eq!(db.get_player_counts("g1").await.unwrap(), (2, 1));

    assert_eq!(db.rm_device_by_seed("g1", 1).await.unwrap(), 1);
    assert_eq!(db.get_player_counts("g1").await.unwrap(), (2, 0));
}

#[tokio::test]
async fn have_device_checks_seed() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 77, 1)).await.unwrap();

    assert!(db.have_device("g1", 1, 77).await.unwrap());
    assert!(!db.have_device("g1", 1, 78).await.unwrap());
    assert!(!db.have_device("g1", 2, 77).await.unwrap());
}

#[tokio::test]
async fn host_seed_reads_stored_slot() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 77, 1)).await.unwrap();

    assert_eq!(db.host_seed("g1", 1).await.unwrap(), Some(77));
    assert_eq!(db.host_seed("g1", 2).await.unwrap(), None);
    assert_eq!(db.host_seed("other", 1).await.unwrap(), None);
}

#[tokio::test]
async fn record_address_and_bytes() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 1, 1)).await.unwrap();

    db.record_address("g1", 1, addr(5)).await.unwrap();
    db.record_sent("g1", 1, 10).await.unwrap();
    db.record_sent("g1", 1, 5).await.unwrap();

    let hosts = db.get_hosts("g1").await.unwrap();
    assert_eq!(hosts[0].conn_id, Some(5));
    assert_eq!(hosts[0].token, Some(105));
    assert_eq!(hosts[0].bytes_sent, 15);
}

#[tokio::test]
async fn token_for_needs_a_device() {
    let db = db_with_game().await;
    db.add_device(&host("g1", 0, 1, 1)).await.unwrap();
    assert!(db.token_for("g1", 1).await.unwrap().is_none());

    let devid = db.register_device(3, "gcm").await.unwrap();
    let mut with_dev = host("g1", 0, 2, 2);
    with_dev.devid = Some(devid);
    db.add_device(&with_dev).await.unwrap();

    let route = db.token_for("g1", 2).await.unwrap().unwrap();
    assert_eq!(route.devid, devid);
    assert_eq!(route.token, 102);
}

// === Message store tests ===

#[tokio::test]
async fn stored_messages_are_fifo() {
    let db = db_with_game().await;
    let first = db.store_message("g1", 2, b"one").await.unwrap();
    db.store_message("g1", 2, b"two").await.unwrap();
    db.store_message("g1", 1, b"other").await.unwrap();

    let msg = db.get_stored_message("g1", 2).await.unwrap().unwrap();
    assert_eq!(msg.id, first);
    assert_eq!(msg.payload, b"one");

    assert_eq!(db.remove_stored_messages(&[first]).await.unwrap(), 1);
    let msg = db.get_stored_message("g1", 2).await.unwrap().unwrap();
    assert_eq!(msg.payload, b"two");

    assert_eq!(db.count_stored_for_room("g1").await.unwrap(), 2);
    assert_eq!(db.count_stored_for_host("g1", 2).await.unwrap(), 1);
    assert_eq!(db.count_stored_for_host("g1", 3).await.unwrap(), 0);
}

#[tokio::test]
async fn count_for_device_joins_hosts() {
    let db = db_with_game().await;
    let devid = db.register_device(3, "gcm").await.unwrap();
    let mut h = host("g1", 0, 1, 1);
    h.devid = Some(devid);
    db.add_device(&h).await.unwrap();

    db.store_message("g1", 1, b"a").await.unwrap();
    db.store_message("g1", 1, b"b").await.unwrap();
    db.store_message("g1", 2, b"c").await.unwrap();

    assert_eq!(db.count_stored_for_device(devid).await.unwrap(), 2);
}
