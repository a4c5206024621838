use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roombook::directory::Directory;
use roombook::engine::Engine;
use roombook::wire;

const DIRECTORY: &str = r#"{
  "rooms": [
    { "id": 1, "name": "A101", "building": "Main", "floor": 1, "capacity": 40, "has_ac": true },
    { "id": 2, "name": "B202", "capacity": 120, "has_projector": true }
  ],
  "users": [
    { "login": "alice", "id": 10, "role": "STUDENT_REP", "password": "alice-pw" },
    { "login": "bob", "id": 11, "role": "STUDENT_REP", "password": "bob-pw" },
    { "login": "vera", "id": 12, "role": "VIEWER", "password": "vera-pw" }
  ]
}"#;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let directory = Arc::new(Directory::from_json(DIRECTORY).unwrap());
    let engine = Arc::new(Engine::new(dir.join("bookings.wal"), directory).unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, None).await;
            });
        }
    });

    addr
}

async fn try_connect(
    addr: SocketAddr,
    user: &str,
    password: &str,
) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("campus")
        .user(user)
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, user: &str) -> tokio_postgres::Client {
    try_connect(addr, user, &format!("{user}-pw")).await.unwrap()
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn query(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

/// SQLSTATE and message of a failed statement.
async fn query_err(client: &tokio_postgres::Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.unwrap_err();
    let db = err.as_db_error().expect("expected a database error");
    (db.code().code().to_string(), db.message().to_string())
}

/// Whole hour at least `hours` from now, as RFC 3339.
fn at(hours: i64) -> String {
    let base = Utc::now() + TimeDelta::hours(hours + 1);
    let truncated = base.timestamp() - base.timestamp() % 3600;
    DateTime::from_timestamp(truncated, 0)
        .unwrap()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn insert_booking(room_id: i64, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO bookings (room_id, start_time, end_time, purpose) \
         VALUES ({room_id}, '{start}', '{end}', 'Society meeting')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_read_back_booking() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    let created = query(&alice, &insert_booking(1, &at(2), &at(3))).await;
    assert_eq!(created.len(), 1);
    let id = created[0].get("id").unwrap().to_string();
    assert_eq!(created[0].get("status"), Some("ACTIVE"));
    assert_eq!(created[0].get("created_by"), Some("10"));
    assert_eq!(created[0].get("is_semester_booking"), Some("f"));
    assert_eq!(created[0].get("room_name"), Some("A101"));

    let fetched = query(&alice, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].get("purpose"), Some("Society meeting"));

    let listed = query(&alice, "SELECT * FROM bookings WHERE room_id = 1 AND status = 'ACTIVE'").await;
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn second_booking_for_same_slot_conflicts() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;

    query(&alice, &insert_booking(1, &at(2), &at(3))).await;
    let (code, message) = query_err(&bob, &insert_booking(1, &at(2), &at(3))).await;
    assert_eq!(code, "23P01");
    assert!(message.starts_with("ROOM_CONFLICT: Room is already booked"), "{message}");
}

#[tokio::test]
async fn user_conflict_names_room() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    query(&alice, &insert_booking(1, &at(2), &at(4))).await;
    let (code, message) = query_err(&alice, &insert_booking(2, &at(3), &at(5))).await;
    assert_eq!(code, "23P01");
    assert!(message.contains("in Room A101"), "{message}");
}

#[tokio::test]
async fn temporal_rules_reported_as_validation_errors() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    let (code, message) = query_err(&alice, &insert_booking(1, &at(-3), &at(-2))).await;
    assert_eq!(code, "22023");
    assert!(message.starts_with("BOOKING_IN_PAST"), "{message}");

    let (code, message) = query_err(&alice, &insert_booking(1, &at(240), &at(241))).await;
    assert_eq!(code, "22023");
    assert!(message.contains("Regular bookings allowed only for the current week"), "{message}");
}

#[tokio::test]
async fn viewer_can_read_but_not_book() {
    let addr = start_test_server().await;
    let vera = connect(addr, "vera").await;

    let (code, _) = query_err(&vera, &insert_booking(1, &at(2), &at(3))).await;
    assert_eq!(code, "42501");

    let rooms = query(&vera, "SELECT * FROM rooms WHERE capacity >= 100").await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].get("name"), Some("B202"));
    assert_eq!(rooms[0].get("has_projector"), Some("t"));
}

#[tokio::test]
async fn only_creator_cancels() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;

    let created = query(&alice, &insert_booking(1, &at(2), &at(3))).await;
    let id = created[0].get("id").unwrap().to_string();

    let (code, _) = query_err(&bob, &format!("DELETE FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(code, "42501");

    let done = query(
        &alice,
        &format!("UPDATE bookings SET status = 'CANCELLED' WHERE id = '{id}'"),
    )
    .await;
    assert_eq!(done[0].get("status"), Some("Success"));
    assert_eq!(done[0].get("message"), Some("Booking cancelled"));

    let again = query(&alice, &format!("DELETE FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(again[0].get("message"), Some("Booking already cancelled"));

    let row = query(&alice, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(row[0].get("status"), Some("CANCELLED"));
    assert!(row[0].get("cancelled_at").is_some());
}

#[tokio::test]
async fn semester_booking_creates_fifteen_rows() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    let summary = query(
        &alice,
        &format!(
            "INSERT INTO semester_bookings (room_id, start_time, end_time, purpose) \
             VALUES (2, '{}', '{}', 'Compilers lab')",
            at(26),
            at(28)
        ),
    )
    .await;
    assert_eq!(summary[0].get("status"), Some("Success"));
    assert_eq!(summary[0].get("message"), Some("Semester booking confirmed for 15 weeks"));
    assert_eq!(summary[0].get("weeks"), Some("15"));

    let mine = query(&alice, "SELECT * FROM bookings WHERE created_by = 10").await;
    assert_eq!(mine.len(), 15);
    assert!(mine.iter().all(|r| r.get("is_semester_booking") == Some("t")));
}

#[tokio::test]
async fn reschedule_records_history() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;

    let (start, end) = (at(2), at(3));
    let created = query(&alice, &insert_booking(1, &start, &end)).await;
    let id = created[0].get("id").unwrap().to_string();

    let moved = query(
        &bob,
        &format!("UPDATE bookings SET room_id = 2, start_time = '{}', end_time = '{}' WHERE id = '{id}'", at(5), at(6)),
    )
    .await;
    assert_eq!(moved[0].get("room_id"), Some("2"));

    let history = query(&bob, &format!("SELECT * FROM booking_history WHERE booking_id = '{id}'")).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("previous_room_id"), Some("1"));
    assert_eq!(history[0].get("modified_by"), Some("11"));
    assert_eq!(history[0].get("change_type"), Some("RESCHEDULE"));
}

#[tokio::test]
async fn bad_sql_and_unknown_login_rejected() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    let (code, _) = query_err(&alice, "SELECT * FROM wizards").await;
    assert_eq!(code, "42601");

    assert!(try_connect(addr, "mallory", "guess").await.is_err());
    assert!(try_connect(addr, "alice", "wrong").await.is_err());
}

// ── Extended query protocol ──────────────────────────────────

const INSERT_PARAMS: &str =
    "INSERT INTO bookings (room_id, start_time, end_time, purpose) VALUES ($1, $2, $3, $4)";

#[tokio::test]
async fn bound_purpose_keeps_placeholder_text() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;
    let (start, end) = (at(2), at(3));

    let created = alice
        .query(INSERT_PARAMS, &[&"1", &start, &end, &"Fee is $1 per head"])
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get::<_, &str>("purpose"), "Fee is $1 per head");
    assert_eq!(created[0].get::<_, i64>("room_id"), 1);
    assert_eq!(created[0].get::<_, &str>("room_name"), "A101");

    let quoted = alice
        .query(INSERT_PARAMS, &[&"2", &start, &end, &"'); DELETE FROM bookings; --"])
        .await;
    // Same user, same window: rejected as a conflict, not as a parse error.
    let err = quoted.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "23P01");
}

#[tokio::test]
async fn extended_insert_select_and_cancel() {
    let addr = start_test_server().await;
    let alice = connect(addr, "alice").await;

    let created = alice
        .query(INSERT_PARAMS, &[&"2", &at(4), &at(5), &"Study group"])
        .await
        .unwrap();
    let id: String = created[0].get("id");
    assert!(!created[0].get::<_, bool>("is_semester_booking"));

    let fetched = alice
        .query("SELECT * FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].get::<_, &str>("status"), "ACTIVE");
    assert_eq!(fetched[0].get::<_, i64>("created_by"), 10);

    let cancelled = alice
        .query("UPDATE bookings SET status = 'CANCELLED' WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(cancelled[0].get::<_, &str>("message"), "Booking cancelled");
    assert_eq!(cancelled[0].get::<_, Option<i64>>("weeks"), None);

    let fetched = alice
        .query("SELECT * FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(fetched[0].get::<_, &str>("status"), "CANCELLED");
    assert!(fetched[0].get::<_, Option<&str>>("cancelled_at").is_some());
}

#[tokio::test]
async fn extended_room_query_decodes_binary_columns() {
    let addr = start_test_server().await;
    let vera = connect(addr, "vera").await;

    let rooms = vera.query("SELECT * FROM rooms", &[]).await.unwrap();
    assert_eq!(rooms.len(), 2);
    let a101 = rooms.iter().find(|r| r.get::<_, &str>("name") == "A101").unwrap();
    assert_eq!(a101.get::<_, i64>("capacity"), 40);
    assert_eq!(a101.get::<_, Option<i32>>("floor"), Some(1));
    assert_eq!(a101.get::<_, Option<&str>>("building"), Some("Main"));
    assert!(a101.get::<_, bool>("has_ac"));
}
