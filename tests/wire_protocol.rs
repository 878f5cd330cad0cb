use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use posada::engine::Engine;
use posada::notify::NotifyHub;
use posada::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(name: &str) -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("posada_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(dir.join(format!("{name}.wal")), Arc::new(NotifyHub::new())).unwrap();
    engine.bootstrap().await.unwrap();

    let accept_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = accept_engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

struct TestClient {
    framed: Framed<TcpStream, LinesCodec>,
    pushed: VecDeque<Value>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            pushed: VecDeque::new(),
        }
    }

    /// Send one request line and wait for its reply, buffering any pushed
    /// snapshot lines that arrive in between.
    async fn request(&mut self, body: Value) -> Value {
        self.framed.send(body.to_string()).await.unwrap();
        loop {
            let line = self.framed.next().await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            if value.get("snapshot").is_some() {
                self.pushed.push_back(value);
                continue;
            }
            return value;
        }
    }

    /// Next pushed snapshot, waiting up to `timeout`.
    async fn next_snapshot(&mut self, timeout: Duration) -> Option<Value> {
        if let Some(value) = self.pushed.pop_front() {
            return Some(value);
        }
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                line = self.framed.next() => {
                    let value: Value = serde_json::from_str(&line?.ok()?).ok()?;
                    if value.get("snapshot").is_some() {
                        return Some(value);
                    }
                }
                _ = &mut deadline => return None,
            }
        }
    }
}

fn create_request(room: &str, contact: &str, entry: &str, exit: &str) -> Value {
    json!({
        "op": "create_reservation",
        "draft": {
            "room_id": room,
            "guest_name": "Ana Torres",
            "contact": contact,
            "party_size": 2,
            "entry": entry,
            "exit": exit,
        }
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn list_rooms_returns_seeded_catalog() {
    let (addr, _engine) = start_test_server("list_rooms").await;
    let mut client = TestClient::connect(addr).await;

    let reply = client.request(json!({"op": "list_rooms"})).await;
    let rooms = reply["ok"].as_array().unwrap();
    assert_eq!(rooms.len(), 4);
    let ids: Vec<&str> = rooms.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"KAWSAY"));
}

#[tokio::test]
async fn create_conflict_and_back_to_back() {
    let (addr, _engine) = start_test_server("create_conflict").await;
    let mut client = TestClient::connect(addr).await;

    let reply = client
        .request(create_request("KAWSAY", "ana@example.com", "2024-01-01", "2024-01-05"))
        .await;
    assert!(reply["ok"]["id"].is_string(), "unexpected reply: {reply}");
    assert_eq!(reply["ok"]["total_amount"].as_i64().unwrap(), 4 * 500_000);

    // Overlapping range on the same room fails with a conflict code.
    let reply = client
        .request(create_request("KAWSAY", "luis@example.com", "2024-01-04", "2024-01-06"))
        .await;
    assert_eq!(reply["error"]["code"], "conflict");

    // Back-to-back is allowed.
    let reply = client
        .request(create_request("KAWSAY", "luis@example.com", "2024-01-05", "2024-01-08"))
        .await;
    assert!(reply["ok"]["id"].is_string(), "unexpected reply: {reply}");
}

#[tokio::test]
async fn validation_and_malformed_error_codes() {
    let (addr, _engine) = start_test_server("error_codes").await;
    let mut client = TestClient::connect(addr).await;

    let reply = client
        .request(create_request("KAWSAY", "ana@example.com", "2024-01-05", "2024-01-05"))
        .await;
    assert_eq!(reply["error"]["code"], "validation");

    client.framed.send("this is not json".to_string()).await.unwrap();
    let line = client.framed.next().await.unwrap().unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["error"]["code"], "malformed");
}

#[tokio::test]
async fn delete_unknown_id_is_noop() {
    let (addr, _engine) = start_test_server("delete_noop").await;
    let mut client = TestClient::connect(addr).await;

    let reply = client
        .request(json!({"op": "delete_reservation", "id": Ulid::new().to_string()}))
        .await;
    assert!(reply["ok"]["deleted"].is_string());
}

#[tokio::test]
async fn subscribe_streams_snapshots() {
    let (addr, _engine) = start_test_server("subscribe").await;
    let mut subscriber = TestClient::connect(addr).await;

    let reply = subscriber
        .request(json!({"op": "subscribe", "collection": "reservations"}))
        .await;
    assert_eq!(reply["ok"]["subscribed"], "reservations");

    // Initial snapshot: the empty collection.
    let initial = subscriber
        .next_snapshot(Duration::from_secs(5))
        .await
        .expect("no initial snapshot");
    assert_eq!(initial["snapshot"]["collection"], "reservations");
    assert!(initial["snapshot"]["data"].as_array().unwrap().is_empty());

    // Another connection books a room; the subscriber sees the new state.
    let mut writer = TestClient::connect(addr).await;
    let created = writer
        .request(create_request("JARDIN", "ana@example.com", "2024-06-01", "2024-06-04"))
        .await;
    let created_id = created["ok"]["id"].as_str().unwrap().to_string();

    let mut found = false;
    for _ in 0..5 {
        let Some(snapshot) = subscriber.next_snapshot(Duration::from_secs(5)).await else {
            break;
        };
        let data = snapshot["snapshot"]["data"].as_array().unwrap().clone();
        if data.iter().any(|r| r["id"] == created_id.as_str()) {
            found = true;
            break;
        }
    }
    assert!(found, "subscriber never saw the new reservation");
}

#[tokio::test]
async fn occupancy_and_summary_over_the_wire() {
    let (addr, _engine) = start_test_server("occupancy").await;
    let mut client = TestClient::connect(addr).await;

    client
        .request(create_request("KAWSAY", "ana@example.com", "2024-01-10", "2024-01-13"))
        .await;

    let reply = client
        .request(json!({"op": "is_occupied", "room_id": "KAWSAY", "day": "2024-01-12"}))
        .await;
    assert!(reply["ok"].is_object());

    let reply = client
        .request(json!({"op": "is_occupied", "room_id": "KAWSAY", "day": "2024-01-13"}))
        .await;
    assert!(reply["ok"].is_null()); // checkout day

    let reply = client
        .request(json!({"op": "month_occupancy", "year": 2024, "month": 1}))
        .await;
    let days = reply["ok"]["occupied"]["KAWSAY"].as_array().unwrap();
    assert_eq!(days.len(), 3);

    let reply = client.request(json!({"op": "business_summary"})).await;
    assert_eq!(reply["ok"]["reservation_count"].as_u64().unwrap(), 1);
    assert_eq!(reply["ok"]["total_amount"].as_i64().unwrap(), 3 * 500_000);
}

#[tokio::test]
async fn clients_visible_after_booking() {
    let (addr, _engine) = start_test_server("clients").await;
    let mut client = TestClient::connect(addr).await;

    client
        .request(create_request("KAWSAY", "ana@example.com", "2024-01-01", "2024-01-05"))
        .await;
    client
        .request(create_request("JARDIN", "ana@example.com", "2024-02-01", "2024-02-05"))
        .await;

    let reply = client.request(json!({"op": "list_clients"})).await;
    let clients = reply["ok"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["contact"], "ana@example.com");
    assert_eq!(clients[0]["reservation_ids"].as_array().unwrap().len(), 2);
}
