use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_WIRE_LINE_BYTES;
use crate::model::*;
use crate::observability;

/// One request per line, JSON-encoded, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateReservation {
        /// Optional caller-supplied id for idempotent retries.
        #[serde(default)]
        id: Option<Ulid>,
        draft: ReservationDraft,
    },
    UpdateReservation {
        id: Ulid,
        draft: ReservationDraft,
    },
    DeleteReservation {
        id: Ulid,
    },
    SetPrice {
        room_id: RoomId,
        nightly_rate: i64,
    },
    AddAddon {
        name: String,
        price: i64,
    },
    RemoveAddon {
        id: Ulid,
    },
    AddHoliday {
        day: Day,
        name: String,
    },
    RemoveHoliday {
        id: Ulid,
    },
    ListRooms,
    ListPrices,
    ListAddons,
    ListHolidays,
    ListClients,
    ListReservations,
    GetReservation {
        id: Ulid,
    },
    IsOccupied {
        room_id: RoomId,
        day: Day,
    },
    MonthOccupancy {
        year: i32,
        month: u32,
    },
    BusinessSummary,
    MonthSummary {
        year: i32,
        month: u32,
    },
    /// Sync bridge: an externally-originated mutation from the authoritative
    /// store's feed. Applied without re-running the local conflict check.
    Ingest {
        event: Event,
    },
    Subscribe {
        collection: Collection,
    },
    Unsubscribe {
        collection: Collection,
    },
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn error_line(code: &str, message: &str) -> String {
    json!({"error": {"code": code, "message": message}}).to_string()
}

fn snapshot_line(snapshot: &Snapshot) -> String {
    json!({"snapshot": snapshot}).to_string()
}

fn to_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "request line too long")
        }
    }
}

/// Serve one client connection: dispatch request lines, interleave pushed
/// subscription snapshots.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let codec = LinesCodec::new_with_max_length(MAX_WIRE_LINE_BYTES);
    let mut framed = Framed::new(socket, codec);
    let (push_tx, mut push_rx) = mpsc::channel::<String>(64);
    let mut subscriptions: HashMap<Collection, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            line = framed.next() => {
                match line {
                    None => break,
                    Some(Err(e)) => {
                        for handle in subscriptions.values() {
                            handle.abort();
                        }
                        return Err(to_io(e));
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let reply =
                            dispatch_line(&engine, &line, &push_tx, &mut subscriptions).await;
                        framed.send(reply).await.map_err(to_io)?;
                    }
                }
            }
            Some(push) = push_rx.recv() => {
                framed.send(push).await.map_err(to_io)?;
            }
        }
    }

    for handle in subscriptions.values() {
        handle.abort();
    }
    Ok(())
}

async fn dispatch_line(
    engine: &Arc<Engine>,
    line: &str,
    push_tx: &mpsc::Sender<String>,
    subscriptions: &mut HashMap<Collection, JoinHandle<()>>,
) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return error_line("malformed", &format!("bad request: {e}")),
    };

    let op = observability::op_label(&request);
    let start = Instant::now();
    let result = handle_request(engine, request, push_tx, subscriptions).await;
    metrics::histogram!(observability::OP_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::OPS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({"ok": value}).to_string()
        }
        Err(e) => {
            metrics::counter!(observability::OPS_TOTAL, "op" => op, "status" => "error")
                .increment(1);
            error_line(e.code(), &e.to_string())
        }
    }
}

async fn handle_request(
    engine: &Arc<Engine>,
    request: Request,
    push_tx: &mpsc::Sender<String>,
    subscriptions: &mut HashMap<Collection, JoinHandle<()>>,
) -> Result<serde_json::Value, EngineError> {
    match request {
        Request::CreateReservation { id, draft } => {
            let id = id.unwrap_or_else(Ulid::new);
            let reservation = engine.create_reservation(id, draft).await?;
            Ok(to_value(&reservation))
        }
        Request::UpdateReservation { id, draft } => {
            let reservation = engine.update_reservation(id, draft).await?;
            Ok(to_value(&reservation))
        }
        Request::DeleteReservation { id } => {
            engine.delete_reservation(id).await?;
            Ok(json!({"deleted": id}))
        }
        Request::SetPrice { room_id, nightly_rate } => {
            engine.set_price(room_id.clone(), nightly_rate).await?;
            Ok(json!({"room_id": room_id, "nightly_rate": nightly_rate}))
        }
        Request::AddAddon { name, price } => {
            let addon = engine.add_addon(Ulid::new(), name, price).await?;
            Ok(to_value(&addon))
        }
        Request::RemoveAddon { id } => {
            engine.remove_addon(id).await?;
            Ok(json!({"removed": id}))
        }
        Request::AddHoliday { day, name } => {
            let holiday = engine.add_holiday(Ulid::new(), day, name).await?;
            Ok(to_value(&holiday))
        }
        Request::RemoveHoliday { id } => {
            engine.remove_holiday(id).await?;
            Ok(json!({"removed": id}))
        }
        Request::ListRooms => Ok(to_value(&engine.list_rooms())),
        Request::ListPrices => Ok(to_value(&engine.list_prices())),
        Request::ListAddons => Ok(to_value(&engine.list_addons())),
        Request::ListHolidays => Ok(to_value(&engine.list_holidays())),
        Request::ListClients => Ok(to_value(&engine.list_clients())),
        Request::ListReservations => Ok(to_value(&engine.list_reservations().await)),
        Request::GetReservation { id } => Ok(to_value(&engine.get_reservation(id).await)),
        Request::IsOccupied { room_id, day } => {
            Ok(to_value(&engine.is_occupied(&room_id, day).await))
        }
        Request::MonthOccupancy { year, month } => {
            let occupancy = engine.month_occupancy(year, month).await?;
            Ok(to_value(&occupancy))
        }
        Request::BusinessSummary => Ok(to_value(&engine.business_summary().await)),
        Request::MonthSummary { year, month } => {
            let summary = engine.month_summary(year, month).await?;
            Ok(to_value(&summary))
        }
        Request::Ingest { event } => {
            engine.ingest_external(event).await?;
            Ok(json!({"ingested": true}))
        }
        Request::Subscribe { collection } => {
            if !subscriptions.contains_key(&collection) {
                let mut rx = engine.notify.subscribe(collection);
                // Initial full snapshot, then one per change.
                let initial = engine.snapshot(collection).await;
                let _ = push_tx.send(snapshot_line(&initial)).await;

                let tx = push_tx.clone();
                let handle = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(snapshot) => {
                                if tx.send(snapshot_line(&snapshot)).await.is_err() {
                                    break;
                                }
                            }
                            // A lagged receiver just waits for the next full
                            // snapshot — replace semantics make skips safe.
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                subscriptions.insert(collection, handle);
            }
            Ok(json!({"subscribed": collection}))
        }
        Request::Unsubscribe { collection } => {
            if let Some(handle) = subscriptions.remove(&collection) {
                handle.abort();
            }
            Ok(json!({"unsubscribed": collection}))
        }
    }
}
