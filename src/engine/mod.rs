mod availability;
mod catalog;
mod clients;
mod error;
mod ledger;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::{PUBLISH_QUEUE_CAPACITY, WAL_APPEND_TIMEOUT_MS};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomLedger = Arc<RwLock<RoomLedger>>;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The reservation & availability engine for a single property.
///
/// Owns the catalog, the per-room reservation ledgers, and the derived client
/// index. Every committed mutation is WAL-appended before it is applied; the
/// per-room write lock is the transaction boundary for the propose pipeline.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, Room>,
    pub(super) prices: DashMap<RoomId, i64>,
    pub(super) addons: DashMap<Ulid, Addon>,
    pub(super) holidays: DashMap<Ulid, Holiday>,
    pub(super) ledgers: DashMap<RoomId, SharedRoomLedger>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, RoomId>,
    /// Derived client index, keyed by exact contact.
    pub(super) clients: DashMap<String, Client>,
    /// Contacts whose index entry failed a secondary write and awaits repair.
    pub(super) dirty_contacts: DashMap<String, ()>,
    wal_tx: mpsc::Sender<WalCommand>,
    publish_tx: mpsc::Sender<Collection>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Arc<Self>> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);

        let engine = Arc::new(Self {
            rooms: DashMap::new(),
            prices: DashMap::new(),
            addons: DashMap::new(),
            holidays: DashMap::new(),
            ledgers: DashMap::new(),
            reservation_to_room: DashMap::new(),
            clients: DashMap::new(),
            dirty_contacts: DashMap::new(),
            wal_tx,
            publish_tx,
            notify,
        });

        // Replay — we're the sole owner of the ledger Arcs here, so try_write
        // always succeeds instantly. Never blocking_write: this may run inside
        // an async context.
        for event in &events {
            engine.apply_replayed(event);
        }

        tokio::spawn(publisher_loop(Arc::downgrade(&engine), publish_rx));

        Ok(engine)
    }

    /// Apply one replayed WAL event to in-memory state.
    fn apply_replayed(&self, event: &Event) {
        match event {
            Event::RoomCreated { id, name } => {
                self.rooms.insert(
                    id.clone(),
                    Room {
                        id: id.clone(),
                        name: name.clone(),
                    },
                );
                self.ledgers
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(RwLock::new(RoomLedger::new(id.clone()))));
            }
            Event::PriceSet { room_id, nightly_rate } => {
                self.prices.insert(room_id.clone(), *nightly_rate);
            }
            Event::AddonAdded { id, name, price } => {
                self.addons.insert(
                    *id,
                    Addon {
                        id: *id,
                        name: name.clone(),
                        price: *price,
                    },
                );
            }
            Event::AddonRemoved { id } => {
                self.addons.remove(id);
            }
            Event::HolidayAdded { id, day, name } => {
                self.holidays.insert(
                    *id,
                    Holiday {
                        id: *id,
                        day: *day,
                        name: name.clone(),
                    },
                );
            }
            Event::HolidayRemoved { id } => {
                self.holidays.remove(id);
            }
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                // An update may have moved the reservation to another room.
                if let Some(old_room) = self
                    .reservation_to_room
                    .get(&reservation.id)
                    .map(|e| e.value().clone())
                    && old_room != reservation.room_id
                    && let Some(ledger) = self.get_ledger(&old_room)
                {
                    ledger
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(reservation.id);
                }
                // Externally-ingested reservations may precede any room
                // record — give them a ledger anyway.
                let ledger = self
                    .ledgers
                    .entry(reservation.room_id.clone())
                    .or_insert_with(|| {
                        Arc::new(RwLock::new(RoomLedger::new(reservation.room_id.clone())))
                    })
                    .clone();
                let mut guard = ledger.try_write().expect("replay: uncontended write");
                guard.remove(reservation.id);
                guard.insert(reservation.clone());
                drop(guard);
                self.reservation_to_room
                    .insert(reservation.id, reservation.room_id.clone());
            }
            Event::ReservationDeleted { id, room_id } => {
                if let Some(ledger) = self.get_ledger(room_id) {
                    ledger
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(*id);
                }
                self.reservation_to_room.remove(id);
            }
            Event::ClientLinked {
                id,
                guest_name,
                contact,
                reservation_id,
                at,
            } => {
                self.apply_client_link(*id, guest_name, contact, *reservation_id, *at);
            }
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// Bounded: surfaces `StoreUnavailable` instead of hanging.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let deadline = Duration::from_millis(WAL_APPEND_TIMEOUT_MS);
        let (tx, rx) = oneshot::channel();
        let commit = async {
            self.wal_tx
                .send(WalCommand::Append {
                    event: event.clone(),
                    response: tx,
                })
                .await
                .map_err(|_| EngineError::StoreUnavailable("log writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::StoreUnavailable("log writer dropped response".into()))?
                .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
        };
        match tokio::time::timeout(deadline, commit).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::StoreUnavailable("write timed out".into())),
        }
    }

    pub(super) fn get_ledger(&self, room_id: &str) -> Option<SharedRoomLedger> {
        self.ledgers.get(room_id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, id: &Ulid) -> Option<RoomId> {
        self.reservation_to_room.get(id).map(|e| e.value().clone())
    }

    /// Queue a full-snapshot publication for a collection. The publisher task
    /// snapshots and broadcasts sequentially, so a later snapshot never
    /// precedes an earlier one for the same collection. On overflow the marker
    /// is dropped — subscribers converge on the next delivered snapshot.
    pub(super) fn publish(&self, collection: Collection) {
        if self.publish_tx.try_send(collection).is_err() {
            metrics::counter!(crate::observability::PUBLISH_DROPPED_TOTAL).increment(1);
            tracing::debug!(?collection, "publish queue full, dropped change marker");
        }
    }

    // ── Sync bridge ──────────────────────────────────────

    /// Accept an externally-originated mutation as authoritative truth.
    ///
    /// The external store wins: no local conflict check is re-run. The write
    /// is persisted and applied, and the derived client index is re-computed
    /// for the affected contact from the full reservation snapshot rather
    /// than trusting locally cached links.
    pub async fn ingest_external(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;

        match &event {
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                self.apply_external_reservation(reservation.clone()).await;
                if !reservation.contact.is_empty() {
                    if let Err(e) = self.rebuild_links_for_contact(&reservation.contact).await {
                        tracing::error!(
                            contact = %reservation.contact,
                            "client index rebuild after external write failed: {e}"
                        );
                        self.dirty_contacts.insert(reservation.contact.clone(), ());
                    }
                    self.publish(Collection::Clients);
                }
            }
            Event::ReservationDeleted { id, room_id } => {
                if let Some(ledger) = self.get_ledger(room_id) {
                    ledger.write().await.remove(*id);
                }
                self.reservation_to_room.remove(id);
            }
            // Catalog and client events apply the same way as during replay.
            other => self.apply_replayed(other),
        }

        self.publish(event.collection());
        Ok(())
    }

    async fn apply_external_reservation(&self, reservation: Reservation) {
        if let Some(old_room) = self.room_for_reservation(&reservation.id)
            && old_room != reservation.room_id
            && let Some(ledger) = self.get_ledger(&old_room)
        {
            ledger.write().await.remove(reservation.id);
        }
        let ledger = self
            .ledgers
            .entry(reservation.room_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(RoomLedger::new(reservation.room_id.clone()))))
            .clone();
        let mut guard = ledger.write().await;
        guard.remove(reservation.id);
        self.reservation_to_room
            .insert(reservation.id, reservation.room_id.clone());
        guard.insert(reservation);
    }

    // ── WAL compaction ───────────────────────────────────

    /// Rewrite the WAL with the minimal event set recreating current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        for room in rooms {
            events.push(Event::RoomCreated {
                id: room.id,
                name: room.name,
            });
        }

        let mut prices: Vec<(RoomId, i64)> =
            self.prices.iter().map(|e| (e.key().clone(), *e.value())).collect();
        prices.sort();
        for (room_id, nightly_rate) in prices {
            events.push(Event::PriceSet { room_id, nightly_rate });
        }

        let mut addons: Vec<Addon> = self.addons.iter().map(|e| e.value().clone()).collect();
        addons.sort_by_key(|a| a.id);
        for addon in addons {
            events.push(Event::AddonAdded {
                id: addon.id,
                name: addon.name,
                price: addon.price,
            });
        }

        let mut holidays: Vec<Holiday> = self.holidays.iter().map(|e| e.value().clone()).collect();
        holidays.sort_by_key(|h| (h.day, h.id));
        for holiday in holidays {
            events.push(Event::HolidayAdded {
                id: holiday.id,
                day: holiday.day,
                name: holiday.name,
            });
        }

        let mut room_ids: Vec<RoomId> = self.ledgers.iter().map(|e| e.key().clone()).collect();
        room_ids.sort();
        for room_id in room_ids {
            let Some(ledger) = self.get_ledger(&room_id) else { continue };
            let guard = ledger.read().await;
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }

        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by(|a, b| a.contact.cmp(&b.contact));
        for client in clients {
            for reservation_id in &client.reservation_ids {
                events.push(Event::ClientLinked {
                    id: client.id,
                    guest_name: client.guest_name.clone(),
                    contact: client.contact.clone(),
                    reservation_id: *reservation_id,
                    at: client.created_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("log writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("log writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Serializes snapshot publications: markers arrive in commit order, each is
/// expanded to a full collection snapshot and broadcast before the next.
async fn publisher_loop(engine: Weak<Engine>, mut rx: mpsc::Receiver<Collection>) {
    while let Some(collection) = rx.recv().await {
        let Some(engine) = engine.upgrade() else { break };
        let snapshot = engine.snapshot(collection).await;
        engine.notify.send(snapshot);
    }
}
