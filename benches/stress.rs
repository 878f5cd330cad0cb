use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Days;
use ulid::Ulid;

use posada::engine::{Engine, EngineError};
use posada::model::{Day, Payment, ReservationDraft};
use posada::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn base_day() -> Day {
    "2024-01-01".parse().unwrap()
}

fn one_night(room: &str, contact: &str, offset: u64) -> ReservationDraft {
    let entry = base_day().checked_add_days(Days::new(offset)).unwrap();
    let exit = entry.checked_add_days(Days::new(1)).unwrap();
    ReservationDraft {
        room_id: room.to_string(),
        guest_name: "Stress Guest".into(),
        contact: contact.to_string(),
        party_size: 1,
        entry,
        exit,
        additional_guests: vec![],
        addon_ids: vec![],
        observations: String::new(),
        payment: Payment::Deposit(0),
        created_by: None,
    }
}

async fn fresh_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("posada_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(dir.join(format!("{name}.wal")), Arc::new(NotifyHub::new())).unwrap();
    engine.bootstrap().await.unwrap();
    engine
}

async fn phase1_sequential() {
    let engine = fresh_engine("sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_reservation(Ulid::new(), one_night("KAWSAY", "bench@example.com", i as u64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  throughput: {:.0} reservations/sec",
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("create latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = fresh_engine("concurrent").await;
    let rooms = ["KAWSAY", "INFINITY", "DIAMANTE", "JARDIN"];

    let tasks = 8;
    let per_task = 250;
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let room = rooms[t % rooms.len()];
            let mut ok = 0u32;
            let mut conflicts = 0u32;
            for i in 0..per_task {
                // Two tasks share each room and attempt the same days, so one
                // of each contested pair commits and the other conflicts.
                let offset = (i * 2) as u64;
                let contact = format!("task{t}@example.com");
                match engine
                    .create_reservation(Ulid::new(), one_night(room, &contact, offset))
                    .await
                {
                    Ok(_) => ok += 1,
                    Err(EngineError::RoomUnavailable { .. }) => conflicts += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (ok, conflicts)
        }));
    }

    let mut total_ok = 0;
    let mut total_conflicts = 0;
    for handle in handles {
        let (ok, conflicts) = handle.await.unwrap();
        total_ok += ok;
        total_conflicts += conflicts;
    }

    let elapsed = start.elapsed();
    let attempted = tasks * per_task;
    println!(
        "  {attempted} proposals across {tasks} tasks in {:.2}s ({:.0} ops/sec)",
        elapsed.as_secs_f64(),
        attempted as f64 / elapsed.as_secs_f64()
    );
    println!("  committed={total_ok}, conflicts={total_conflicts}");
}

async fn phase3_occupancy_queries() {
    let engine = fresh_engine("occupancy").await;

    // Populate each room with bookings throughout 2024
    for room in ["KAWSAY", "INFINITY", "DIAMANTE", "JARDIN"] {
        for i in 0..150 {
            engine
                .create_reservation(Ulid::new(), one_night(room, "bench@example.com", i * 2))
                .await
                .unwrap();
        }
    }

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let month = (i % 12) as u32 + 1;
        let t = Instant::now();
        let _ = engine.month_occupancy(2024, month).await.unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("month_occupancy latency", &mut latencies);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    println!("phase 1: sequential creates, single room");
    phase1_sequential().await;

    println!("phase 2: concurrent creates, shared rooms");
    phase2_concurrent().await;

    println!("phase 3: month occupancy queries");
    phase3_occupancy_queries().await;
}
