use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("waitroom")
        .user("waitroom")
        .password(std::env::var("WAITROOM_PASSWORD").unwrap_or_else(|_| "waitroom".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Rooms the server was seeded with, ascending by id.
async fn room_ids(client: &tokio_postgres::Client) -> Vec<u32> {
    client
        .simple_query("SELECT * FROM rooms")
        .await
        .expect("list rooms")
        .into_iter()
        .filter_map(|msg| match msg {
            tokio_postgres::SimpleQueryMessage::Row(row) => {
                row.get("id").and_then(|id| id.parse().ok())
            }
            _ => None,
        })
        .collect()
}

async fn phase1_waitlist_churn(host: &str, port: u16, room: u32) {
    let client = connect(host, port).await;
    let n = 2000;
    let mut joins = Vec::with_capacity(n);
    let mut leaves = Vec::with_capacity(n);
    let start = Instant::now();

    for _ in 0..n {
        let name = format!("guest_{}", Ulid::new());
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO waitlist (room_id, name) VALUES ({room}, '{name}')"
            ))
            .await
            .unwrap();
        joins.push(t.elapsed());

        let t = Instant::now();
        client
            .batch_execute(&format!("DELETE FROM waitlist WHERE name = '{name}'"))
            .await
            .unwrap();
        leaves.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {} ops in {:.2}s ({:.0} ops/s)",
        n * 2,
        elapsed.as_secs_f64(),
        (n * 2) as f64 / elapsed.as_secs_f64()
    );
    print_latency("join_waitlist", &mut joins);
    print_latency("leave_waitlist", &mut leaves);
}

async fn phase2_contended_enter(host: &str, port: u16, room: u32) {
    let n_conns = 32;
    let rounds = 50;
    let entered = Arc::new(AtomicUsize::new(0));
    let occupied = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for c in 0..n_conns {
        let host = host.to_string();
        let entered = entered.clone();
        let occupied = occupied.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for r in 0..rounds {
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO occupants (room_id, name) VALUES ({room}, 'c{c}_r{r}')"
                    ))
                    .await;
                match result {
                    Ok(()) => {
                        entered.fetch_add(1, Ordering::Relaxed);
                        client
                            .batch_execute(&format!("DELETE FROM occupants WHERE room_id = {room}"))
                            .await
                            .unwrap();
                    }
                    Err(_) => {
                        occupied.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_conns} connections x {rounds} attempts in {:.2}s: {} entered, {} found it occupied",
        elapsed.as_secs_f64(),
        entered.load(Ordering::Relaxed),
        occupied.load(Ordering::Relaxed),
    );
}

async fn phase3_read_under_load(host: &str, port: u16, rooms: &[u32]) {
    let writers = 8;
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut handles = Vec::new();

    for w in 0..writers {
        let host = host.to_string();
        let stop = stop.clone();
        let room = rooms[w % rooms.len()];
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let name = format!("w{w}_{i}");
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO waitlist (room_id, name) VALUES ({room}, '{name}');
                         DELETE FROM waitlist WHERE name = '{name}';"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    let reader = connect(host, port).await;
    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for _ in 0..n {
        let t = Instant::now();
        reader.simple_query("SELECT * FROM rooms").await.unwrap();
        latencies.push(t.elapsed());
    }

    stop.store(true, Ordering::Relaxed);
    for h in handles {
        let _ = h.await;
    }
    print_latency(&format!("SELECT rooms with {writers} writers"), &mut latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 200;
    let ok = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        let ok = ok.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            if client.simple_query("SELECT * FROM waitlist").await.is_ok() {
                ok.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    println!(
        "  {n_conns} connections: {}/{n_conns} succeeded in {:.2}s",
        ok.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("WAITROOM_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("WAITROOM_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid WAITROOM_PORT");

    println!("=== waitroom stress benchmark ===");
    println!("target: {host}:{port}\n");

    let setup_client = connect(&host, port).await;
    let rooms = room_ids(&setup_client).await;
    drop(setup_client);
    assert!(!rooms.is_empty(), "server has no rooms");
    println!("[setup]\n  {} rooms", rooms.len());

    println!("\n[phase 1] sequential wait list churn");
    phase1_waitlist_churn(&host, port, rooms[0]).await;

    println!("\n[phase 2] contended enter/leave");
    phase2_contended_enter(&host, port, rooms[0]).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port, &rooms).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
