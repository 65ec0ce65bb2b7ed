use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const DAY: i64 = 86_400_000;
const T0: i64 = 1_767_225_600_000;
const ROOMS: usize = 50;

struct Target {
    host: String,
    port: u16,
    password: String,
}

async fn connect(target: &Target, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(&target.host)
        .port(target.port)
        .dbname("roomrate")
        .user(user)
        .password(&target.password);

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

fn insert_booking(room: usize, stay: i64) -> String {
    let id = Ulid::new();
    let check_in = T0 + stay * DAY;
    format!(
        "INSERT INTO bookings (id, room_id, check_in, check_out) VALUES ('{id}', '{room}', {check_in}, {})",
        check_in + DAY
    )
}

/// Rooms 1..=ROOMS; rooms left over from an earlier run are kept.
async fn setup(target: &Target) {
    let client = connect(target, "bench_setup").await;
    let mut created = 0;
    for room in 1..=ROOMS {
        let sql = format!(
            "INSERT INTO rooms (id, base_price) VALUES ('{room}', {})",
            80 + room
        );
        if client.batch_execute(&sql).await.is_ok() {
            created += 1;
        }
    }
    println!("  created {created} rooms ({} already present)", ROOMS - created);
}

async fn phase1_sequential(target: &Target) {
    let client = connect(target, "bench_seq").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let sql = insert_booking(i % ROOMS + 1, i as i64);
        let t = Instant::now();
        client.batch_execute(&sql).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

/// Every booking contends on the one demand index, whichever room it targets.
async fn phase2_concurrent(target: &Arc<Target>) {
    let n_tasks = 20;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for t in 0..n_tasks {
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&target, &format!("bench_guest_{t}")).await;
            let mut latencies = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let sql = insert_booking((t + j) % ROOMS + 1, j as i64);
                let started = Instant::now();
                client.batch_execute(&sql).await.unwrap();
                latencies.push(started.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("booking latency", &mut all_latencies);
}

async fn phase3_quotes_under_load(target: &Arc<Target>) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let target = target.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&target, &format!("bench_writer_{w}")).await;
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let _ = client
                    .batch_execute(&insert_booking((w + i) % ROOMS + 1, i as i64))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let target = target.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&target, &format!("bench_reader_{r}")).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let sql = if i % 2 == 0 {
                    format!("SELECT * FROM quotes WHERE room_id = '{}'", i % ROOMS + 1)
                } else {
                    "SELECT * FROM demand WHERE slot >= 1 AND slot <= 25".to_string()
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("quote/demand query", &mut all_latencies);
}

async fn phase4_connection_storm(target: &Arc<Target>) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let target = target.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&target, &format!("bench_storm_{c}")).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&insert_booking((c + i) % ROOMS + 1, i as i64))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMRATE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMRATE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMRATE_PORT");
    let password = std::env::var("ROOMRATE_PASSWORD").unwrap_or_else(|_| "roomrate".into());
    let target = Arc::new(Target {
        host,
        port,
        password,
    });

    println!("=== roomrate stress benchmark ===");
    println!("target: {}:{}\n", target.host, target.port);

    println!("[setup]");
    setup(&target).await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&target).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&target).await;

    println!("\n[phase 3] quote latency under booking load");
    phase3_quotes_under_load(&target).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&target).await;

    let client = connect(&target, "bench_setup").await;
    if let Ok(msgs) = client.simple_query("SELECT * FROM demand").await {
        for msg in msgs {
            if let tokio_postgres::SimpleQueryMessage::Row(row) = msg {
                println!("\naggregate demand: {}", row.get(2).unwrap_or("?"));
            }
        }
    }

    println!("\n=== benchmark complete ===");
}
