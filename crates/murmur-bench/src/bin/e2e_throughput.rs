//! End-to-end throughput benchmark for murmur.
//!
//! Clients are paired up; each one registers, logs in and then streams
//! direct messages to its partner over MessagePack frames. Only
//! `receive-message` events are counted.

use bytes::BytesMut;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use murmur_protocol::{codec, ClientEvent, ServerEvent, UserId, UserSummary};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Barrier};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// End-to-end direct message throughput against a running murmur server
#[derive(Parser, Debug)]
#[command(name = "e2e_throughput")]
struct Args {
    /// Number of client pairs
    #[arg(default_value_t = 8)]
    pairs: usize,

    /// Server address
    #[arg(long, default_value = "127.0.0.1:3001")]
    server: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("murmur end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release");
    println!();

    run_direct_message_benchmark(args.pairs, &args.server).await;
}

async fn run_direct_message_benchmark(pairs: usize, server: &str) {
    let http = reqwest::Client::new();
    let clients = pairs * 2;
    println!("Direct messages: {} pairs ({} clients)", pairs, clients);
    println!("Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(clients + 1));
    let mut handles = Vec::with_capacity(clients);

    for pair in 0..pairs {
        let left = match register(&http, server, &format!("bench{}a", pair)).await {
            Ok(user) => user,
            Err(e) => {
                eprintln!("Registration failed: {}", e);
                return;
            }
        };
        let right = match register(&http, server, &format!("bench{}b", pair)).await {
            Ok(user) => user,
            Err(e) => {
                eprintln!("Registration failed: {}", e);
                return;
            }
        };

        for (me, peer) in [(left.clone(), right.user_id.clone()), (right, left.user_id)] {
            let count = Arc::clone(&message_count);
            let barrier = Arc::clone(&barrier);
            let url = format!("ws://{}/ws", server);
            handles.push(tokio::spawn(async move {
                let name = me.username.clone();
                if let Err(e) = run_client(&url, me, peer, count, barrier).await {
                    eprintln!("Client {} error: {}", name, e);
                }
            }));
        }
    }

    barrier.wait().await;
    println!("All {} clients logged in", clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = message_count.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Clients:        {:>10}", clients);
    println!("Duration:       {:>10.2}s", elapsed.as_secs_f64());
    println!("Delivered:      {:>10}", total);
    println!("Throughput:     {:>10.0} msg/s", per_sec);
    println!("Per client:     {:>10.0} msg/s", per_sec / clients as f64);

    for handle in handles {
        handle.abort();
    }
}

/// Register a user through the HTTP endpoint.
async fn register(
    http: &reqwest::Client,
    server: &str,
    username: &str,
) -> Result<UserSummary, BoxError> {
    let resp = http
        .post(format!("http://{}/api/register", server))
        .json(&serde_json::json!({ "username": username }))
        .send()
        .await?;

    if resp.status() != reqwest::StatusCode::CREATED {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("Registration rejected ({}): {}", status, body).into());
    }
    Ok(resp.json().await?)
}

async fn run_client(
    url: &str,
    me: UserSummary,
    peer: UserId,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let login = codec::encode_binary(&ClientEvent::Login {
        user_id: me.user_id.clone(),
    })?;
    sender.send(Message::Binary(login.to_vec())).await?;

    let (ready_tx, ready_rx) = oneshot::channel();
    let recv_task = tokio::spawn(async move {
        let mut ready = Some(ready_tx);
        let mut recv_buf = BytesMut::with_capacity(65536);

        while let Some(result) = receiver.next().await {
            if let Ok(Message::Binary(data)) = result {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(event)) = codec::decode_binary_from::<ServerEvent>(&mut recv_buf) {
                    match event {
                        ServerEvent::LoginSuccess(_) => {
                            if let Some(tx) = ready.take() {
                                let _ = tx.send(());
                            }
                        }
                        ServerEvent::ReceiveMessage(_) => {
                            message_count.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    ready_rx.await?;
    barrier.wait().await;

    let frame = codec::encode_binary(&ClientEvent::SendMessage {
        recipient_id: peer,
        message: "x".repeat(64),
    })?;
    let message = Message::Binary(frame.to_vec());

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
