//! # Realm Session Simulator
//!
//! Opens a batch of stream sessions against a running realm server through the
//! client-side `TcpConnection::connect` path, sends random-size payloads, and
//! counts what comes back. With `--udp` it also exercises the datagram echo.
//!
//! ```bash
//! simulate --addr 127.0.0.1:7000 --clients 5 --messages 10 --udp 127.0.0.1:7001
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use realm_core::connection::event_channel;
use realm_core::{CloseReason, ConnectionEvent, TcpConnection, UdpConnection, UdpOptions};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "simulate")]
#[command(about = "Realm session simulator - stream and datagram echo load")]
struct Args {
    /// Server stream address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    addr: SocketAddr,

    /// Number of simultaneous stream sessions
    #[arg(short, long, default_value = "5")]
    clients: u32,

    /// Payloads sent by every session
    #[arg(short, long, default_value = "10")]
    messages: u32,

    /// Largest payload size in bytes
    #[arg(long, default_value = "512")]
    max_payload: usize,

    /// Server datagram address; skipped when absent
    #[arg(short, long)]
    udp: Option<SocketAddr>,

    /// Seconds each session may take before it is abandoned
    #[arg(short, long, default_value = "10")]
    timeout: u64,
}

/// How a simulated session ended.
#[derive(Debug)]
enum Outcome {
    /// Every byte sent came back
    Echoed { bytes: usize, elapsed: Duration },
    /// The server closed the session before the echo finished
    Rejected { echoed: usize, reason: CloseReason },
    /// Connecting failed or the session timed out
    Failed(String),
}

/// Runs one stream session to completion.
async fn simulate_session(index: u32, args: Args) -> Outcome {
    let (events, mut rx) = event_channel();
    let connection = TcpConnection::new(events, 4096);

    if let Err(e) = connection.connect(args.addr) {
        return Outcome::Failed(e.to_string());
    }
    if let Err(e) = connection.queue_receive() {
        return Outcome::Failed(e.to_string());
    }

    let mut expected = 0usize;
    {
        let mut rng = rand::thread_rng();
        for _ in 0..args.messages {
            let size = rng.gen_range(1..=args.max_payload.max(1));
            let payload: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
            expected += payload.len();
            if let Err(e) = connection.send(payload) {
                return Outcome::Failed(e.to_string());
            }
        }
    }

    let started = Instant::now();
    let mut echoed = 0usize;
    let result = timeout(Duration::from_secs(args.timeout), async {
        while let Some(event) = rx.recv().await {
            match event {
                ConnectionEvent::Connected(conn) => {
                    debug!("🔗 Session #{} connected to {:?}", index, conn.address());
                }
                ConnectionEvent::Received(_, payload) => {
                    echoed += payload.len();
                    if echoed >= expected {
                        connection.disconnect();
                        return Outcome::Echoed {
                            bytes: echoed,
                            elapsed: started.elapsed(),
                        };
                    }
                    if let Err(e) = connection.queue_receive() {
                        debug!("Session #{} stopped receiving: {}", index, e);
                    }
                }
                ConnectionEvent::Closed(_, CloseReason::ConnectFailed(e)) => {
                    return Outcome::Failed(format!("connect failed: {e}"));
                }
                ConnectionEvent::Closed(_, reason) => {
                    return Outcome::Rejected { echoed, reason };
                }
            }
        }
        Outcome::Failed("event channel closed".to_string())
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            connection.disconnect();
            Outcome::Failed(format!("timed out after {}s", args.timeout))
        }
    }
}

/// Sends `count` datagrams and counts the echoes.
async fn simulate_datagrams(target: SocketAddr, count: u32, wait: Duration) -> Result<u32> {
    let local: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let (socket, mut inbox) = UdpConnection::bind(local, UdpOptions::default())
        .await
        .context("binding datagram socket")?;
    socket.queue_receive_from();

    {
        let mut rng = rand::thread_rng();
        for seq in 0..count {
            let mut payload = seq.to_be_bytes().to_vec();
            let padding = rng.gen_range(0..64);
            payload.extend((0..padding).map(|_| rng.gen::<u8>()));
            socket.send_to(target, &payload)?;
        }
    }

    let mut received = 0u32;
    while received < count {
        match timeout(wait, inbox.recv()).await {
            Ok(Some(datagram)) if datagram.from == target => received += 1,
            Ok(Some(datagram)) => warn!("⚠️ Ignoring datagram from {}", datagram.from),
            Ok(None) => break,
            Err(_) => break,
        }
    }

    socket.unregister();
    Ok(received)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    if args.clients == 0 && args.udp.is_none() {
        bail!("nothing to do: --clients is 0 and --udp is not set");
    }

    info!("🚀 Starting Realm session simulation");
    info!("   • Server: {}", args.addr);
    info!("   • Sessions: {}", args.clients);
    info!("   • Messages per session: {}", args.messages);
    if let Some(udp) = args.udp {
        info!("   • Datagram target: {}", udp);
    }

    let mut handles = Vec::new();
    for index in 0..args.clients {
        let args = args.clone();
        handles.push(tokio::spawn(simulate_session(index, args)));

        // Stagger connections
        sleep(Duration::from_millis(10)).await;
    }

    let (mut echoed, mut rejected, mut failed, mut bytes) = (0u32, 0u32, 0u32, 0usize);
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await.context("session task panicked")? {
            Outcome::Echoed { bytes: n, elapsed } => {
                echoed += 1;
                bytes += n;
                info!("✅ Session #{} echoed {} bytes in {:?}", index, n, elapsed);
            }
            Outcome::Rejected { echoed: n, reason } => {
                rejected += 1;
                warn!("🛑 Session #{} closed after {} bytes: {}", index, n, reason);
            }
            Outcome::Failed(reason) => {
                failed += 1;
                error!("❌ Session #{} failed: {}", index, reason);
            }
        }
    }

    info!("📊 Stream results:");
    info!("   • Completed: {}", echoed);
    info!("   • Rejected: {}", rejected);
    info!("   • Failed: {}", failed);
    info!("   • Bytes echoed: {}", bytes);

    if let Some(udp) = args.udp {
        let received =
            simulate_datagrams(udp, args.messages, Duration::from_secs(args.timeout)).await?;
        info!("📡 Datagram results: {}/{} echoed", received, args.messages);
    }

    if failed > 0 {
        bail!("{failed} session(s) failed");
    }
    Ok(())
}
