//! Echo server and client over TCP.
//!
//! The server gathers one login payload on `demo:echo`, the client answers
//! it, and once both sides are in play the client sends a few messages
//! that the server echoes back from its worker.
//!
//! ```text
//! RUST_LOG=sidenet=debug cargo run --example echo
//! SIDENET_LOG_FORMAT=json cargo run --example echo
//! ```

use std::time::Duration;

use bytes::Bytes;
use sidenet::observability::init_tracing;
use sidenet::{ChannelName, ChannelRegistry, Endpoint, LogicalSide, Phase, WorkQueue, WorkQueues};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut server_channels = ChannelRegistry::new();
    let echo = server_channels.register("demo:echo")?;
    let echo_name = echo.name().clone();
    echo.add_gather_listener(move |event| {
        event.add(Bytes::from_static(b"hello?"), echo_name.clone(), "greeting");
    });
    echo.add_listener(|event| {
        let Some(payload) = event.payload().cloned() else {
            return;
        };
        let ctx = event.context();
        if event.phase() == Some(Phase::Play) {
            let dispatcher = ctx.dispatcher().clone();
            ctx.enqueue_work(move || {
                if let Err(e) = dispatcher.send(payload) {
                    tracing::warn!("Echo failed: {}", e);
                }
            });
        } else {
            tracing::info!("Client greeted with {:?}", payload);
        }
        ctx.set_packet_handled(true);
    });

    let mut client_channels = ChannelRegistry::new();
    client_channels.register("demo:echo")?.add_listener(|event| {
        let Some(payload) = event.payload() else {
            return;
        };
        let ctx = event.context();
        match event.phase() {
            Some(Phase::Login) => {
                if let Err(e) = ctx.dispatcher().send(Bytes::from_static(b"hi")) {
                    tracing::warn!("Login reply failed: {}", e);
                }
            }
            _ => tracing::info!("Echoed: {}", String::from_utf8_lossy(payload)),
        }
        ctx.set_packet_handled(true);
    });

    let worker = WorkQueue::spawn("server-main")?;
    let server = Endpoint::builder(LogicalSide::Server)
        .registry(server_channels)
        .work_queues(WorkQueues::new().with_server(worker.clone()))
        .build();
    let client = Endpoint::builder(LogicalSide::Client).registry(client_channels).build();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    let (server_stream, _) = accepted?;

    let client_conn = client.open(connected?, false).await?;
    let server_conn = server.open(server_stream, false).await?;

    while client_conn.phase() != Phase::Play {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let channel: ChannelName = "demo:echo".parse()?;
    for text in ["one", "two", "three"] {
        client_conn.send_async(&channel, Bytes::from(text)).await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    client_conn.disconnect();
    server_conn.closed().await;
    worker.shutdown();
    Ok(())
}
