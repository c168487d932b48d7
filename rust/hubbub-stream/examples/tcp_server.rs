//! TCP hub server example.
//!
//! Registers one method of each shape (unary, server-streaming,
//! client-streaming) and serves them over TCP.
//!
//! Run with: `cargo run --example tcp_server -p hubbub-stream`
//!
//! Talk to it with anything that frames JSON with a 0x1E separator, e.g.:
//!
//! ```text
//! {"protocol": "json","version": 1}
//! {"type":1,"invocationId":"1","target":"add","arguments":[2,3]}
//! {"type":4,"invocationId":"2","target":"countdown","arguments":[5]}
//! ```

use std::time::Duration;

use hubbub_session::{Hub, StreamRx};
use hubbub_stream::Server;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    let mut hub = Hub::new();

    hub.unary("add", |(a, b): (i64, i64)| async move { Ok(a + b) });

    hub.server_streaming("countdown", |(from,): (u32,)| {
        futures::stream::unfold(from, |n| async move {
            if n == 0 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            Some((Ok(n), n - 1))
        })
    });

    hub.client_streaming("sum", |_: (), mut numbers: StreamRx<i64>| async move {
        let mut total = 0;
        while let Some(n) = numbers.recv().await.map_err(|e| e.to_string())? {
            total += n;
        }
        Ok(total)
    });

    let addr = "127.0.0.1:9000";
    let listener = TcpListener::bind(addr).await?;
    println!("hub server listening on {addr}");

    let server = Server::new(hub);
    server.listen(&listener).await?;
    Ok(())
}
