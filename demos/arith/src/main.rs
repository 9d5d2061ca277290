//! Arithmetic service and client talking over a real TCP socket.
//!
//! Run with `cargo run -p arith-demo`. The process listens on a loopback
//! port, connects to itself, makes a few calls (including a canceled one)
//! and prints what came back.

use std::sync::Arc;
use std::time::Duration;

use palaver::{CancelToken, Client, MethodDef, Protocol, RpcError, Server, Transport};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

fn arith_protocol() -> Protocol {
    Protocol::new("demo.1.arith")
        .method(
            "add",
            MethodDef::call(|_ctx, args: AddArgs| async move { Ok(args.a + args.b) }),
        )
        .method(
            "slowAdd",
            MethodDef::call(|ctx: CancelToken, args: AddArgs| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(args.a + args.b),
                    _ = ctx.cancelled() => Err(RpcError::Remote("interrupted".to_string())),
                }
            }),
        )
}

async fn serve(listener: TcpListener) -> Result<(), RpcError> {
    loop {
        let (socket, addr) = listener
            .accept()
            .await
            .map_err(|e| RpcError::Io(e.to_string()))?;
        info!(%addr, "accepted connection");
        tokio::spawn(async move {
            let transport = Transport::new(socket, None, None);
            let server = Server::new(Arc::clone(&transport), None);
            server.register(arith_protocol())?;
            server.run().await
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve(listener));

    let socket = TcpStream::connect(addr).await?;
    let transport = Transport::new(socket, None, None);
    transport.run_async();
    let client = Client::new(transport);

    let sum: i64 = client.call("demo.1.arith.add", &AddArgs { a: 10, b: 34 }).await?;
    info!(sum, "add(10, 34)");

    // Cancel a slow call mid-flight; the server's handler sees the token
    // fire and gives up.
    let ctx = CancelToken::new();
    let slow = {
        let client = client.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            client
                .call_with_token::<_, i64>(ctx, "demo.1.arith.slowAdd", &AddArgs { a: 1, b: 2 })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();
    match slow.await? {
        Ok(n) => info!(n, "slowAdd finished (unexpected)"),
        Err(err) => info!(%err, "slowAdd canceled"),
    }

    Ok(())
}
