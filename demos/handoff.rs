//! Handoff demo - supervisor accepts, worker serves.
//!
//! This example demonstrates:
//! - Creating a pipe and spawning a worker on its downstream end
//! - Handing an accepted TCP connection to the worker
//! - The worker receiving the handle and serving the connection
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example handoff
//! ```

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use handoff_pipe::{HandleType, PipeTransport};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

/// Descriptor number the worker finds its channel on.
const CHANNEL_FD: i32 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if std::env::args().nth(1).as_deref() == Some("worker") {
        worker().await
    } else {
        supervisor().await
    }
}

async fn supervisor() -> Result<(), Box<dyn std::error::Error>> {
    let mut pipe = PipeTransport::builder().ipc(true).build();
    pipe.create(CHANNEL_FD)?;

    let mut command = tokio::process::Command::new(std::env::current_exe()?);
    command.arg("worker");
    pipe.attach_to_async(&mut command)?;
    let mut child = command.spawn()?;
    pipe.close_downstream();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let mut client = TcpStream::connect(listener.local_addr()?)?;
    let (accepted, peer) = listener.accept()?;
    tracing::info!("Accepted {}, handing off to worker", peer);

    pipe.send_handle(&accepted, HandleType::Socket).await?;
    drop(accepted);

    let mut greeting = String::new();
    client.read_to_string(&mut greeting)?;
    println!("client received: {}", greeting.trim_end());
    client.write_all(b"bye")?;

    pipe.close();
    child.wait().await?;
    Ok(())
}

async fn worker() -> Result<(), Box<dyn std::error::Error>> {
    let mut pipe = PipeTransport::builder().ipc(true).build();
    pipe.open_inherited()?;

    while let Some(event) = pipe.read().await? {
        let Some(handle) = event.handle else {
            tracing::info!("Worker got {} plain bytes", event.nread);
            continue;
        };
        tracing::info!("Worker got {:?} handle from {}", handle.kind(), handle.peer_addr()?);

        let mut stream = handle.into_tokio()?;
        stream
            .write_all(format!("hello from worker {}\n", std::process::id()).as_bytes())
            .await?;
        stream.shutdown().await?;
    }
    Ok(())
}
