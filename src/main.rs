//! Demo binary streaming large generated messages between two endpoints.
//!
//! `bulkframe serve` accepts connections, receives every message in
//! streaming mode and answers with the message length and digest.
//! `bulkframe send` streams a seeded pattern of any size and checks the
//! reply. Neither side buffers the message.

mod bulk;
mod cli;

use std::{error::Error, net::SocketAddr};

use bulkframe::{
    CloseCode,
    Connection,
    Delivery,
    DeliveryMode,
    ExtensionNegotiator,
    MessageSource,
    Role,
    SendOptions,
    TransportConfig,
    TransportError,
    handshake::{client_handshake, server_handshake},
};
use clap::Parser;
use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    signal,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    bulk::{Digest, PatternSource},
    cli::{Cli, Command},
};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }
    let negotiator = ExtensionNegotiator::new(cli.policy());
    match cli.command {
        Command::Serve { listen } => {
            let config = cli.transport(Role::Server, DeliveryMode::Streaming);
            serve(listen, config, negotiator).await
        }
        Command::Send {
            connect,
            size,
            seed,
        } => {
            let config = cli.transport(Role::Client, DeliveryMode::default());
            send(connect, config, negotiator, size, seed).await
        }
    }
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: SocketAddr) -> Result<(), BoxError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("serving metrics on {addr}");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: SocketAddr) -> Result<(), BoxError> {
    warn!("built without the metrics feature; ignoring --metrics-addr {addr}");
    Ok(())
}

async fn serve(
    listen: SocketAddr,
    config: TransportConfig,
    negotiator: ExtensionNegotiator,
) -> Result<(), BoxError> {
    let listener = TcpListener::bind(listen).await?;
    info!("listening on {}", listener.local_addr()?);
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    loop {
        select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let token = shutdown.clone();
                tracker.spawn(async move {
                    if let Err(err) = handle_peer(stream, config, negotiator, token).await {
                        warn!("connection from {peer} failed: {err}");
                    }
                });
            }
            _ = signal::ctrl_c() => break,
        }
    }
    shutdown.cancel();
    tracker.close();
    tracker.wait().await;
    Ok(())
}

async fn handle_peer(
    mut stream: TcpStream,
    config: TransportConfig,
    negotiator: ExtensionNegotiator,
    shutdown: CancellationToken,
) -> bulkframe::Result<()> {
    let params = server_handshake(&mut stream, &negotiator).await?;
    let mut connection = Connection::new(stream, &config, params);
    let mut digest = Digest::default();
    loop {
        let delivery = select! {
            delivery = connection.recv() => delivery?,
            () = shutdown.cancelled() => {
                return connection.close(CloseCode::GOING_AWAY, "server shutting down").await;
            }
        };
        match delivery {
            Some(Delivery::Chunk(chunk)) => digest.update(chunk.data()),
            Some(Delivery::End(end)) => {
                info!("received {} bytes", end.total_len());
                let reply = std::mem::take(&mut digest).render();
                connection.send(reply, SendOptions::text()).await?;
            }
            Some(Delivery::Message(message)) => {
                digest.update(message.payload());
                let reply = std::mem::take(&mut digest).render();
                connection.send(reply, SendOptions::text()).await?;
            }
            None => return Ok(()),
        }
    }
}

async fn send(
    connect: SocketAddr,
    config: TransportConfig,
    negotiator: ExtensionNegotiator,
    size: u64,
    seed: u64,
) -> Result<(), BoxError> {
    let mut stream = TcpStream::connect(connect).await?;
    let params = client_handshake(&mut stream, &negotiator).await?;
    info!("connected to {connect}, compression={}", params.enabled);
    let mut connection = Connection::new(stream, &config, params);
    connection.begin_send(
        MessageSource::producer(PatternSource::new(seed, size)),
        SendOptions::binary(),
    )?;
    let reply = loop {
        match connection.recv().await? {
            Some(Delivery::Message(message)) => break message,
            Some(other) => warn!("ignoring unexpected delivery {other:?}"),
            None => return Err(TransportError::PrematureClose.into()),
        }
    };
    let expected = Digest::of_pattern(seed, size).render();
    let received = String::from_utf8_lossy(reply.payload());
    connection.close(CloseCode::NORMAL, "done").await?;
    if received != expected {
        return Err(format!("digest mismatch: sent {expected}, server saw {received}").into());
    }
    info!("server confirmed {size} bytes ({expected})");
    Ok(())
}
