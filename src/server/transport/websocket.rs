//! Multi-peer WebSocket transport: each connection gets its own reader task;
//! outbound sends can target one peer or broadcast to all.

use crate::server::authz::Credentials;
use crate::server::hardened::HardenedServer;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

type PeerSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerSender>,
}

impl PeerRegistry {
    pub fn send_to(&self, peer_id: &str, message: String) -> bool {
        self.peers.get(peer_id).map(|p| p.send(message).is_ok()).unwrap_or(false)
    }

    pub fn broadcast(&self, message: &str) {
        for peer in self.peers.iter() {
            let _ = peer.send(message.to_string());
        }
    }
}

pub async fn run(server: Arc<HardenedServer>, addr: SocketAddr, peers: Arc<PeerRegistry>) -> crate::error::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(v) => v,
            Err(_) => continue,
        };
        let server = server.clone();
        let peers = peers.clone();
        tokio::spawn(async move {
            let _ = handle_connection(stream, remote, server, peers).await;
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    remote: SocketAddr,
    server: Arc<HardenedServer>,
    peers: Arc<PeerRegistry>,
) -> crate::error::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| crate::error::Error::Protocol(e.to_string()))?;
    let (mut write, mut read) = ws.split();
    let peer_id = remote.to_string();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    peers.peers.insert(peer_id.clone(), tx);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let credentials = Credentials { token: None, client_id: None, timestamp: None, signature: None, body: None };
    while let Some(Ok(msg)) = read.next().await {
        if let Message::Text(text) = msg {
            if let Some(response) = server.handle_message(&text, &peer_id, &credentials).await {
                peers.send_to(&peer_id, response);
            }
        }
    }

    peers.peers.remove(&peer_id);
    writer_task.abort();
    Ok(())
}
