//! WebSocket transport: one bidirectional socket per connection carrying
//! JSON-RPC frames. Frames are handled sequentially per socket, preserving
//! request → response ordering; separate sockets are independent.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info};

use super::{McpHandler, McpSession};

pub async fn serve(handler: Arc<McpHandler>, listen: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(listen, "MCP server listening (ws)");
    serve_listener(handler, listener).await
}

pub async fn serve_listener(handler: Arc<McpHandler>, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            info!(%addr, "ws connection accepted");
            if let Err(e) = handle_socket(stream, handler).await {
                error!(%addr, error = %e, "ws connection error");
            }
        });
    }
}

async fn handle_socket(stream: TcpStream, handler: Arc<McpHandler>) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut frames) = ws.split();
    let session = McpSession::new(handler);

    while let Some(msg) = frames.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some(response) = session.handle_frame(text.as_str()).await {
                    sink.send(Message::Text(response.to_string().into())).await?;
                }
                if session.exit_requested() {
                    break;
                }
            }
            Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
