//! Stdio transport: newline-delimited JSON-RPC, one object per line.
//! Stdout is reserved for responses; logging goes to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use super::{McpHandler, McpSession};

pub async fn run(handler: Arc<McpHandler>) -> anyhow::Result<()> {
    let session = McpSession::new(handler);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    // Frames are handled strictly in arrival order, so responses leave in
    // the order their requests were accepted.
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        debug!(frame = raw, "stdio frame");
        if let Some(response) = session.handle_frame(raw).await {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            stdout.write_all(&out).await?;
            stdout.flush().await?;
        }
        if session.exit_requested() {
            break;
        }
    }
    Ok(())
}
