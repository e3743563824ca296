//! Newline-delimited JSON over stdin/stdout.

use crate::server::authz::Credentials;
use crate::server::hardened::HardenedServer;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Reads one JSON frame per line from stdin, runs it through the hardened
/// pipeline, and writes the response (if any) followed by `\n` to stdout.
pub async fn run(server: Arc<HardenedServer>) -> crate::error::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let credentials = Credentials { token: None, client_id: None, timestamp: None, signature: None, body: None };
        if let Some(response) = server.handle_message(&line, "stdio-client", &credentials).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
