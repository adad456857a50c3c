//! Newline-delimited JSON server over a reader/writer pair (stdin/stdout in the binary).

use std::{future::Future, sync::Arc};

use serde::Serialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use super::{parse_request, Bridge, Response};
use crate::relay::BridgeEvent;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outgoing<'a> {
    Response {
        id: Option<u64>,
        #[serde(flatten)]
        body: &'a Response,
    },
    Event(&'a BridgeEvent),
}

fn encode(msg: &Outgoing<'_>) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!(error = %e, "failed to encode outgoing message");
            None
        }
    }
}

/// Serve requests until `input` hits EOF or `shutdown` resolves, then kill every
/// running process, flush remaining events, and return.
pub async fn serve<R, W, S>(
    bridge: Arc<Bridge>,
    mut events: mpsc::UnboundedReceiver<BridgeEvent>,
    input: R,
    mut output: W,
    shutdown: S,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    // Single writer so lines from concurrent requests never interleave.
    let writer = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let forward_bridge = Arc::clone(&bridge);
    let event_tx = line_tx.clone();
    let forwarder = tokio::spawn(async move {
        let forward = |event: BridgeEvent| {
            if forward_bridge.is_subscribed(event.channel) {
                if let Some(line) = encode(&Outgoing::Event(&event)) {
                    let _ = event_tx.send(line);
                }
            }
        };
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => forward(event),
                    None => break,
                },
                _ = &mut stop_rx => {
                    while let Ok(event) = events.try_recv() {
                        forward(event);
                    }
                    break;
                }
            }
        }
    });

    let mut requests = JoinSet::new();
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        while requests.try_join_next().is_some() {}

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read request");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (id, parsed) = parse_request(&line);
        let bridge = Arc::clone(&bridge);
        let tx = line_tx.clone();
        requests.spawn(async move {
            let body = match parsed {
                Ok(request) => bridge.dispatch(request).await,
                Err(e) => {
                    warn!(?id, error = %e, "rejected request");
                    Response::failure(&e)
                }
            };
            if let Some(line) = encode(&Outgoing::Response { id, body: &body }) {
                let _ = tx.send(line);
            }
        });
    }

    // The sweep closes the registry: requests still resolving an interpreter are
    // refused when they try to start, so joining them cannot wait on a new child.
    let killed = bridge.runner().shutdown().await;
    while requests.join_next().await.is_some() {}
    if killed > 0 {
        info!(killed, "terminated running processes");
    }

    let _ = stop_tx.send(());
    let _ = forwarder.await;
    drop(line_tx);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}
