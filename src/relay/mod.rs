//! Output relay: forwards process output and terminal events to the UI side.

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    execution::{CompletionEvent, ErrorEvent, OutputEvent, OutputStream},
    process::RequestId,
};

const READ_CHUNK: usize = 8 * 1024;

/// Subscribable event channels. Anything else is rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventChannel {
    #[serde(rename = "execution-output", alias = "output")]
    ExecutionOutput,
    #[serde(rename = "execution-complete", alias = "complete")]
    ExecutionComplete,
    #[serde(rename = "execution-error", alias = "error")]
    ExecutionError,
    #[serde(rename = "install-output")]
    InstallOutput,
}

impl EventChannel {
    pub const ALL: [EventChannel; 4] = [
        Self::ExecutionOutput,
        Self::ExecutionComplete,
        Self::ExecutionError,
        Self::InstallOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ExecutionOutput => "execution-output",
            Self::ExecutionComplete => "execution-complete",
            Self::ExecutionError => "execution-error",
            Self::InstallOutput => "install-output",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ExecutionComplete | Self::ExecutionError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Output(OutputEvent),
    Complete(CompletionEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub channel: EventChannel,
    pub request_id: RequestId,
    pub payload: EventPayload,
}

/// Sending half of the event stream. Cheap to clone; one per spawned reader.
#[derive(Debug, Clone)]
pub struct OutputRelay {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl OutputRelay {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver closed; dropping event");
        }
    }

    pub fn output(&self, id: &RequestId, channel: EventChannel, stream: OutputStream, data: String) {
        self.send(BridgeEvent {
            channel,
            request_id: id.clone(),
            payload: EventPayload::Output(OutputEvent { stream, data }),
        });
    }

    pub fn complete(&self, id: &RequestId, completion: CompletionEvent) {
        self.send(BridgeEvent {
            channel: EventChannel::ExecutionComplete,
            request_id: id.clone(),
            payload: EventPayload::Complete(completion),
        });
    }

    pub fn error(&self, id: &RequestId, error: impl Into<String>) {
        self.send(BridgeEvent {
            channel: EventChannel::ExecutionError,
            request_id: id.clone(),
            payload: EventPayload::Error(ErrorEvent { error: error.into() }),
        });
    }
}

/// Incremental UTF-8 decoding that carries a split multi-byte sequence to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete tail: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Relay every chunk of `reader` as it arrives and return the full accumulated text.
pub async fn forward_stream<R>(
    mut reader: R,
    stream: OutputStream,
    channel: EventChannel,
    id: RequestId,
    relay: OutputRelay,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8ChunkDecoder::default();
    let mut full = String::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(request = %id, ?stream, error = %e, "stream read failed");
                break;
            }
        };
        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() {
            full.push_str(&text);
            relay.output(&id, channel, stream, text);
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        full.push_str(&rest);
        relay.output(&id, channel, stream, rest);
    }
    full
}
