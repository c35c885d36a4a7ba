use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::Dispatcher;
use crate::frame::Frame;

/// Handle given to the dispatcher: enqueues serialized request frames for
/// the worker. Never blocks and never fails the caller.
#[derive(Clone)]
pub struct AofWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Single consumer draining the queue to disk.
pub struct AofWorker {
    rx: mpsc::UnboundedReceiver<Bytes>,
    path: PathBuf,
}

/// Creates the writer handle and the worker for `path`.
pub fn new(path: impl Into<PathBuf>) -> (AofWriter, AofWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        AofWriter { tx },
        AofWorker {
            rx,
            path: path.into(),
        },
    )
}

impl AofWriter {
    /// Serializes `request` and queues it for appending.
    pub fn log(&self, request: &Frame) {
        if self.tx.send(request.to_bytes()).is_err() {
            warn!("aof worker is gone; dropping log entry");
        }
    }
}

impl AofWorker {
    /// Appends queued entries until cancelled, then drains whatever is still
    /// queued so already-acknowledged mutations reach disk.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(path = %self.path.display(), "aof worker: up");
        loop {
            let entry = tokio::select! {
                entry = self.rx.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };
            self.append(entry).await;
        }
        while let Ok(entry) = self.rx.try_recv() {
            self.append(entry).await;
        }
        debug!("aof worker: down");
    }

    /// One disk append, handed off the reactor thread. Failures are logged
    /// and the entry dropped; the worker keeps running.
    async fn append(&self, entry: Bytes) {
        let path = self.path.clone();
        match task::spawn_blocking(move || append_entry(&path, &entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => error!(%cause, "aof append failed; entry dropped"),
            Err(cause) => error!(%cause, "aof append task failed; entry dropped"),
        }
    }
}

/// Open-append-sync per entry, so a crash can only ever cut the final frame
/// short.
fn append_entry(path: &Path, entry: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(entry)?;
    file.sync_data()
}

/// Streams the log back through the regular command pipeline with AOF
/// logging disabled. A trailing frame cut short by a crash ends the replay
/// quietly; it never got acknowledged as durable.
pub async fn replay(path: &Path, dispatcher: &Dispatcher) -> std::io::Result<usize> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(cause) if cause.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no aof file to load");
            return Ok(0);
        }
        Err(cause) => return Err(cause),
    };

    let mut offset = 0;
    let mut replayed = 0;
    while offset < data.len() {
        match Frame::parse(&data[offset..]) {
            Ok(Some((request, consumed))) => {
                offset += consumed;
                replayed += 1;
                if let Frame::Error(message) = dispatcher.replay(request) {
                    warn!(
                        message = %String::from_utf8_lossy(&message),
                        "replayed command failed"
                    );
                }
            }
            Ok(None) => {
                warn!(
                    dropped = data.len() - offset,
                    "truncated frame at aof tail; ignoring"
                );
                break;
            }
            Err(cause) => {
                warn!(
                    %cause,
                    dropped = data.len() - offset,
                    "malformed aof tail; ignoring"
                );
                break;
            }
        }
    }
    info!(replayed, path = %path.display(), "aof replay complete");
    Ok(replayed)
}
