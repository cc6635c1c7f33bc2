//! Streaming operation coordinator.
//!
//! Long-running calls (build, push) run their work on a separate task that
//! writes progress text into an [`OperationOutput`] and publishes its result
//! through a one-shot completion slot. The handler drains the output while
//! racing the completion slot:
//!
//! ```text
//! Idle ──line──▶ Streaming ──line──▶ Streaming
//!   │                │
//!   └────────────────┴──completion / read fault──▶ Terminal
//! ```
//!
//! Streaming callers get every drained line as a partial reply and the
//! handler sleeps a fixed interval while nothing is buffered. Other callers
//! get everything in the single terminal reply. Either way there is exactly
//! one terminal outcome: the loop has a single exit into it.
//!
//! There is no cancellation. When the caller goes away the work still runs
//! to completion and its result is resolved without a recipient.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::Notify;
use wharf_core::error::{Result, WharfError};
use wharf_runtime::backend::ImageBackend;

use crate::protocol::{single_field, Reply};
use crate::types::MoreResponse;

/// Outcome of one attempt to read from an [`OperationOutput`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadLine {
    /// A complete line, trailing newline included
    Line(String),
    /// Nothing complete is buffered right now
    Empty,
}

#[derive(Default)]
struct Shared {
    buf: Mutex<Vec<u8>>,
    notify: Notify,
}

/// Append-only text buffer shared by a work task and its coordinator.
#[derive(Clone, Default)]
pub struct OperationOutput {
    shared: Arc<Shared>,
}

impl OperationOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer handle for the work task.
    pub fn writer(&self) -> OutputWriter {
        OutputWriter {
            shared: self.shared.clone(),
        }
    }

    /// Take the next complete line.
    ///
    /// Fails when the line is not valid UTF-8; the bytes are consumed.
    pub fn read_line(&self) -> Result<ReadLine> {
        let mut buf = self.shared.buf.lock();
        let Some(pos) = buf.iter().position(|b| *b == b'\n') else {
            return Ok(ReadLine::Empty);
        };
        let bytes: Vec<u8> = buf.drain(..=pos).collect();
        drop(buf);
        decode(bytes).map(ReadLine::Line)
    }

    /// Take whatever follows the last newline. Used once the work is done.
    pub fn take_rest(&self) -> Result<Option<String>> {
        let bytes = std::mem::take(&mut *self.shared.buf.lock());
        if bytes.is_empty() {
            return Ok(None);
        }
        decode(bytes).map(Some)
    }

    /// Wait until something is written or the work completes.
    async fn changed(&self) {
        self.shared.notify.notified().await;
    }

    fn wake(&self) {
        self.shared.notify.notify_one();
    }
}

fn decode(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        WharfError::Other(format!("operation output is not valid UTF-8: {}", e))
    })
}

/// `io::Write` end of an [`OperationOutput`].
#[derive(Clone)]
pub struct OutputWriter {
    shared: Arc<Shared>,
}

impl Write for OutputWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.shared.buf.lock().extend_from_slice(data);
        self.shared.notify.notify_one();
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Completion slot of one work task. Dropping it without a result (the work
/// panicked) closes the slot; either way the drain loop is woken afterwards.
struct Completion {
    tx: Option<oneshot::Sender<Result<String>>>,
    output: OperationOutput,
}

impl Completion {
    fn finish(mut self, result: Result<String>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(result).is_err() {
                tracing::debug!("Operation finished after its caller stopped draining");
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        drop(self.tx.take());
        self.output.wake();
    }
}

/// Partial-reply channel of one call.
pub struct ReplyStream {
    /// Reply parameter holding the [`MoreResponse`]
    field: &'static str,
    more: bool,
    sink: Option<UnboundedSender<Reply>>,
}

impl ReplyStream {
    pub fn new(field: &'static str, more: bool, sink: UnboundedSender<Reply>) -> Self {
        Self {
            field,
            more,
            sink: Some(sink),
        }
    }

    /// A stream whose caller wants nothing but the terminal reply.
    pub fn terminal_only(field: &'static str) -> Self {
        Self {
            field,
            more: false,
            sink: None,
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Whether the caller accepts partial replies.
    pub fn wants_more(&self) -> bool {
        self.more && self.sink.is_some()
    }

    /// Send one partial reply. A vanished caller is not an error.
    pub fn send_partial(&self, response: &MoreResponse) {
        let Some(sink) = &self.sink else {
            return;
        };
        let parameters = match single_field(self.field, response) {
            Ok(parameters) => parameters,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode partial reply");
                return;
            }
        };
        if sink.send(Reply::partial(parameters)).is_err() {
            tracing::debug!(field = self.field, "Caller gone, dropping partial reply");
        }
    }
}

/// Runs work in the background and turns its output into replies.
pub struct Coordinator {
    backend: Arc<dyn ImageBackend>,
    poll_interval: Duration,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn ImageBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run `work` on its own task and drain its output into `stream`.
    ///
    /// The work returns the name or id of the image it produced; on success
    /// that image is resolved through the store and its id lands in the
    /// terminal response together with any output not yet sent.
    pub async fn run<F, Fut>(&self, stream: &ReplyStream, work: F) -> Result<MoreResponse>
    where
        F: FnOnce(OutputWriter) -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let output = OperationOutput::new();
        let (tx, mut done) = oneshot::channel();
        let completion = Completion {
            tx: Some(tx),
            output: output.clone(),
        };
        let task = work(output.writer());
        tokio::spawn(async move {
            let result = task.await;
            completion.finish(result);
        });

        let streaming = stream.wants_more();
        let mut pending: Vec<String> = Vec::new();
        let outcome = loop {
            match output.read_line()? {
                ReadLine::Line(line) => {
                    pending.push(line);
                    if streaming {
                        stream.send_partial(&MoreResponse {
                            logs: std::mem::take(&mut pending),
                            id: String::new(),
                        });
                    }
                    continue;
                }
                ReadLine::Empty => {}
            }

            match done.try_recv() {
                Ok(result) => break result,
                Err(TryRecvError::Closed) => {
                    break Err(WharfError::Other(
                        "operation ended without reporting a result".to_string(),
                    ))
                }
                Err(TryRecvError::Empty) if streaming => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(TryRecvError::Empty) => output.changed().await,
            }
        };

        let reference = outcome?;

        // Output written between the last empty read and completion.
        while let ReadLine::Line(line) = output.read_line()? {
            pending.push(line);
        }
        if let Some(rest) = output.take_rest()? {
            pending.push(rest);
        }

        let image = self.backend.lookup(&reference).await?;
        tracing::debug!(image_id = %image.id, lines = pending.len(), "Operation complete");
        Ok(MoreResponse {
            logs: pending,
            id: image.id,
        })
    }
}
