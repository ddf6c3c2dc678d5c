//! Streaming normalization.
//!
//! Vendor SSE bodies are decoded into frames by [`SseDecoder`], turned into content by a
//! vendor [`FrameParser`], and delivered to the caller as a [`ChunkStream`]: a bounded,
//! ordered channel of [`StreamChunk`]s that always ends with exactly one terminal chunk.
//! Structured failures travel on a side channel and are exposed through
//! [`ChunkStream::error`] once the terminal chunk has been observed.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, ErrorKind};
use crate::http::HttpBodyStream;
use crate::types::{ChunkMetadata, StreamChunk, TokenUsage};

/// Capacity of the chunk channel between a stream producer and its consumer.
pub const CHUNK_BUFFER: usize = 16;

/// Standardized SSE event yielded by [`SseDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Splits a raw HTTP body into SSE [`SseEvent`]s.
///
/// Frames are separated by blank lines; multiple `data:` lines inside one frame are
/// joined with `\n`, other fields (`event:`, `id:`, `retry:`) are ignored.
///
/// Bad frames do not end decoding: a frame that is not valid UTF-8 yields a `parse` kind
/// error for that frame only and the next frame is decoded normally, so the pump can skip
/// it. Body failures are passed through unchanged. Decoding stops at the first `[DONE]`;
/// frames after it are dropped.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<SseEvent, ClientError>>,
    stream_closed: bool,
    done_received: bool,
}

impl SseDecoder {
    pub fn new(body: HttpBodyStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) {
        if self.done_received {
            self.data_lines.clear();
            return;
        }
        if self.data_lines.is_empty() {
            return;
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return;
        }

        match String::from_utf8(joined) {
            Ok(data) if data.trim() == "[DONE]" => {
                self.done_received = true;
                self.pending.push_back(Ok(SseEvent::Done));
            }
            Ok(data) => self.pending.push_back(Ok(SseEvent::Data(data))),
            Err(err) => self.pending.push_back(Err(ClientError::json_parse(err))),
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for SseDecoder {
    type Item = Result<SseEvent, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }
        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = this.buffer.drain(..).collect::<Vec<u8>>();
                    this.handle_line(line);
                }
                this.flush_event();
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            this.flush_event();
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// What a vendor frame means for the normalized stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// Content fragment; the stream continues.
    Delta(String),
    /// Last fragment, carrying the vendor finish reason.
    Finished {
        content: String,
        reason: String,
        usage: Option<TokenUsage>,
    },
    /// Explicit vendor completion sentinel.
    Done,
    /// Error event reported in-band by the vendor; ends the stream with this error.
    Failed(ClientError),
    /// Well-formed frame without content (pings, role announcements, block starts).
    Ignore,
}

/// Vendor-specific interpretation of one SSE `data:` payload.
pub trait FrameParser: Send + 'static {
    /// Parses a payload. An `Err` marks the frame as malformed; it is skipped.
    fn parse(&mut self, data: &str) -> Result<Frame, ClientError>;
}

/// Producer half of a [`ChunkStream`].
pub struct ChunkSender {
    tx: mpsc::Sender<StreamChunk>,
    failure: Option<oneshot::Sender<ClientError>>,
}

impl ChunkSender {
    /// Sends a non-terminal chunk, waiting while the channel is full.
    ///
    /// Returns `false` once the consumer has gone away.
    pub async fn send(&self, chunk: StreamChunk) -> bool {
        self.tx.send(chunk).await.is_ok()
    }

    /// Resolves once the consumer has dropped its [`ChunkStream`].
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Records `err` on the side channel, then terminates with an empty chunk.
    pub async fn fail(mut self, err: ClientError) {
        self.record(err);
        let _ = self.tx.send(StreamChunk::terminal("")).await;
    }

    /// Records `err` and closes the channel without waiting for capacity.
    ///
    /// The consumer still receives the chunks already queued, followed by a synthesized
    /// terminal chunk.
    pub fn abort(mut self, err: ClientError) {
        self.record(err);
    }

    /// Only the first recorded error is kept.
    fn record(&mut self, err: ClientError) {
        if let Some(failure) = self.failure.take() {
            let _ = failure.send(err);
        }
    }
}

/// Consumer half of a normalized stream.
///
/// Yields chunks in order and guarantees a terminal chunk: if the producer disappears
/// without sending one, a terminal empty chunk is synthesized and a `stream_closed`
/// error is recorded. After the terminal chunk the stream yields nothing.
///
/// # Examples
///
/// ```
/// use chatdelta::stream::{ChunkStream, merge_stream_chunks};
/// use chatdelta::types::StreamChunk;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let chunks = ChunkStream::from_chunks(vec![
///     StreamChunk::delta("Hello "),
///     StreamChunk::delta("World!"),
///     StreamChunk::terminal(""),
/// ]);
/// assert_eq!(merge_stream_chunks(chunks).await.unwrap(), "Hello World!");
/// # });
/// ```
pub struct ChunkStream {
    rx: mpsc::Receiver<StreamChunk>,
    failure: oneshot::Receiver<ClientError>,
    error: Option<ClientError>,
    terminated: bool,
}

impl ChunkStream {
    /// Creates a bounded producer/consumer pair.
    pub fn channel(capacity: usize) -> (ChunkSender, ChunkStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (failure_tx, failure_rx) = oneshot::channel();
        (
            ChunkSender {
                tx,
                failure: Some(failure_tx),
            },
            ChunkStream {
                rx,
                failure: failure_rx,
                error: None,
                terminated: false,
            },
        )
    }

    /// Builds a stream that replays `chunks` without a background producer.
    pub fn from_chunks(chunks: Vec<StreamChunk>) -> Self {
        let (sender, stream) = Self::channel(chunks.len());
        for chunk in chunks {
            if sender.tx.try_send(chunk).is_err() {
                break;
            }
        }
        stream
    }

    /// A complete response delivered as one terminal chunk.
    pub fn single(content: impl Into<String>) -> Self {
        Self::from_chunks(vec![StreamChunk::terminal(content)])
    }

    /// Receives the next chunk, or `None` after the terminal chunk.
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Error delivered by the producer, available once the terminal chunk was received.
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ClientError> {
        self.error.take()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamChunk>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.finished {
                    self.terminate();
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                self.terminate();
                if self.error.is_none() {
                    self.error = Some(ClientError::stream_closed());
                }
                Poll::Ready(Some(StreamChunk::terminal("")))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.rx.close();
        if self.error.is_none() {
            if let Ok(err) = self.failure.try_recv() {
                self.error = Some(err);
            }
        }
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx)
    }
}

/// Spawns the background task that turns an SSE body into a [`ChunkStream`].
///
/// Malformed frames are skipped. The stream ends at the vendor completion sentinel, at the
/// first frame carrying a finish reason, or on body failure (reported as a `stream` error).
/// A body that ends without either terminal signal is reported as `stream_closed`. Firing
/// `cancel` ends the stream with a `cancelled` error; dropping the [`ChunkStream`] stops
/// the task.
pub fn normalize<P: FrameParser>(
    body: HttpBodyStream,
    parser: P,
    provider: &'static str,
    cancel: CancellationToken,
) -> ChunkStream {
    let (sender, stream) = ChunkStream::channel(CHUNK_BUFFER);
    tokio::spawn(pump(SseDecoder::new(body), parser, provider, sender, cancel));
    stream
}

enum Next {
    Cancelled,
    Abandoned,
    Event(Option<Result<SseEvent, ClientError>>),
}

enum Delivery {
    Sent,
    Abandoned,
    Cancelled,
}

/// Queues `chunk`, giving up when `cancel` fires while the channel is full.
async fn deliver(sender: &ChunkSender, cancel: &CancellationToken, chunk: StreamChunk) -> Delivery {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Cancelled,
        sent = sender.send(chunk) => if sent { Delivery::Sent } else { Delivery::Abandoned },
    }
}

async fn pump<P: FrameParser>(
    mut decoder: SseDecoder,
    mut parser: P,
    provider: &'static str,
    mut sender: ChunkSender,
    cancel: CancellationToken,
) {
    let terminal = |content: String, reason: Option<String>, usage: Option<TokenUsage>| {
        StreamChunk::terminal(content).with_metadata(ChunkMetadata {
            provider: Some(provider.to_string()),
            finish_reason: reason,
            usage,
        })
    };

    // Some(chunk) is the last chunk to deliver before the task ends.
    let last = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Cancelled,
            _ = sender.closed() => Next::Abandoned,
            event = decoder.next() => Next::Event(event),
        };
        let event = match next {
            Next::Cancelled => {
                debug!(provider, "stream cancelled");
                sender.abort(ClientError::cancelled());
                return;
            }
            Next::Abandoned => {
                debug!(provider, "stream consumer dropped");
                return;
            }
            Next::Event(Some(event)) => event,
            Next::Event(None) => {
                sender.record(ClientError::stream_closed());
                break StreamChunk::terminal("");
            }
        };

        let data = match event {
            Ok(SseEvent::Data(data)) => data,
            Ok(SseEvent::Done) => break terminal(String::new(), None, None),
            Err(err) if err.kind == ErrorKind::Parse => {
                debug!(provider, error = %err, "skipping undecodable stream frame");
                continue;
            }
            Err(err) => {
                debug!(provider, error = %err, "stream transport failed");
                sender.record(into_stream_error(err));
                break StreamChunk::terminal("");
            }
        };

        match parser.parse(&data) {
            Ok(Frame::Delta(text)) => match deliver(&sender, &cancel, StreamChunk::delta(text)).await {
                Delivery::Sent => {}
                Delivery::Abandoned => {
                    debug!(provider, "stream consumer dropped");
                    return;
                }
                Delivery::Cancelled => {
                    debug!(provider, "stream cancelled while the consumer lagged");
                    sender.abort(ClientError::cancelled());
                    return;
                }
            },
            Ok(Frame::Finished {
                content,
                reason,
                usage,
            }) => break terminal(content, Some(reason), usage),
            Ok(Frame::Done) => break terminal(String::new(), None, None),
            Ok(Frame::Failed(err)) => {
                debug!(provider, error = %err, "vendor reported stream error");
                sender.record(err);
                break StreamChunk::terminal("");
            }
            Ok(Frame::Ignore) => {}
            Err(err) => debug!(provider, error = %err, "skipping malformed stream frame"),
        }
    };

    if let Delivery::Cancelled = deliver(&sender, &cancel, last).await {
        debug!(provider, "stream cancelled before the terminal chunk was queued");
        sender.abort(ClientError::cancelled());
    }
}

fn into_stream_error(err: ClientError) -> ClientError {
    if err.kind == ErrorKind::Stream {
        err
    } else {
        ClientError::stream_read(err)
    }
}

/// Concatenates chunk contents up to and including the terminal chunk.
///
/// # Errors
///
/// Returns the error delivered on the stream's side channel, if any.
pub async fn merge_stream_chunks(mut chunks: ChunkStream) -> Result<String, ClientError> {
    let mut merged = String::new();
    while let Some(chunk) = chunks.recv().await {
        merged.push_str(&chunk.content);
        if chunk.finished {
            break;
        }
    }
    match chunks.take_error() {
        Some(err) => Err(err),
        None => Ok(merged),
    }
}

/// Reads a whole body into a string, used for error payloads of streaming requests.
pub(crate) async fn collect_body_text(mut body: HttpBodyStream) -> Result<String, ClientError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(ClientError::json_parse)
}
