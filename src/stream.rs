use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tracing::trace;

use crate::error::{CallContext, LLMError, ProviderError, ProviderErrorKind};
use crate::http::HttpBodyStream;

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes provider SSE feeds into [`StreamEvent`] values.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
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

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            ProviderError::new(
                self.provider,
                ProviderErrorKind::Decode,
                format!("invalid UTF-8 in stream chunk: {err}"),
            )
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }

        Ok(())
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

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

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
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
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

/// Boxed fallible text stream accepted by [`TextStream::from_stream`].
pub type BoxTextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Lazy sequence of text deltas returned by `stream`.
///
/// The vendor connection is owned by this value and released exactly once: when the
/// vendor signals completion, right after the first error is yielded, on [`close`],
/// or when the stream is dropped. Empty deltas are never yielded.
///
/// [`close`]: TextStream::close
///
/// # Examples
///
/// ```
/// use futures_util::{stream, StreamExt};
/// use llmify::stream::TextStream;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let deltas = stream::iter(vec![Ok("Hel".to_string()), Ok(String::new()), Ok("lo".to_string())]);
/// let mut text = TextStream::from_stream("demo", deltas);
/// assert_eq!(text.next().await.unwrap().unwrap(), "Hel");
/// assert_eq!(text.next().await.unwrap().unwrap(), "lo");
/// assert!(text.next().await.is_none());
/// assert!(text.is_released());
/// # });
/// ```
pub struct TextStream {
    inner: Option<BoxTextStream>,
    provider: &'static str,
}

impl TextStream {
    pub fn from_stream<S>(provider: &'static str, stream: S) -> Self
    where
        S: Stream<Item = Result<String, LLMError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
            provider,
        }
    }

    /// Name of the provider that produced the stream.
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Whether the underlying connection has already been released.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Stops consumption and releases the vendor connection immediately.
    pub fn close(mut self) {
        self.release();
    }

    /// Drains the remaining deltas into one string.
    ///
    /// # Errors
    ///
    /// Returns the first mid-stream error; text received before it is discarded.
    pub async fn collect_text(mut self) -> Result<String, LLMError> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    fn release(&mut self) {
        if self.inner.take().is_some() {
            trace!(provider = self.provider, "text stream released");
        }
    }
}

impl Stream for TextStream {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            let polled = inner.as_mut().poll_next(cx);
            match polled {
                Poll::Ready(Some(Ok(delta))) if delta.is_empty() => continue,
                Poll::Ready(Some(Ok(delta))) => return Poll::Ready(Some(Ok(delta))),
                Poll::Ready(Some(Err(err))) => {
                    this.release();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.release();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStream")
            .field("provider", &self.provider)
            .field("released", &self.is_released())
            .finish()
    }
}

/// What a vendor-specific parser made of one SSE `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delta {
    Text(String),
    /// Bookkeeping event with no text (pings, usage, block boundaries).
    Skip,
    /// The vendor signalled completion in-band.
    Done,
}

/// Vendor-specific parser turning one SSE payload into a [`Delta`].
pub(crate) type DeltaParser = fn(&str) -> Result<Delta, LLMError>;

/// Adapts an SSE body into a [`TextStream`] using a vendor-specific parser.
///
/// Errors are stamped with `context` before being yielded.
pub(crate) fn sse_text_stream(
    body: HttpBodyStream,
    context: CallContext,
    parse: DeltaParser,
) -> TextStream {
    let provider = context.provider;
    let stream = SseTextStream {
        decoder: StreamDecoder::new(body, provider),
        context,
        parse,
        finished: false,
    };
    TextStream::from_stream(provider, stream)
}

struct SseTextStream {
    decoder: StreamDecoder,
    context: CallContext,
    parse: DeltaParser,
    finished: bool,
}

impl Stream for SseTextStream {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        while !this.finished {
            let event = match this.decoder.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => event,
                Poll::Ready(None) => {
                    this.finished = true;
                    break;
                }
                Poll::Pending => return Poll::Pending,
            };
            let delta = match event {
                Ok(StreamEvent::Data(data)) => (this.parse)(&data),
                Ok(StreamEvent::Done) => Ok(Delta::Done),
                Err(err) => Err(err),
            };
            match delta {
                Ok(Delta::Text(text)) => return Poll::Ready(Some(Ok(text))),
                Ok(Delta::Skip) => {}
                Ok(Delta::Done) => this.finished = true,
                Err(err) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err.with_context(&this.context))));
                }
            }
        }
        Poll::Ready(None)
    }
}

/// Reads a whole body, used for error payloads on streaming endpoints.
pub(crate) async fn collect_body_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| {
        ProviderError::new(
            provider,
            ProviderErrorKind::Decode,
            format!("failed to decode stream error body: {err}"),
        )
        .into()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;

    use super::*;
    use crate::error::Operation;

    fn build_body(chunks: Vec<Result<Vec<u8>, LLMError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted_deltas(deltas: Vec<Result<String, LLMError>>, counter: Arc<AtomicUsize>) -> TextStream {
        let guard = DropCounter(counter);
        let stream = stream::iter(deltas).map(move |item| {
            let _keep = &guard;
            item
        });
        TextStream::from_stream("test_provider", stream)
    }

    fn parse_plain(data: &str) -> Result<Delta, LLMError> {
        match data {
            "skip" => Ok(Delta::Skip),
            "stop" => Ok(Delta::Done),
            "fail" => Err(LLMError::provider("test_provider", "vendor exploded")),
            text => Ok(Delta::Text(text.to_string())),
        }
    }

    #[tokio::test]
    async fn decoder_emits_data_and_done_events() {
        let chunks = vec![
            Ok(b"data: {\"text\":\"hi\"}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\n".to_vec()),
        ];
        let mut decoder = StreamDecoder::new(build_body(chunks), "test_provider");

        let first = decoder.next().await.expect("event").expect("ok");
        assert_eq!(first, StreamEvent::Data("{\"text\":\"hi\"}".to_string()));

        let second = decoder.next().await.expect("event").expect("ok");
        assert_eq!(second, StreamEvent::Done);

        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn decoder_combines_multiline_payloads_and_split_chunks() {
        let chunks = vec![
            Ok(b"event: message\r\ndata: line one\r\n".to_vec()),
            Ok(b"data: line ".to_vec()),
            Ok(b"two\r\n\r\n".to_vec()),
        ];
        let mut decoder = StreamDecoder::new(build_body(chunks), "test_provider");
        let event = decoder.next().await.expect("event").expect("ok");
        assert_eq!(event, StreamEvent::Data("line one\nline two".to_string()));
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn decoder_flushes_trailing_event_without_blank_line() {
        let chunks = vec![Ok(b"data: tail".to_vec())];
        let mut decoder = StreamDecoder::new(build_body(chunks), "test_provider");
        let event = decoder.next().await.expect("event").expect("ok");
        assert_eq!(event, StreamEvent::Data("tail".to_string()));
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn decoder_reports_utf8_errors() {
        let chunks = vec![Ok(b"data: \xff\n\n".to_vec())];
        let mut decoder = StreamDecoder::new(build_body(chunks), "test_provider");
        let err = decoder.next().await.expect("event").unwrap_err();
        match err {
            LLMError::Provider(error) => {
                assert_eq!(error.provider, "test_provider");
                assert_eq!(error.kind, ProviderErrorKind::Decode);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sse_text_stream_yields_text_in_order_and_stops_on_done() {
        let chunks = vec![
            Ok(b"data: Hel\n\ndata: skip\n\n".to_vec()),
            Ok(b"data: lo\n\ndata: stop\n\ndata: ignored\n\n".to_vec()),
        ];
        let context = CallContext::new("test_provider", "m", Operation::Stream);
        let text = sse_text_stream(build_body(chunks), context, parse_plain);
        assert_eq!(text.collect_text().await.expect("text"), "Hello");
    }

    #[tokio::test]
    async fn sse_text_stream_terminates_on_error_with_context() {
        let chunks = vec![Ok(b"data: partial\n\ndata: fail\n\ndata: after\n\n".to_vec())];
        let context = CallContext::new("test_provider", "model-x", Operation::Stream);
        let mut text = sse_text_stream(build_body(chunks), context, parse_plain);

        assert_eq!(text.next().await.expect("delta").expect("ok"), "partial");
        match text.next().await.expect("error item") {
            Err(LLMError::Provider(error)) => {
                assert_eq!(error.model.as_deref(), Some("model-x"));
                assert_eq!(error.operation, Some(Operation::Stream));
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(text.next().await.is_none());
        assert!(text.is_released());
    }

    #[tokio::test]
    async fn text_stream_releases_once_on_early_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut text = counted_deltas(
            vec![Ok("a".to_string()), Ok("b".to_string())],
            counter.clone(),
        );
        assert_eq!(text.next().await.expect("delta").expect("ok"), "a");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        drop(text);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn text_stream_releases_on_close_and_on_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let text = counted_deltas(vec![Ok("a".to_string())], counter.clone());
        text.close();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let counter = Arc::new(AtomicUsize::new(0));
        let mut text = counted_deltas(
            vec![
                Err(LLMError::provider("test_provider", "boom")),
                Ok("never".to_string()),
            ],
            counter.clone(),
        );
        assert!(text.next().await.expect("item").is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(text.next().await.is_none());
        drop(text);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
