//! 离线测试用的脚本化 Transport
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use llmify::error::LLMError;
use llmify::http::{HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use serde_json::Value;

/// One canned vendor reply.
pub enum Reply {
    Json {
        status: u16,
        headers: HashMap<String, String>,
        body: Value,
    },
    /// SSE payloads, each sent as its own `data:` event and body chunk.
    Sse(Vec<String>),
    /// SSE payloads followed by a body chunk that fails, like a reset connection.
    SseThenFail(Vec<String>, String),
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn status(status: u16, body: Value) -> Self {
        Reply::Json {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Reply::Json { headers, .. } = &mut self {
            headers.insert(name.to_string(), value.to_string());
        }
        self
    }

    pub fn sse<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Sse(events.into_iter().map(Into::into).collect())
    }

    pub fn sse_then_fail<I, S>(events: I, error: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::SseThenFail(events.into_iter().map(Into::into).collect(), error.to_string())
    }
}

fn sse_chunk(event: String) -> Result<Vec<u8>, LLMError> {
    Ok(format!("data: {event}\n\n").into_bytes())
}

fn sse_headers() -> HashMap<String, String> {
    HashMap::from([("content-type".to_string(), "text/event-stream".to_string())])
}

/// Serves scripted replies in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }

    /// JSON body of the `index`-th request.
    pub fn body(&self, index: usize) -> Value {
        let requests = self.requests.lock().expect("lock");
        let body = requests[index].body.as_deref().expect("request body");
        serde_json::from_slice(body).expect("json body")
    }

    /// How many streaming bodies have been dropped so far.
    pub fn closed_bodies(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: HttpRequest) -> Reply {
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .expect("no scripted reply left")
    }

    fn counted(&self, chunks: Vec<Result<Vec<u8>, LLMError>>) -> HttpBodyStream {
        Box::pin(CountedBody {
            chunks: stream::iter(chunks),
            closed: self.closed.clone(),
        })
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        match self.next_reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => Ok(HttpResponse {
                status,
                headers,
                body: serde_json::to_vec(&body).expect("json"),
            }),
            Reply::Sse(_) | Reply::SseThenFail(..) => {
                panic!("streaming reply scripted for a non-streaming call")
            }
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        match self.next_reply(request) {
            Reply::Json {
                status,
                headers,
                body,
            } => Ok(HttpStreamResponse {
                status,
                headers,
                body: self.counted(vec![Ok(serde_json::to_vec(&body).expect("json"))]),
            }),
            Reply::Sse(events) => Ok(HttpStreamResponse {
                status: 200,
                headers: sse_headers(),
                body: self.counted(events.into_iter().map(sse_chunk).collect()),
            }),
            Reply::SseThenFail(events, error) => {
                let mut chunks: Vec<_> = events.into_iter().map(sse_chunk).collect();
                chunks.push(Err(LLMError::transport(error)));
                Ok(HttpStreamResponse {
                    status: 200,
                    headers: sse_headers(),
                    body: self.counted(chunks),
                })
            }
        }
    }
}

type ChunkStream = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, LLMError>>>;

/// Body stream that counts how often it was released.
struct CountedBody {
    chunks: ChunkStream,
    closed: Arc<AtomicUsize>,
}

impl Stream for CountedBody {
    type Item = Result<Vec<u8>, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

impl Drop for CountedBody {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
