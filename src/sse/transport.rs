//! SSE push transport over `reqwest`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::RequestBuilder;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::channel::{ReadyState, Transport, TransportError, TransportHandle, TransportSink};
use crate::config::ApiConfig;
use crate::notification::UserId;

use super::decoder::SseDecoder;

/// Path of the per-user notification stream
pub const STREAM_PATH: &str = "/api/notifications/stream";

/// Opens `GET /api/notifications/stream?userId=..` and feeds frames to the sink.
///
/// The client must not carry a whole-request timeout, since the stream stays
/// open indefinitely. Share it with the API client so the session cookie is
/// sent on the stream request too.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    stream_url: String,
    runtime: Handle,
}

impl SseTransport {
    /// Panics when called outside a tokio runtime.
    pub fn new(client: reqwest::Client, api: &ApiConfig) -> Self {
        Self {
            client,
            stream_url: api.url(STREAM_PATH),
            runtime: Handle::current(),
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
}

impl Transport for SseTransport {
    fn open(&self, user_id: &UserId, sink: TransportSink) -> Box<dyn TransportHandle> {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

        let request = self
            .client
            .get(&self.stream_url)
            .query(&[("userId", user_id.as_str())])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let task = self.runtime.spawn(run_stream(request, sink, state.clone()));

        Box::new(SseHandle {
            state,
            task: task.abort_handle(),
        })
    }
}

async fn run_stream(request: RequestBuilder, sink: TransportSink, state: Arc<AtomicU8>) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            state.store(ReadyState::Closed as u8, Ordering::Release);
            sink.error(TransportError::Connect(e.to_string()));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        state.store(ReadyState::Closed as u8, Ordering::Release);
        sink.error(TransportError::Rejected(status.as_u16()));
        return;
    }

    state.store(ReadyState::Open as u8, Ordering::Release);
    sink.opened();

    let mut decoder = SseDecoder::new();
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        match chunk {
            Ok(bytes) => {
                for frame in decoder.push(&bytes) {
                    sink.message(&frame.event, &frame.data);
                }
            }
            Err(e) => {
                state.store(ReadyState::Closed as u8, Ordering::Release);
                sink.error(TransportError::Disconnected(e.to_string()));
                return;
            }
        }
    }

    state.store(ReadyState::Closed as u8, Ordering::Release);
    sink.error(TransportError::Disconnected("stream ended by server".to_string()));
}

struct SseHandle {
    state: Arc<AtomicU8>,
    task: AbortHandle,
}

impl TransportHandle for SseHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::Acquire))
    }

    fn close(&mut self) {
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
        self.task.abort();
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
