#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;

use chatdelta::error::ClientError;
use chatdelta::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// 预设响应
pub enum Canned {
    Json(u16, String),
    Sse(u16, Vec<String>),
    Fail(ClientError),
}

/// 按顺序返回预设响应并记录请求的 Transport
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Canned>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn request_json(&self, index: usize) -> serde_json::Value {
        let request = &self.requests()[index];
        serde_json::from_slice(request.body.as_deref().expect("body")).expect("json body")
    }

    fn next(&self, request: HttpRequest) -> Canned {
        self.requests.lock().expect("lock").push(request);
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .expect("no canned reply left")
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        match self.next(request) {
            Canned::Json(status, body) => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: body.into_bytes(),
            }),
            Canned::Sse(..) => panic!("buffered request received a stream reply"),
            Canned::Fail(err) => Err(err),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ClientError> {
        match self.next(request) {
            Canned::Json(status, body) => Ok(HttpStreamResponse {
                status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(vec![Ok(body.into_bytes())])),
            }),
            Canned::Sse(status, frames) => {
                let chunks: Vec<Result<Vec<u8>, ClientError>> =
                    frames.into_iter().map(|frame| Ok(frame.into_bytes())).collect();
                Ok(HttpStreamResponse {
                    status,
                    headers: HashMap::new(),
                    body: Box::pin(stream::iter(chunks)),
                })
            }
            Canned::Fail(err) => Err(err),
        }
    }
}

/// 将 JSON 事件编码为 SSE 帧
pub fn sse(data: &str) -> String {
    format!("data: {data}\n\n")
}
