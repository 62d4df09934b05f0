//! The asynchronous boundary between the in-page agent and the background
//! service. The two sides share nothing but these messages.

use std::future::Future;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::models::Request;
use crate::api::response::Reply;
use crate::dispatch::Dispatcher;
use crate::error::{AppError, Result};
use crate::llm::SummaryProvider;

pub trait Transport {
    /// Sends one request and waits for its single reply.
    fn send(&self, request: Request) -> impl Future<Output = Result<Reply>>;
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Reply>,
}

/// In-process sender side of a spawned service.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Envelope>,
}

impl Transport for ServiceHandle {
    async fn send(&self, request: Request) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AppError::Transport("background service has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| AppError::Transport("background service dropped the request".to_string()))
    }
}

/// Runs `dispatcher` as a background service. Each request is handled on its
/// own task; a reply whose requester is gone is dropped, the work itself
/// still completes.
pub fn spawn_service<P: SummaryProvider>(dispatcher: Arc<Dispatcher<P>>) -> (ServiceHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(64);
    let task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let reply = dispatcher.handle(envelope.request).await;
                if envelope.reply.send(reply).is_err() {
                    debug!("requester went away, reply discarded");
                }
            });
        }
        debug!("service channel closed");
    });
    (ServiceHandle { tx }, task)
}

/// Talks to a `handoffd` daemon over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/api/message", base_url.trim_end_matches('/')),
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Reply> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;
        res.json::<Reply>()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))
    }
}
