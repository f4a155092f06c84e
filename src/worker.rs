//! Tokenizer worker: lexes lines on request over a pair of bounded channels

use crate::config::WorkerConfig;
use crate::syntax::{ContinuationState, Token, TokenKind, Tokenizer};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ask for one line to be lexed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LexRequest {
    pub line: usize,
    pub text: String,
    /// State at the start of the line
    pub state: ContinuationState,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LexResponse {
    pub line: usize,
    pub tokens: Vec<Token>,
    /// State at the end of the line
    pub state: ContinuationState,
    pub timestamp: u64,
}

/// Scheduler side of a worker connection
pub struct WorkerChannels {
    pub requests: mpsc::Sender<LexRequest>,
    pub responses: mpsc::Receiver<LexResponse>,
    /// State handed to the first line of a document
    pub initial_state: ContinuationState,
}

impl WorkerChannels {
    /// Channel pair with no worker attached; the returned ends act as the worker
    pub fn pair(
        capacity: usize,
        initial_state: ContinuationState,
    ) -> (Self, mpsc::Receiver<LexRequest>, mpsc::Sender<LexResponse>) {
        let (req_tx, req_rx) = mpsc::channel(capacity.max(1));
        let (resp_tx, resp_rx) = mpsc::channel(capacity.max(1));
        let channels = Self {
            requests: req_tx,
            responses: resp_rx,
            initial_state,
        };
        (channels, req_rx, resp_tx)
    }
}

/// Lex a request, degrading to a single unknown run if the tokenizer panics
pub fn lex(tokenizer: &dyn Tokenizer, request: LexRequest) -> LexResponse {
    let result = catch_unwind(AssertUnwindSafe(|| tokenizer.tokenize(&request.text, &request.state)));
    let (tokens, state) = match result {
        Ok(output) => output,
        Err(_) => {
            tracing::error!(
                mode = tokenizer.name(),
                line = request.line,
                "tokenizer panicked, line left unclassified"
            );
            let tokens = if request.text.is_empty() {
                Vec::new()
            } else {
                vec![Token::new(request.text.len(), TokenKind::Unknown)]
            };
            (tokens, request.state.clone())
        }
    };
    LexResponse {
        line: request.line,
        tokens,
        state,
        timestamp: request.timestamp,
    }
}

/// Spawn a worker task serving `tokenizer`; it stops when either channel closes
pub fn spawn_worker(tokenizer: Arc<dyn Tokenizer>, config: &WorkerConfig) -> (WorkerChannels, JoinHandle<()>) {
    let (channels, mut requests, responses) = WorkerChannels::pair(config.queue_capacity, tokenizer.initial_state());
    let handle = tokio::spawn(async move {
        tracing::debug!(mode = tokenizer.name(), "tokenizer worker started");
        while let Some(request) = requests.recv().await {
            let response = lex(tokenizer.as_ref(), request);
            if responses.send(response).await.is_err() {
                break;
            }
        }
        tracing::debug!(mode = tokenizer.name(), "tokenizer worker stopped");
    });
    (channels, handle)
}
