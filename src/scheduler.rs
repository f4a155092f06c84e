//! Background tokenization scheduler
//!
//! One task per document keeps line tokens in step with the text. It waits on
//! four sources in strict order: cancellation, a new text version, a lexing
//! result, and room to submit the next request. A new text version is always
//! noticed before more results are absorbed or more work is queued.
//!
//! Requests are issued one line at a time, from `first_invalid` downwards,
//! because each line needs the continuation state of the line before it.
//! Results are applied with a compare-and-swap against the current snapshot
//! and dropped when its timestamp or `first_invalid` no longer matches.
//!
//! Once a full slice of wall-clock time has passed since the task last yielded,
//! it pauses (or yields when the pause is zero) before going on.

use crate::config::SchedulerConfig;
use crate::document::{publish_with, Snapshot};
use crate::syntax::ContinuationState;
use crate::worker::{LexResponse, WorkerChannels};
use arc_swap::ArcSwap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Owner of a running scheduler; dropping it stops the task
pub struct TokenizerHandle {
    task: JoinHandle<()>,
    cancel: DropGuard,
}

impl TokenizerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the scheduler and wait for it to exit
    pub async fn shutdown(self) {
        let Self { task, cancel } = self;
        drop(cancel);
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "tokenizer scheduler ended abnormally");
        }
    }

    /// Wait for the scheduler to exit on its own
    pub async fn join(self) {
        let Self { task, cancel } = self;
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "tokenizer scheduler ended abnormally");
        }
        drop(cancel);
    }
}

pub(crate) fn spawn(
    state: Arc<ArcSwap<Snapshot>>,
    updates: watch::Receiver<u64>,
    worker: WorkerChannels,
    config: SchedulerConfig,
) -> TokenizerHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(state, updates, worker, config, cancel.clone()));
    TokenizerHandle {
        task,
        cancel: cancel.drop_guard(),
    }
}

async fn run(
    state: Arc<ArcSwap<Snapshot>>,
    mut updates: watch::Receiver<u64>,
    worker: WorkerChannels,
    config: SchedulerConfig,
    cancel: CancellationToken,
) {
    let WorkerChannels {
        requests,
        mut responses,
        initial_state,
    } = worker;

    let mut working = state.load_full();
    let mut cursor = working.first_invalid();
    let mut in_flight: Option<(u64, usize)> = None;
    let mut last_yield = Instant::now();

    tracing::debug!(
        timestamp = working.timestamp(),
        first_invalid = cursor,
        lines = working.line_count(),
        "tokenizer scheduler started"
    );

    loop {
        let can_submit = in_flight.is_none() && cursor < working.line_count();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!("tokenizer scheduler cancelled");
                break;
            }

            changed = updates.changed() => {
                if changed.is_err() {
                    tracing::debug!("document closed, tokenizer scheduler stopping");
                    break;
                }
                working = state.load_full();
                cursor = working.first_invalid();
                if let Some((timestamp, line)) = in_flight.take() {
                    tracing::debug!(
                        line,
                        stale_timestamp = timestamp,
                        timestamp = working.timestamp(),
                        "abandoning in-flight lex request"
                    );
                }
            }

            response = responses.recv() => {
                let Some(response) = response else {
                    tracing::warn!("tokenizer worker closed its response channel");
                    break;
                };
                if in_flight == Some((response.timestamp, response.line)) {
                    in_flight = None;
                }
                match accept(&state, &response, &initial_state) {
                    Some(snapshot) => {
                        tracing::trace!(
                            line = response.line,
                            timestamp = response.timestamp,
                            first_invalid = snapshot.first_invalid(),
                            "applied tokens"
                        );
                        cursor = snapshot.first_invalid();
                        working = snapshot;
                        if working.is_fully_tokenized() {
                            tracing::debug!(timestamp = working.timestamp(), "document fully tokenized");
                        }
                    }
                    None => tracing::debug!(
                        line = response.line,
                        timestamp = response.timestamp,
                        "dropping stale lex response"
                    ),
                }
            }

            permit = requests.reserve(), if can_submit => {
                let Ok(permit) = permit else {
                    tracing::warn!("tokenizer worker closed its request channel");
                    break;
                };
                match working.lex_request(cursor, &initial_state) {
                    Some(request) => {
                        in_flight = Some((request.timestamp, request.line));
                        permit.send(request);
                    }
                    None => cursor = working.line_count(),
                }
            }
        }

        if last_yield.elapsed() >= config.slice() {
            let pause = config.pause();
            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(pause).await;
            }
            last_yield = Instant::now();
        }
    }

    tracing::debug!("tokenizer scheduler stopped");
}

/// Apply `response` to the current snapshot if it still belongs there
fn accept(
    state: &ArcSwap<Snapshot>,
    response: &LexResponse,
    initial: &ContinuationState,
) -> Option<Arc<Snapshot>> {
    publish_with::<Infallible, _>(state, |current| Ok(current.apply_tokens(response, initial)))
        .unwrap_or_else(|never| match never {})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panicked() -> TokenizerHandle {
        TokenizerHandle {
            task: tokio::spawn(async { panic!("lexer state corrupted") }),
            cancel: CancellationToken::new().drop_guard(),
        }
    }

    #[tokio::test]
    async fn join_reports_a_panicked_task_without_propagating() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let handle = panicked();
        tokio::task::yield_now().await;
        handle.join().await;

        let handle = panicked();
        handle.shutdown().await;
    }
}
