//! Query lifecycle: debounce, cancellation, mode switching and pagination.
//!
//! A single actor task owns all coordinator state. Callers send commands
//! through a [`QueryCoordinator`] handle and observe the published
//! [`SearchView`] on a watch channel. Every search that starts advances the
//! shared [`Generation`]; a completion is published only if its generation
//! is still current, so the last query wins regardless of which finishes
//! first.

use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use recipedb_core::cancel::Generation;
use recipedb_core::config::SearchSettings;
use recipedb_core::error::{is_cancelled, Error};
use recipedb_core::traits::Searcher;
use recipedb_core::types::{ResultPage, SearchMode, SearchResult};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub debounce: Duration,
    pub page_size: usize,
    pub initial_mode: SearchMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&SearchSettings::default())
    }
}

impl From<&SearchSettings> for CoordinatorConfig {
    fn from(s: &SearchSettings) -> Self {
        Self { debounce: s.debounce(), page_size: s.page_size.max(1), initial_mode: s.default_mode }
    }
}

/// Snapshot of what the interactive surface should show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchView {
    pub query: String,
    pub mode: SearchMode,
    /// Pages `0..=page` of the ranked list.
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    pub has_more: bool,
    pub is_searching: bool,
    pub error_message: Option<String>,
    /// Generation of the search that produced `results` (or is running).
    pub generation: u64,
    pub page: usize,
}

#[derive(Debug)]
enum Command {
    SetQuery(String),
    SetMode(SearchMode),
    LoadMore,
}

type Completion = (u64, Result<Vec<SearchResult>>);

/// Handle to the coordinator actor. Dropping it stops the actor and any
/// search it has in flight.
pub struct QueryCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SearchView>,
    task: JoinHandle<()>,
}

impl QueryCoordinator {
    /// Start the actor on the current tokio runtime.
    pub fn spawn<S: Searcher>(searcher: Arc<S>, config: CoordinatorConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let initial = SearchView { mode: config.initial_mode, ..SearchView::default() };
        let (view_tx, view) = watch::channel(initial);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let actor = Actor::new(searcher, config, view_tx, done_tx);
        let task = tokio::spawn(actor.run(command_rx, done_rx));
        Self { commands, view, task }
    }

    /// Store the text and (re)arm the debounce timer. Blank text clears the
    /// results immediately.
    pub fn set_query_text(&self, text: impl Into<String>) {
        self.send(Command::SetQuery(text.into()));
    }

    /// Switch ranking mode; a non-blank query re-runs without waiting for the debounce.
    pub fn set_mode(&self, mode: SearchMode) {
        self.send(Command::SetMode(mode));
    }

    /// Reveal one more page of the current results. Never recomputes.
    pub fn load_more(&self) {
        self.send(Command::LoadMore);
    }

    pub fn view(&self) -> SearchView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchView> {
        self.view.clone()
    }

    /// Wait for the first settled view produced by a search newer than
    /// `after_generation`.
    pub async fn wait_for_results(&self, after_generation: u64) -> Result<SearchView> {
        let mut rx = self.subscribe();
        let view = rx
            .wait_for(|v| v.generation > after_generation && !v.is_searching)
            .await
            .map_err(|_| Error::Operation("query coordinator stopped".into()))?;
        Ok(view.clone())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("query coordinator is not running");
        }
    }
}

impl Drop for QueryCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor<S> {
    searcher: Arc<S>,
    generation: Generation,
    config: CoordinatorConfig,
    text: String,
    mode: SearchMode,
    page: usize,
    ranked: Vec<SearchResult>,
    error_message: Option<String>,
    deadline: Option<Instant>,
    inflight: Option<JoinHandle<()>>,
    view_tx: watch::Sender<SearchView>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl<S: Searcher> Actor<S> {
    fn new(
        searcher: Arc<S>,
        config: CoordinatorConfig,
        view_tx: watch::Sender<SearchView>,
        done_tx: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            searcher,
            generation: Generation::new(),
            mode: config.initial_mode,
            config,
            text: String::new(),
            page: 0,
            ranked: Vec::new(),
            error_message: None,
            deadline: None,
            inflight: None,
            view_tx,
            done_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                () = debounce(self.deadline) => {
                    self.deadline = None;
                    self.start_search();
                }
                Some((generation, result)) = done.recv() => self.complete(generation, result),
            }
        }
        self.cancel_inflight();
        tracing::debug!("query coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SetQuery(text) => {
                self.text = text;
                self.page = 0;
                if self.text.trim().is_empty() {
                    self.clear();
                } else {
                    self.deadline = Some(Instant::now() + self.config.debounce);
                    self.publish(self.is_searching());
                }
            }
            Command::SetMode(mode) => {
                if mode == self.mode {
                    return;
                }
                self.mode = mode;
                self.page = 0;
                self.deadline = None;
                if self.text.trim().is_empty() {
                    self.publish(false);
                } else {
                    self.start_search();
                }
            }
            Command::LoadMore => {
                let shown = self.page.saturating_add(1).saturating_mul(self.config.page_size);
                if shown < self.ranked.len() {
                    self.page += 1;
                    self.publish(self.is_searching());
                }
            }
        }
    }

    fn start_search(&mut self) {
        self.cancel_inflight();
        let generation = self.generation.advance();
        let ticket = self.generation.ticket();
        self.error_message = None;

        let searcher = Arc::clone(&self.searcher);
        let done = self.done_tx.clone();
        let query = self.text.trim().to_string();
        let mode = self.mode;
        tracing::debug!(generation, %mode, %query, "search started");
        self.inflight = Some(tokio::spawn(async move {
            let result = AssertUnwindSafe(searcher.search(query, mode, ticket))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = format!("search panicked: {}", panic_message(&*panic));
                    Err(anyhow!(Error::Operation(message)))
                });
            // The actor may already be gone.
            let _ = done.send((generation, result));
        }));
        self.publish(true);
    }

    fn complete(&mut self, generation: u64, result: Result<Vec<SearchResult>>) {
        if generation != self.generation.current() {
            tracing::debug!(generation, current = self.generation.current(), "discarding stale results");
            return;
        }
        self.inflight = None;
        match result {
            Ok(ranked) => {
                tracing::debug!(generation, total = ranked.len(), "search published");
                self.ranked = ranked;
                self.error_message = None;
            }
            Err(err) if is_cancelled(&err) => {
                tracing::debug!(generation, "search cancelled");
            }
            Err(err) => {
                tracing::warn!(generation, error = %format!("{err:#}"), "search failed");
                self.ranked.clear();
                self.error_message = Some(format!("{err:#}"));
            }
        }
        self.page = 0;
        self.publish(false);
    }

    /// Blank query: drop results, stop the timer, supersede running work.
    fn clear(&mut self) {
        self.deadline = None;
        self.cancel_inflight();
        self.generation.advance();
        self.ranked.clear();
        self.error_message = None;
        self.publish(false);
    }

    fn cancel_inflight(&mut self) {
        if let Some(handle) = self.inflight.take() {
            handle.abort();
        }
    }

    fn is_searching(&self) -> bool {
        self.inflight.is_some()
    }

    fn publish(&self, is_searching: bool) {
        let page = ResultPage::slice(&self.ranked, self.page, self.config.page_size);
        self.view_tx.send_replace(SearchView {
            query: self.text.clone(),
            mode: self.mode,
            results: page.results,
            total_count: page.total_count,
            has_more: page.has_more,
            is_searching,
            error_message: self.error_message.clone(),
            generation: self.generation.current(),
            page: self.page,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn debounce(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
