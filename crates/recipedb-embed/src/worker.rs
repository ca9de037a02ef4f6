//! Dedicated thread that owns the embedder.
//!
//! Jobs are queued on a channel and run one at a time, so at most one forward
//! pass is ever in flight. A job whose ticket has gone stale while it waited
//! is answered with [`Error::Cancelled`] without touching the model.

use anyhow::{anyhow, Result};
use std::thread;
use tokio::sync::{mpsc, oneshot};

use recipedb_core::cancel::Ticket;
use recipedb_core::error::Error;
use recipedb_core::traits::Embedder;

struct Job {
    texts: Vec<String>,
    ticket: Ticket,
    reply: oneshot::Sender<Result<Vec<Vec<f32>>>>,
}

#[derive(Clone)]
pub struct EmbedWorker {
    jobs: mpsc::UnboundedSender<Job>,
    dim: usize,
    max_len: usize,
}

impl EmbedWorker {
    /// Move `embedder` onto a new thread. The thread exits once every
    /// handle to the worker is dropped.
    pub fn spawn(embedder: Box<dyn Embedder>) -> Result<Self> {
        let dim = embedder.dim();
        let max_len = embedder.max_len();
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new()
            .name("recipedb-embed".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let result = if job.ticket.is_stale() {
                        tracing::debug!(generation = job.ticket.generation(), "skipping stale embed job");
                        Err(Error::Cancelled.into())
                    } else {
                        embedder.embed_batch(&job.texts)
                    };
                    // The requester may have given up; nothing to do then.
                    let _ = job.reply.send(result);
                }
                tracing::debug!("embed worker stopped");
            })
            .map_err(|e| anyhow!(Error::Operation(format!("failed to start embed worker: {e}"))))?;
        Ok(Self { jobs, dim, max_len })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub async fn embed(&self, texts: Vec<String>, ticket: Ticket) -> Result<Vec<Vec<f32>>> {
        ticket.check()?;
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job { texts, ticket, reply })
            .map_err(|_| Error::Operation("embed worker is not running".into()))?;
        rx.await
            .map_err(|_| Error::Operation("embed worker dropped the request".into()))?
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str, ticket: Ticket) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()], ticket)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!(Error::Operation("embedder returned no vector".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recipedb_core::cancel::Generation;
    use recipedb_core::error::is_cancelled;

    struct Constant;

    impl Embedder for Constant {
        fn dim(&self) -> usize { 2 }
        fn max_len(&self) -> usize { 8 }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn runs_jobs_for_current_ticket() {
        let worker = EmbedWorker::spawn(Box::new(Constant)).unwrap();
        let v = worker.embed_query("anything", Generation::new().ticket()).await.unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert_eq!(worker.dim(), 2);
    }

    #[tokio::test]
    async fn stale_ticket_is_cancelled() {
        let worker = EmbedWorker::spawn(Box::new(Constant)).unwrap();
        let generation = Generation::new();
        let ticket = generation.ticket();
        generation.advance();
        let err = worker.embed_query("anything", ticket).await.unwrap_err();
        assert!(is_cancelled(&err));
    }
}
