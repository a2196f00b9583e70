//! Asynchronous routers
//!
//! A router takes messages off the transport's read path and runs the
//! slow work elsewhere. The dispatcher only sees the `Router` trait;
//! `ChannelRouter` is a tokio implementation backed by a task pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::protocol::{Message, Schema};

/// Receives messages for asynchronous execution.
///
/// `submit` must not block; the caller never learns how or when the
/// message is processed.
pub trait Router<C>: Send + Sync {
    fn submit(&self, tag: &'static str, message: Box<dyn Message>, context: C);
}

/// Default number of routed jobs allowed to run at once
pub const DEFAULT_WORKERS: usize = 64;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type RouteFn<C> = Arc<dyn Fn(Box<dyn Message>, C) -> BoxFuture + Send + Sync>;

struct Submission<C> {
    tag: &'static str,
    message: Box<dyn Message>,
    context: C,
}

/// Builds a `ChannelRouter` from typed async routes
pub struct RouterBuilder<C> {
    routes: HashMap<&'static str, RouteFn<C>>,
    workers: usize,
}

impl<C: Send + 'static> RouterBuilder<C> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            workers: DEFAULT_WORKERS,
        }
    }

    /// Limit the number of jobs running concurrently
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Route schema `T` to an async function. A later route for the same
    /// schema replaces the earlier one.
    pub fn route<T, F, Fut>(mut self, f: F) -> Self
    where
        T: Schema,
        F: Fn(T, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let route: RouteFn<C> = Arc::new(move |message: Box<dyn Message>, context: C| {
            match message.downcast::<T>() {
                Some(message) => Box::pin(f(*message, context)) as BoxFuture,
                None => {
                    tracing::warn!("Route for {} received a different message type", T::TAG);
                    Box::pin(async {}) as BoxFuture
                }
            }
        });
        self.routes.insert(T::TAG, route);
        self
    }

    /// Start the router loop on the current tokio runtime
    pub fn spawn(self) -> (ChannelRouter<C>, RouterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let permits = Arc::new(Semaphore::new(self.workers));

        tracing::debug!(
            "Router started with {} routes and {} workers",
            self.routes.len(),
            self.workers
        );

        let task = tokio::spawn(run(rx, self.routes, permits, shutdown.clone()));

        (ChannelRouter { tx }, RouterHandle { shutdown, task })
    }
}

impl<C: Send + 'static> Default for RouterBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits messages to the router loop over an unbounded channel
pub struct ChannelRouter<C> {
    tx: mpsc::UnboundedSender<Submission<C>>,
}

impl<C> Clone for ChannelRouter<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> ChannelRouter<C> {
    /// Check whether the router loop is still accepting work
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<C: Send + 'static> Router<C> for ChannelRouter<C> {
    fn submit(&self, tag: &'static str, message: Box<dyn Message>, context: C) {
        let submission = Submission {
            tag,
            message,
            context,
        };
        if self.tx.send(submission).is_err() {
            tracing::warn!("Router stopped, dropping message {}", tag);
        }
    }
}

/// Controls the lifetime of the router loop
pub struct RouterHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl RouterHandle {
    /// Stop accepting submissions, finish everything already queued and
    /// wait for running jobs to complete.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!("Router loop failed: {}", e);
        }
    }
}

async fn run<C: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<Submission<C>>,
    routes: HashMap<&'static str, RouteFn<C>>,
    permits: Arc<Semaphore>,
    shutdown: Arc<Notify>,
) {
    let mut jobs = JoinSet::new();

    loop {
        tokio::select! {
            submission = rx.recv() => {
                match submission {
                    Some(submission) => start(&routes, &permits, &mut jobs, submission).await,
                    None => break,
                }
            }
            _ = shutdown.notified() => {
                rx.close();
                while let Some(submission) = rx.recv().await {
                    start(&routes, &permits, &mut jobs, submission).await;
                }
                break;
            }
            Some(result) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(e) = result {
                    tracing::warn!("Routed job failed: {}", e);
                }
            }
        }
    }

    while let Some(result) = jobs.join_next().await {
        if let Err(e) = result {
            tracing::warn!("Routed job failed: {}", e);
        }
    }
    tracing::debug!("Router stopped");
}

async fn start<C>(
    routes: &HashMap<&'static str, RouteFn<C>>,
    permits: &Arc<Semaphore>,
    jobs: &mut JoinSet<()>,
    submission: Submission<C>,
) {
    let Some(route) = routes.get(submission.tag) else {
        tracing::warn!("No route for message {}, dropping", submission.tag);
        return;
    };

    let Ok(permit) = permits.clone().acquire_owned().await else {
        return;
    };

    let job = route(submission.message, submission.context);
    jobs.spawn(async move {
        job.await;
        drop(permit);
    });
}
