//! Fixed pool of worker threads draining a [`TaskQueue`].
//!
//! A job panic is caught at the task boundary and forwarded to the
//! pool's panic handler; the worker then moves on to the next job. A job
//! may instead ask its worker to exit by returning [`Control::Exit`].

use crate::queue::TaskQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// What a worker does after running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

type Job = Box<dyn FnOnce() -> Control + Send + 'static>;

enum Message {
    Job(Job),
    Terminate,
}

pub type PanicHandler = Arc<dyn Fn(usize, &str) + Send + Sync>;

fn default_panic_handler(worker: usize, message: &str) {
    tracing::error!(worker, message, "job panicked; worker continues");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

pub struct WorkerPool {
    queue: Arc<TaskQueue<Message>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` worker threads. `count` must be at least 1.
    pub fn new(count: usize) -> Self {
        Self::with_panic_handler(count, Arc::new(default_panic_handler))
    }

    pub fn with_panic_handler(count: usize, handler: PanicHandler) -> Self {
        assert!(count >= 1, "worker pool needs at least one thread");
        let queue = Arc::new(TaskQueue::new());
        let threads = (0..count)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                std::thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || worker_loop(id, &queue, &handler))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { queue, threads }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Queue a job behind everything already queued.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() -> Control + Send + 'static,
    {
        self.queue.push_back(Message::Job(Box::new(job)));
    }

    /// Graceful shutdown: every queued job runs first, then each worker
    /// picks up one terminate sentinel and exits. Joins all threads.
    pub fn shutdown(&mut self) {
        for _ in 0..self.threads.len() {
            self.queue.push_back(Message::Terminate);
        }
        self.join();
    }

    /// Immediate shutdown: sentinels overtake queued jobs, which are
    /// abandoned. A job already running runs to completion. Joins all
    /// threads.
    pub fn shutdown_now(&mut self) {
        for _ in 0..self.threads.len() {
            self.queue.push_front(Message::Terminate);
        }
        self.join();
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown_now();
        }
    }
}

fn worker_loop(id: usize, queue: &TaskQueue<Message>, handler: &PanicHandler) {
    loop {
        match queue.pop() {
            Message::Terminate => break,
            Message::Job(job) => match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Control::Continue) => {}
                Ok(Control::Exit) => {
                    tracing::debug!(worker = id, "job requested worker exit");
                    break;
                }
                Err(payload) => handler.as_ref()(id, panic_message(payload.as_ref())),
            },
        }
    }
}
