use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use log::{debug, warn};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
#[error("the thread pool has shut down")]
pub struct PoolClosed;

/// Fixed number of worker threads pulling jobs from one queue.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    /// # Panics
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0);

        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::channel();

        let receiver = Arc::new(Mutex::new(receiver));
        let sender = Some(sender);

        for i in 0..size {
            workers.push(Worker::new(i, Arc::clone(&receiver)));
        }

        Self { workers, sender }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute<F>(&self, f: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(f);
        self.sender
            .as_ref()
            .ok_or(PoolClosed)?
            .send(job)
            .map_err(|_| PoolClosed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let thread = thread::spawn(move || {
            loop {
                let msg = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                match msg {
                    Ok(job) => {
                        debug!("worker {id} handling a connection");
                        job();
                    }
                    Err(_) => {
                        debug!("worker {id} disconnected");
                        break;
                    }
                }
            }
        });

        Self { id, thread }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runs_every_job_before_drop_returns() {
        let done = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::new(3);
        assert_eq!(pool.size(), 3);
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        drop(pool);
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    #[should_panic]
    fn empty_pool_is_rejected() {
        ThreadPool::new(0);
    }
}
