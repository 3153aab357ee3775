use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};

use log::info;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Single-slot background queue: tasks run strictly one at a time, in
/// the order they were enqueued.
///
/// The width of one is a deliberate throttle on the remote service and
/// on local upload bandwidth. Everything a task needs travels with the
/// task itself, so widening the queue would only require each worker to
/// keep constructing its own client, which they already do.
pub struct SerialQueue {
    tasks: Sender<Task>,
    runner: JoinHandle<()>,
}

impl SerialQueue {
    pub fn new() -> SerialQueue {
        let (tasks, queued) = channel::<Task>();
        let runner = thread::spawn(move || {
            while let Ok(task) = queued.recv() {
                task();
            }
            info!("Submission queue drained, stopping");
        });

        SerialQueue { tasks, runner }
    }

    /// Queue a task without blocking. Returns false if the queue thread
    /// has already stopped.
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks.send(Box::new(task)).is_ok()
    }

    /// Run every queued task to completion, then stop the background
    /// thread.
    pub fn join(self) {
        let SerialQueue { tasks, runner } = self;
        drop(tasks);
        let _ = runner.join();
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        SerialQueue::new()
    }
}
