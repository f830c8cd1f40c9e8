//!
//! The node layer is the single execution context that owns a node's state.
//!
//! A dedicated thread takes ownership of the state value returned by the `init` closure
//! given to [`NodeLayer::spawn`] and then runs submitted tasks one at a time, in
//! submission order. Nothing else holds a reference to the state, so every read or
//! write of it, whether it comes from a local API call or from a transport callback,
//! happens through a task closure on that thread.
//!
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, event, Level};

static NEXT_NODE_LAYER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // 0 means the current thread is not a node layer thread
    static CURRENT_NODE_LAYER_ID: Cell<usize> = Cell::new(0);
}

type Task<T> = Box<dyn FnOnce(&mut T) + Send>;

enum Command<T> {
    Run(Task<T>),
    Shutdown,
}

/// Failure to get a task executed, as opposed to a failure of the task itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeLayerError {
    #[error("the node layer has shut down")]
    Shutdown,
    #[error("task panicked on the node layer: {0}")]
    Panicked(String),
    #[error("blocking call made from the node layer thread itself")]
    Reentrant,
    #[error("blocking call made from inside an async runtime, use exec instead")]
    InsideRuntime,
    #[error("failed to spawn the node layer thread: {0}")]
    Spawn(String),
}

/// Handle to a node layer. Cloning the handle does not clone the state.
pub struct NodeLayer<T> {
    id: usize,
    sender: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Clone for NodeLayer<T> {
    fn clone(&self) -> Self {
        NodeLayer {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for NodeLayer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLayer").field("id", &self.id).finish()
    }
}

impl<T: 'static> NodeLayer<T> {
    /// Starts the node layer thread. `init` runs on that thread and produces the state
    /// the layer owns from then on; it is handed a handle to the layer being created so
    /// the state can marshal work back onto its own layer.
    pub fn spawn<F>(thread_name: &str, init: F) -> Result<NodeLayer<T>, NodeLayerError>
    where
        F: FnOnce(NodeLayer<T>) -> T + Send + 'static,
    {
        let id = NEXT_NODE_LAYER_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let layer = NodeLayer { id, sender };
        let handle = layer.clone();
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                CURRENT_NODE_LAYER_ID.with(|current| current.set(id));
                let state = init(handle);
                run_tasks(id, state, receiver);
            })
            .map_err(|err| NodeLayerError::Spawn(err.to_string()))?;
        event!(Level::DEBUG, "node layer {} started", id);
        Ok(layer)
    }

    pub fn is_node_layer_thread(&self) -> bool {
        CURRENT_NODE_LAYER_ID.with(|current| current.get() == self.id)
    }

    /// Submits `task` and returns a completion for its result without waiting.
    pub fn submit<R, F>(&self, task: F) -> Result<Completion<R>, NodeLayerError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_sender, result_receiver) = oneshot::channel();
        let task: Task<T> = Box::new(move |state: &mut T| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(state)))
                .map_err(|payload| NodeLayerError::Panicked(panic_message(payload)));
            // the submitter may have stopped waiting, nothing to do then
            let _ = result_sender.send(result);
        });
        self.sender
            .send(Command::Run(task))
            .map_err(|_| NodeLayerError::Shutdown)?;
        Ok(Completion {
            layer_id: self.id,
            receiver: result_receiver,
        })
    }

    /// Runs `task` on the node layer and blocks until it has completed.
    ///
    /// Must not be called from the node layer thread: the task could never start while
    /// the caller holds the thread, so that is reported as `Reentrant` instead.
    pub fn sync_exec<R, F>(&self, task: F) -> Result<R, NodeLayerError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_node_layer_thread() {
            return Err(NodeLayerError::Reentrant);
        }
        if inside_runtime() {
            return Err(NodeLayerError::InsideRuntime);
        }
        self.submit(task)?.wait()
    }

    /// Async equivalent of `sync_exec` for callers running inside a runtime.
    pub async fn exec<R, F>(&self, task: F) -> Result<R, NodeLayerError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(task)?.wait_async().await
    }

    /// Queues `task` without waiting for it. A panic inside the task is logged.
    pub fn post<F>(&self, task: F) -> Result<(), NodeLayerError>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let layer_id = self.id;
        let task: Task<T> = Box::new(move |state: &mut T| {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(state))) {
                error!(
                    "posted task panicked on node layer {}: {}",
                    layer_id,
                    panic_message(payload)
                );
            }
        });
        self.sender
            .send(Command::Run(task))
            .map_err(|_| NodeLayerError::Shutdown)
    }

    /// Stops the layer after the tasks already queued have run. The state is dropped
    /// on the layer thread.
    pub fn shutdown(&self) {
        if self.sender.send(Command::Shutdown).is_err() {
            debug!("node layer {} already shut down", self.id);
        }
    }
}

/// The pending result of a submitted task.
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion<R> {
    layer_id: usize,
    receiver: oneshot::Receiver<Result<R, NodeLayerError>>,
}

impl<R> Completion<R> {
    /// Blocks the calling thread until the task has run.
    pub fn wait(self) -> Result<R, NodeLayerError> {
        if CURRENT_NODE_LAYER_ID.with(|current| current.get() == self.layer_id) {
            return Err(NodeLayerError::Reentrant);
        }
        if inside_runtime() {
            return Err(NodeLayerError::InsideRuntime);
        }
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(NodeLayerError::Shutdown))
    }

    pub async fn wait_async(self) -> Result<R, NodeLayerError> {
        self.receiver
            .await
            .unwrap_or(Err(NodeLayerError::Shutdown))
    }
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("layer_id", &self.layer_id)
            .finish()
    }
}

fn run_tasks<T>(id: usize, mut state: T, mut receiver: mpsc::UnboundedReceiver<Command<T>>) {
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Run(task) => task(&mut state),
            Command::Shutdown => break,
        }
    }
    event!(Level::DEBUG, "node layer {} stopped", id);
}

// blocking on a receiver from a runtime thread panics in tokio
fn inside_runtime() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_counter() -> NodeLayer<Vec<u32>> {
        NodeLayer::spawn("test-node-layer", |_| Vec::new()).unwrap()
    }

    #[test]
    fn sync_exec_runs_on_the_layer_thread_test() {
        let layer = spawn_counter();
        assert!(!layer.is_node_layer_thread());
        let probe = layer.clone();
        let on_layer = layer
            .sync_exec(move |_state| probe.is_node_layer_thread())
            .unwrap();
        assert!(on_layer);
        layer.shutdown();
    }

    #[test]
    fn tasks_run_in_submission_order_test() {
        let layer = spawn_counter();
        for value in 0..10 {
            layer.post(move |state| state.push(value)).unwrap();
        }
        let seen = layer.sync_exec(|state| state.clone()).unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<u32>>());
        layer.shutdown();
    }

    #[test]
    fn task_failure_is_returned_as_the_value_test() {
        let layer = spawn_counter();
        let result: Result<std::result::Result<(), String>, NodeLayerError> =
            layer.sync_exec(|_| Err(String::from("boom")));
        assert_eq!(result, Ok(Err(String::from("boom"))));
        layer.shutdown();
    }

    #[test]
    fn panicking_task_is_reported_and_layer_survives_test() {
        let layer = spawn_counter();
        let result = layer.sync_exec(|_state| -> u32 { panic!("task blew up") });
        assert_eq!(
            result,
            Err(NodeLayerError::Panicked(String::from("task blew up")))
        );
        assert_eq!(layer.sync_exec(|state| state.len()), Ok(0));
        layer.shutdown();
    }

    #[test]
    fn reentrant_sync_exec_fails_fast_test() {
        let layer = spawn_counter();
        let inner = layer.clone();
        let result = layer
            .sync_exec(move |_| inner.sync_exec(|state| state.len()))
            .unwrap();
        assert_eq!(result, Err(NodeLayerError::Reentrant));
        layer.shutdown();
    }

    #[test]
    fn submitting_after_shutdown_fails_test() {
        let layer = spawn_counter();
        layer.shutdown();
        // queued behind the shutdown command, so it never runs
        assert_eq!(layer.sync_exec(|_| ()), Err(NodeLayerError::Shutdown));
    }

    #[tokio::test]
    async fn sync_exec_inside_a_runtime_fails_fast_test() {
        let layer = spawn_counter();
        assert_eq!(
            layer.sync_exec(|state| state.len()),
            Err(NodeLayerError::InsideRuntime)
        );
        let completion = layer.submit(|state| state.len()).unwrap();
        assert_eq!(completion.wait(), Err(NodeLayerError::InsideRuntime));
        assert_eq!(layer.exec(|state| state.len()).await, Ok(0));
        layer.shutdown();
    }

    #[tokio::test]
    async fn exec_awaits_the_result_test() {
        let layer = spawn_counter();
        layer.post(|state| state.push(7)).unwrap();
        let total: u32 = layer.exec(|state| state.iter().sum()).await.unwrap();
        assert_eq!(total, 7);
        layer.shutdown();
    }
}
