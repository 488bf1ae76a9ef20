//! Task Execution
//!
//! The `Task` SPI and the machinery that runs implementations of it:
//! - `TaskContext`: per-instance handle giving a task its name, its node's
//!   services, and the cooperative stop flag
//! - `spawn_task`: drives `on_start` / `do_work` loop / `on_stop` on a tokio
//!   task and releases the instance's ports on exit
//! - `MessageProcessingTask`: adapter that feeds a `MessageProcessor` from
//!   the task's default queue using a timed receive, so a stop request is
//!   observed within one receive wait

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use daf_core::{DafError, Message, NodeContext, Port, Result};

// ----------------------------------------------------------------------------
// Task Context
// ----------------------------------------------------------------------------

/// Execution context handed to a task instance
#[derive(Clone)]
pub struct TaskContext {
    name: String,
    node: Arc<NodeContext>,
    default_queue: Option<String>,
    stop: Arc<AtomicBool>,
}

impl TaskContext {
    pub(crate) fn new(
        name: impl Into<String>,
        node: Arc<NodeContext>,
        default_queue: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            default_queue,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Instance name, as seen in message sender/recipient fields
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_name(&self) -> &str {
        self.node.node_name()
    }

    /// Ask the task to stop at its next loop check
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn default_queue(&self) -> Option<&str> {
        self.default_queue.as_deref()
    }

    /// Port to this task's configured input queue
    pub fn default_port(&self) -> Result<Arc<dyn Port>> {
        let queue = self.default_queue.as_deref().ok_or_else(|| {
            DafError::Application(format!("task {} has no default queue", self.name))
        })?;
        self.node.ports().create_port(&self.name, queue)
    }

    /// Port to any named queue, local or remote
    pub fn port_to(&self, queue: &str) -> Result<Arc<dyn Port>> {
        self.node.ports().create_port(&self.name, queue)
    }

    /// Send a message toward the named queue
    pub async fn send_to(&self, queue: &str, msg: Message) -> Result<()> {
        self.port_to(queue)?.send(msg).await
    }

    /// Fresh message with a unique id and the node's default wire form
    pub fn new_message(&self) -> Message {
        self.node.factory().create()
    }

    pub fn receive_wait(&self) -> Duration {
        self.node.receive_wait()
    }
}

// ----------------------------------------------------------------------------
// Task SPI
// ----------------------------------------------------------------------------

/// A named unit of work running on a node
///
/// Lifecycle: `init` once before the instance is considered started (errors
/// here fail the start), then `on_start`, then `do_work` repeated until stop
/// is requested or an iteration errors, then `on_stop`.
#[async_trait]
pub trait Task: Send {
    async fn init(&mut self, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }

    async fn on_start(&mut self, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }

    /// One iteration of work; must return periodically so stop requests are
    /// observed
    async fn do_work(&mut self, ctx: &TaskContext) -> Result<()>;

    async fn on_stop(&mut self, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }
}

/// Drive a task's lifecycle on its own tokio task
pub(crate) fn spawn_task(mut task: Box<dyn Task>, ctx: TaskContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = task.on_start(&ctx).await {
            error!("task {} failed to start: {}", ctx.name(), e);
            ctx.node.ports().remove_ports_for_task(ctx.name());
            return;
        }
        info!("task {} started", ctx.name());
        while !ctx.stop_requested() {
            if let Err(e) = task.do_work(&ctx).await {
                error!("task {} work iteration failed: {}", ctx.name(), e);
                break;
            }
        }
        if let Err(e) = task.on_stop(&ctx).await {
            warn!("task {} stop hook failed: {}", ctx.name(), e);
        }
        ctx.node.ports().remove_ports_for_task(ctx.name());
        info!("task {} stopped", ctx.name());
    })
}

// ----------------------------------------------------------------------------
// Task Handle
// ----------------------------------------------------------------------------

/// Handle to one running task instance
pub struct TaskHandle {
    name: String,
    ctx: TaskContext,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn new(name: String, ctx: TaskContext, join: JoinHandle<()>) -> Self {
        Self { name, ctx, join }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_stop(&self) {
        self.ctx.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request stop and wait up to `grace` for the work loop to exit; abort
    /// the task if it does not
    pub(crate) async fn stop_and_join(mut self, grace: Duration) {
        self.ctx.request_stop();
        if tokio::time::timeout(grace, &mut self.join).await.is_err() {
            warn!(
                "task {} did not stop within {:?}, aborting it",
                self.name, grace
            );
            self.join.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Message-Processing Task
// ----------------------------------------------------------------------------

/// Message-driven task body invoked for each message from the default queue
#[async_trait]
pub trait MessageProcessor: Send {
    async fn on_message(&mut self, ctx: &TaskContext, msg: Message) -> Result<()>;
}

/// Adapter turning a `MessageProcessor` into a `Task`
///
/// Each work iteration does one timed receive on the default port; a quiet
/// queue therefore never parks the instance past the configured receive
/// wait, which keeps cooperative stop responsive.
pub struct MessageProcessingTask<P> {
    processor: P,
}

impl<P> MessageProcessingTask<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl<P: MessageProcessor> Task for MessageProcessingTask<P> {
    async fn do_work(&mut self, ctx: &TaskContext) -> Result<()> {
        let port = ctx.default_port()?;
        match port.receive_timeout(ctx.receive_wait()).await {
            Ok(Some(msg)) => self.processor.on_message(ctx, msg).await,
            Ok(None) => Ok(()),
            // The input queue disappeared under us, usually because the
            // application is stopping. Yield so the stop flag is seen.
            Err(DafError::WaiterAbandoned) => {
                debug!("task {} receive interrupted", ctx.name());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daf_core::{QueueDef, RuntimeConfig};
    use std::sync::atomic::AtomicUsize;

    fn test_context(queue: Option<&str>) -> TaskContext {
        let config = RuntimeConfig {
            receive_wait_ms: 20,
            ..RuntimeConfig::default()
        };
        let node = Arc::new(NodeContext::new("alpha", config));
        node.queues()
            .create_queue(&QueueDef::new("in", "alpha").with_capacity(8));
        TaskContext::new("worker", node, queue.map(str::to_string))
    }

    struct Counting {
        seen: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Counting {
        async fn on_start(&mut self, _ctx: &TaskContext) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn do_work(&mut self, _ctx: &TaskContext) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &TaskContext) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_is_cooperative_and_idempotent() {
        let seen = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let ctx = test_context(None);
        let join = spawn_task(
            Box::new(Counting {
                seen: seen.clone(),
                started: started.clone(),
                stopped: stopped.clone(),
            }),
            ctx.clone(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        ctx.request_stop();
        ctx.request_stop();
        join.await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_work_error_ends_the_loop_but_still_stops_cleanly() {
        struct Failing {
            stopped: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Task for Failing {
            async fn do_work(&mut self, _ctx: &TaskContext) -> Result<()> {
                Err(DafError::Application("boom".to_string()))
            }

            async fn on_stop(&mut self, _ctx: &TaskContext) -> Result<()> {
                self.stopped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let stopped = Arc::new(AtomicUsize::new(0));
        let ctx = test_context(None);
        let join = spawn_task(
            Box::new(Failing {
                stopped: stopped.clone(),
            }),
            ctx,
        );
        join.await.unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    struct Collect {
        ids: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageProcessor for Collect {
        async fn on_message(&mut self, _ctx: &TaskContext, msg: Message) -> Result<()> {
            self.ids.lock().unwrap().push(msg.id().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_processor_sees_queued_messages_in_order() {
        let ids = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ctx = test_context(Some("in"));
        let join = spawn_task(
            Box::new(MessageProcessingTask::new(Collect { ids: ids.clone() })),
            ctx.clone(),
        );

        let feeder = ctx.port_to("in").unwrap();
        for n in 0..5 {
            feeder.send(Message::new(format!("m{}", n), Default::default()))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.request_stop();
        join.await.unwrap();

        let got = ids.lock().unwrap().clone();
        assert_eq!(got, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_processor_without_default_queue_fails_fast() {
        let ctx = test_context(None);
        assert!(ctx.default_port().is_err());
    }

    #[tokio::test]
    async fn test_ports_are_released_when_the_task_exits() {
        let ctx = test_context(Some("in"));
        let node_ports = ctx.node.ports().clone();
        let join = spawn_task(
            Box::new(MessageProcessingTask::new(Collect {
                ids: Arc::new(std::sync::Mutex::new(Vec::new())),
            })),
            ctx.clone(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(node_ports.port_count(), 1);
        ctx.request_stop();
        join.await.unwrap();
        assert_eq!(node_ports.port_count(), 0);
    }
}
