//! Built-in Task Kinds
//!
//! Small stock tasks shipped with the runtime, mostly useful for wiring
//! checks and demo clusters.

use async_trait::async_trait;
use tracing::info;

use daf_core::{Message, Result};

use crate::registry::TaskRegistry;
use crate::tasks::{MessageProcessingTask, MessageProcessor, TaskContext};

/// Kind identifier for [`LogSink`]
pub const LOG_SINK_KIND: &str = "daf.log-sink";

/// Logs every message arriving on the task's default queue
pub struct LogSink;

#[async_trait]
impl MessageProcessor for LogSink {
    async fn on_message(&mut self, ctx: &TaskContext, msg: Message) -> Result<()> {
        info!(
            "{}: message {} from {} ({} value(s))",
            ctx.name(),
            msg.id(),
            msg.sender(),
            msg.value_count()
        );
        Ok(())
    }
}

/// Register every built-in kind into the given registry
pub fn register_builtin_tasks(registry: &mut TaskRegistry) {
    registry.register(LOG_SINK_KIND, || {
        Box::new(MessageProcessingTask::new(LogSink))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let mut registry = TaskRegistry::new();
        register_builtin_tasks(&mut registry);
        assert!(registry.contains(LOG_SINK_KIND));
    }
}
