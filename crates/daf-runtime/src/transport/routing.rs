//! Task Routing Table
//!
//! Maps task instance names to the node they run on, so replies to remote
//! dequeue requests can be addressed. Populated from task definitions as
//! applications start (on every node, whether or not the task is local) and
//! pruned as they stop.

use dashmap::DashMap;

use daf_core::{NodeDef, TaskDef, ALL_NODES};

#[derive(Default)]
pub struct TaskRouter {
    tasks: DashMap<String, String>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where every instance of `def` runs
    pub fn register(&self, def: &TaskDef, nodes: &[NodeDef]) {
        if def.node == ALL_NODES {
            for node in nodes {
                self.tasks
                    .insert(def.instance_name(&node.name), node.name.clone());
            }
        } else {
            self.tasks.insert(def.name.clone(), def.node.clone());
        }
    }

    pub fn unregister(&self, def: &TaskDef, nodes: &[NodeDef]) {
        if def.node == ALL_NODES {
            for node in nodes {
                self.tasks.remove(&def.instance_name(&node.name));
            }
        } else {
            self.tasks.remove(&def.name);
        }
    }

    pub fn node_for_task(&self, task: &str) -> Option<String> {
        self.tasks.get(task).map(|n| n.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
