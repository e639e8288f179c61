//! The Redis-backed task queue.
//!
//! Tasks are JSON documents of the form `{"type": "<kind>", "payload": ...}` stored in a Redis
//! list. A producer job pushes tasks to the tail of the list, and a pool of workers pops them from
//! the head, dispatching each to the handler registered for its kind.

mod handler;
mod producer;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

pub use handler::NodeBatchHandler;
pub use producer::NodeEnumerator;
pub use worker::WorkerPool;

/// The kinds of tasks which may be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    NodeBatch,
}

impl TaskKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeBatch => "node_batch",
        }
    }

    fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "node_batch" => Some(Self::NodeBatch),
            _ => None,
        }
    }
}

/// A queued task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Task {
    /// Reconcile the named nodes.
    NodeBatch(Vec<String>),
}

/// The envelope of a task as read off the wire, before validation.
#[derive(Deserialize)]
struct RawTask {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Task {
    /// The kind of this task.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::NodeBatch(_) => TaskKind::NodeBatch,
        }
    }

    /// Encode this task into its wire form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("error encoding task")
    }

    /// Decode & validate a task from its wire form.
    pub fn decode(raw: &str) -> Result<Self> {
        let envelope: RawTask = serde_json::from_str(raw).map_err(|err| AppError::PayloadShape(format!("invalid task envelope: {}", err)))?;
        let kind = TaskKind::from_wire(&envelope.kind).ok_or_else(|| AppError::UnknownTaskType(envelope.kind.clone()))?;
        match kind {
            TaskKind::NodeBatch => {
                let names: Vec<String> = serde_json::from_value(envelope.payload)
                    .map_err(|err| AppError::PayloadShape(format!("{} payload must be a list of node names: {}", kind.as_str(), err)))?;
                Ok(Self::NodeBatch(names))
            }
        }
    }
}

/// A handler of one kind of task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<()>;
}

/// The handlers of each task kind.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerTable {
    /// Register the handler of the given kind, replacing any previous one.
    pub fn register(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Decode the given raw task & dispatch it to its handler.
    #[tracing::instrument(level = "debug", skip(self, raw))]
    pub async fn dispatch(&self, raw: &str) -> Result<()> {
        let task = Task::decode(raw)?;
        let kind = task.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| AppError::UnknownTaskType(kind.as_str().into()))?;
        handler.handle(task).await.with_context(|| format!("error handling {} task", kind.as_str()))
    }
}
