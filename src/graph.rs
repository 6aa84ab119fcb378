//! Dependency-ordered task graph
//!
//! A small DAG scheduler for async work. Each node declares the nodes it
//! depends on; a node starts only after all of its predecessors completed,
//! and independent nodes run concurrently on the tokio runtime.
//!
//! ## Structure
//!
//! ```text
//! manga ──┬──> library ──┐
//!         │              ├──> chapters ──> updates
//! categ ──┼──> history ──┤
//!         │              └──> sessions
//!         └──> track
//! ```
//!
//! Predecessors must be declared before the node that depends on them, which
//! makes cycles impossible to express.
//!
//! ## Outcomes
//!
//! Every node ends in exactly one [`NodeOutcome`]:
//!
//! - **Completed**: the body returned `Ok`
//! - **Failed**: the body returned `Err`
//! - **Skipped**: a predecessor did not complete, the body never ran
//! - **Cancelled**: the [`CancellationToken`] fired before the body started
//! - **Panicked**: the body panicked
//!
//! A failure only affects the nodes that depend on it; unrelated branches
//! keep running to completion.
//!
//! ## Examples
//!
//! ```rust
//! use tankobon::graph::TaskGraph;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let mut graph: TaskGraph<&str, u32, String> = TaskGraph::new();
//! graph.add_node("a", &[], || async { Ok(1) })?;
//! graph.add_node("b", &["a"], || async { Ok(2) })?;
//!
//! let report = graph.run().await;
//! assert!(report.is_success());
//! # Ok::<(), tankobon::graph::GraphError<&str>>(())
//! # }).unwrap();
//! # }
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// A handle for cancelling a running graph
///
/// Cancellation stops scheduling: nodes that have not started yet end as
/// [`NodeOutcome::Cancelled`], nodes already running finish normally.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors while declaring a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError<K: Debug> {
    /// A node with this key was already declared
    #[error("node {0:?} declared twice")]
    DuplicateNode(K),

    /// A predecessor was not declared before the node depending on it
    #[error("node {node:?} depends on undeclared node {predecessor:?}")]
    UnknownPredecessor {
        /// The node being declared
        node: K,
        /// The missing predecessor
        predecessor: K,
    },
}

/// Final state of one node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome<K, V, E> {
    /// The body succeeded
    Completed(V),
    /// The body failed
    Failed(E),
    /// The body never ran because a predecessor did not complete
    Skipped {
        /// The predecessor that did not complete
        blocked_by: K,
    },
    /// Cancellation was requested before the body started
    Cancelled,
    /// The body panicked
    Panicked(String),
}

impl<K, V, E> NodeOutcome<K, V, E> {
    /// Whether the node completed
    pub fn is_completed(&self) -> bool {
        matches!(self, NodeOutcome::Completed(_))
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Completed(_) => "completed",
            NodeOutcome::Failed(_) => "failed",
            NodeOutcome::Skipped { .. } => "skipped",
            NodeOutcome::Cancelled => "cancelled",
            NodeOutcome::Panicked(_) => "panicked",
        }
    }
}

type NodeBody<V, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<V, E>> + Send>;
type SharedOutcome<K, V, E> = Shared<BoxFuture<'static, NodeOutcome<K, V, E>>>;

struct NodeSpec<K, V, E> {
    key: K,
    predecessors: Vec<K>,
    body: NodeBody<V, E>,
}

/// A graph of async nodes with declared predecessors
pub struct TaskGraph<K, V, E> {
    nodes: Vec<NodeSpec<K, V, E>>,
    cancel: Option<CancellationToken>,
}

impl<K, V, E> Default for TaskGraph<K, V, E> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            cancel: None,
        }
    }
}

impl<K, V, E> TaskGraph<K, V, E>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `token` before starting each node
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Number of declared nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was declared
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declare a node
    ///
    /// `body` is called once, after every predecessor completed.
    ///
    /// # Errors
    ///
    /// - [`GraphError::DuplicateNode`] if `key` was already declared
    /// - [`GraphError::UnknownPredecessor`] if a predecessor was not declared
    ///   earlier
    pub fn add_node<F, Fut>(&mut self, key: K, predecessors: &[K], body: F) -> Result<(), GraphError<K>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if self.nodes.iter().any(|node| node.key == key) {
            return Err(GraphError::DuplicateNode(key));
        }
        for predecessor in predecessors {
            if !self.nodes.iter().any(|node| &node.key == predecessor) {
                return Err(GraphError::UnknownPredecessor {
                    node: key,
                    predecessor: predecessor.clone(),
                });
            }
        }

        trace!("Declared node {:?} after {:?}", key, predecessors);
        self.nodes.push(NodeSpec {
            key,
            predecessors: predecessors.to_vec(),
            body: Box::new(move || body().boxed()),
        });
        Ok(())
    }

    /// Run every node and wait for all of them to finish
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run(self) -> GraphReport<K, V, E> {
        let mut shared: HashMap<K, SharedOutcome<K, V, E>> = HashMap::with_capacity(self.nodes.len());
        let mut handles = Vec::with_capacity(self.nodes.len());

        for spec in self.nodes {
            let predecessors: Vec<(K, SharedOutcome<K, V, E>)> = spec
                .predecessors
                .iter()
                .filter_map(|p| shared.get(p).map(|fut| (p.clone(), fut.clone())))
                .collect();
            let cancel = self.cancel.clone();
            let key = spec.key.clone();
            let body = spec.body;

            let node = async move {
                for (predecessor, outcome) in predecessors {
                    match outcome.await {
                        NodeOutcome::Completed(_) => {}
                        NodeOutcome::Cancelled => return NodeOutcome::Cancelled,
                        _ => {
                            debug!("Skipping {:?}: {:?} did not complete", key, predecessor);
                            return NodeOutcome::Skipped { blocked_by: predecessor };
                        }
                    }
                }
                if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    debug!("Not starting {:?}: cancelled", key);
                    return NodeOutcome::Cancelled;
                }

                trace!("Starting {:?}", key);
                match AssertUnwindSafe(body()).catch_unwind().await {
                    Ok(Ok(value)) => NodeOutcome::Completed(value),
                    Ok(Err(err)) => NodeOutcome::Failed(err),
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!("Node {:?} panicked: {}", key, message);
                        NodeOutcome::Panicked(message)
                    }
                }
            }
            .boxed()
            .shared();

            shared.insert(spec.key.clone(), node.clone());
            handles.push((spec.key, tokio::spawn(node)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => NodeOutcome::Panicked(e.to_string()),
            };
            debug!("Node {:?} {}", key, outcome.label());
            outcomes.push((key, outcome));
        }
        GraphReport { outcomes }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcomes of a finished graph, in declaration order
#[derive(Debug, Clone)]
pub struct GraphReport<K, V, E> {
    outcomes: Vec<(K, NodeOutcome<K, V, E>)>,
}

impl<K: PartialEq, V, E> GraphReport<K, V, E> {
    /// Every outcome in declaration order
    pub fn outcomes(&self) -> &[(K, NodeOutcome<K, V, E>)] {
        &self.outcomes
    }

    /// Outcome of one node
    pub fn outcome(&self, key: &K) -> Option<&NodeOutcome<K, V, E>> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    /// Value of a completed node
    pub fn value(&self, key: &K) -> Option<&V> {
        match self.outcome(key)? {
            NodeOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Errors of failed nodes in declaration order
    pub fn failures(&self) -> Vec<(&K, &E)> {
        self.outcomes
            .iter()
            .filter_map(|(k, o)| match o {
                NodeOutcome::Failed(e) => Some((k, e)),
                _ => None,
            })
            .collect()
    }

    /// First failed node in declaration order
    pub fn first_failure(&self) -> Option<(&K, &E)> {
        self.failures().into_iter().next()
    }

    /// Nodes that panicked, with their messages
    pub fn panics(&self) -> Vec<(&K, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(k, o)| match o {
                NodeOutcome::Panicked(message) => Some((k, message.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Whether any node was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| matches!(o, NodeOutcome::Cancelled))
    }

    /// Whether every node completed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_completed())
    }
}
