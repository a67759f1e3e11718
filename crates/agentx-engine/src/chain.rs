//! Ordered middleware (inbound user messages) and interceptor (outbound
//! outputs) chains.
//!
//! Each link sees the value the previous link produced. A `Stop` anywhere ends
//! the chain and the value is dropped without error.

use std::sync::{Arc, RwLock};

use agentx_core::message::UserMessage;
use agentx_core::output::AgentOutput;
use tracing::debug;

/// Result of one chain link.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStep<T> {
    /// Pass this (possibly rewritten) value to the next link.
    Continue(T),
    Stop,
}

pub type Link<T> = Arc<dyn Fn(T) -> ChainStep<T> + Send + Sync>;

/// Middleware over inbound user messages.
pub type Middleware = Link<UserMessage>;

/// Interceptor over engine outputs.
pub type Interceptor = Link<AgentOutput>;

pub struct Chain<T> {
    kind: &'static str,
    links: RwLock<Vec<(String, Link<T>)>>,
}

impl<T> Chain<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            links: RwLock::new(Vec::new()),
        }
    }

    pub fn push(
        &self,
        name: impl Into<String>,
        link: impl Fn(T) -> ChainStep<T> + Send + Sync + 'static,
    ) {
        self.links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.into(), Arc::new(link)));
    }

    /// Run `value` through every link in registration order.
    ///
    /// Returns `None` when a link stopped the chain.
    pub fn run(&self, value: T) -> Option<T> {
        let links: Vec<(String, Link<T>)> = self
            .links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut current = value;
        for (name, link) in links {
            match link(current) {
                ChainStep::Continue(next) => current = next,
                ChainStep::Stop => {
                    debug!(chain = self.kind, link = %name, "Chain stopped");
                    return None;
                }
            }
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.links.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
