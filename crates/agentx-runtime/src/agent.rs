//! One registered agent: its driver, engine, lifecycle and in-flight receive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agentx_bus::EventContext;
use agentx_core::Driver;
use agentx_engine::AgentEngine;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationRecord;
use crate::error::{Result, RuntimeError};
use crate::lifecycle::AgentLifecycle;

pub struct RuntimeAgent {
    id: String,
    record: ConversationRecord,
    context: EventContext,
    driver: Arc<dyn Driver>,
    engine: AgentEngine,
    lifecycle: Mutex<AgentLifecycle>,
    receiving: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl RuntimeAgent {
    pub(crate) fn new(
        id: String,
        record: ConversationRecord,
        context: EventContext,
        driver: Arc<dyn Driver>,
        engine: AgentEngine,
    ) -> Self {
        Self {
            id,
            record,
            context,
            driver,
            engine,
            lifecycle: Mutex::new(AgentLifecycle::Running),
            receiving: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record(&self) -> &ConversationRecord {
        &self.record
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn engine(&self) -> &AgentEngine {
        &self.engine
    }

    pub fn lifecycle(&self) -> AgentLifecycle {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::Acquire)
    }

    /// Move to `next`. Returns `Ok(false)` when already there.
    pub(crate) fn transition(&self, next: AgentLifecycle) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if *lifecycle == next {
            return Ok(false);
        }
        if !lifecycle.can_transition_to(next) {
            return Err(self.not_running(*lifecycle));
        }
        *lifecycle = next;
        Ok(true)
    }

    /// Claim the single in-flight receive slot.
    ///
    /// The returned guard releases the slot and drops the cancellation token
    /// however the receive ends.
    pub(crate) fn begin_receive(&self) -> Result<ReceiveGuard<'_>> {
        let lifecycle = self.lifecycle();
        if lifecycle != AgentLifecycle::Running {
            return Err(self.not_running(lifecycle));
        }
        if self
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::AlreadyProcessing(self.id.clone()));
        }
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(ReceiveGuard { agent: self, token })
    }

    /// Cancel the in-flight receive, if any. Returns whether one was running.
    pub(crate) fn cancel_receive(&self) -> bool {
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn not_running(&self, lifecycle: AgentLifecycle) -> RuntimeError {
        if lifecycle == AgentLifecycle::Destroyed {
            RuntimeError::Destroyed(self.id.clone())
        } else {
            RuntimeError::NotRunning {
                agent_id: self.id.clone(),
                lifecycle: lifecycle.to_string(),
            }
        }
    }
}

pub(crate) struct ReceiveGuard<'a> {
    agent: &'a RuntimeAgent,
    token: CancellationToken,
}

impl ReceiveGuard<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ReceiveGuard<'_> {
    fn drop(&mut self) {
        *self.agent.cancel.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.agent.receiving.store(false, Ordering::Release);
    }
}
