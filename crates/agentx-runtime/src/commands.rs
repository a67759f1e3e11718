//! Bus command handlers: answers `*_request` events addressed to the runtime.

use std::sync::{Arc, Weak};

use agentx_bus::{BusEvent, EventBus, EventSource, Unsubscribe};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::runtime::AgentRuntime;

pub const AGENT_LIST_REQUEST: &str = "agent_list_request";
pub const AGENT_INTERRUPT_REQUEST: &str = "agent_interrupt_request";

/// Subscribe the runtime's command handlers on its own bus.
///
/// Handlers hold weak references to the runtime and the bus, so they never
/// keep either alive and stop answering once the runtime is dropped.
/// Unsubscribe through the returned handles to detach earlier.
pub fn register_command_handlers(runtime: &Arc<AgentRuntime>) -> Vec<Unsubscribe> {
    let bus = runtime.bus();
    let weak = Arc::downgrade(runtime);

    let list = {
        let weak = weak.clone();
        let weak_bus = Arc::downgrade(bus);
        bus.on(AGENT_LIST_REQUEST, move |request| {
            let Some(runtime) = weak.upgrade() else {
                return Ok(());
            };
            let agents: Vec<Value> = runtime
                .agent_ids()
                .into_iter()
                .filter_map(|id| runtime.agent(&id).ok())
                .map(|agent| {
                    json!({
                        "agentId": agent.id(),
                        "imageId": agent.record().image_id,
                        "lifecycle": agent.lifecycle(),
                        "state": agent.engine().state(),
                        "receiving": agent.is_receiving(),
                    })
                })
                .collect();
            respond(&weak_bus, request, json!({ "agents": agents }));
            Ok(())
        })
    };

    let interrupt = {
        let weak_bus = Arc::downgrade(bus);
        bus.on(AGENT_INTERRUPT_REQUEST, move |request| {
            let agent_id = request
                .data
                .get("agentId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            spawn_interrupt(weak.clone(), weak_bus.clone(), request.clone(), agent_id);
            Ok(())
        })
    };

    vec![list, interrupt]
}

fn spawn_interrupt(
    runtime: Weak<AgentRuntime>,
    bus: Weak<EventBus>,
    request: BusEvent,
    agent_id: String,
) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(%agent_id, "No async runtime to handle interrupt request");
        respond(&bus, &request, json!({ "accepted": false }));
        return;
    };
    handle.spawn(async move {
        let accepted = match runtime.upgrade() {
            Some(runtime) => runtime.interrupt(&agent_id).await.unwrap_or_else(|e| {
                debug!(%agent_id, %e, "Interrupt request rejected");
                false
            }),
            None => false,
        };
        respond(&bus, &request, json!({ "accepted": accepted }));
    });
}

fn respond(bus: &Weak<EventBus>, request: &BusEvent, data: Value) {
    let Some(bus) = bus.upgrade() else {
        debug!(request_type = %request.event_type, "Event bus dropped, not answering");
        return;
    };
    match BusEvent::response_to(request, data) {
        Some(response) => bus.emit(response.with_source(EventSource::Runtime)),
        None => debug!(request_type = %request.event_type, "Request without requestId, not answering"),
    }
}
