//! The bus envelope shared by every publisher and subscriber.

use agentx_core::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Key under which correlated requests and responses carry their id.
pub const REQUEST_ID_KEY: &str = "requestId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Agent,
    Driver,
    Runtime,
    Bus,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Stream,
    State,
    Message,
    Turn,
    Lifecycle,
    Command,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventIntent {
    Notification,
    Request,
    Result,
}

/// Correlation keys that let transports route per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub data: Value,
    pub source: EventSource,
    pub category: EventCategory,
    pub intent: EventIntent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl BusEvent {
    /// A new event. Category and intent are inferred from the name:
    /// `*_request` / `*_response` are commands, everything else a notification.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let event_type = event_type.into();
        let (category, intent) = if event_type.ends_with("_request") {
            (EventCategory::Command, EventIntent::Request)
        } else if event_type.ends_with("_response") {
            (EventCategory::Command, EventIntent::Result)
        } else {
            (EventCategory::Lifecycle, EventIntent::Notification)
        };
        let request_id = data
            .get(REQUEST_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            event_type,
            timestamp: now_millis(),
            data,
            source: EventSource::External,
            category,
            intent,
            context: None,
            request_id,
        }
    }

    /// Build the response to a correlated request, copying its id and context.
    ///
    /// Returns `None` when `request` is not a `*_request` event.
    pub fn response_to(request: &BusEvent, data: Value) -> Option<Self> {
        let response_type = response_type_for(&request.event_type)?;
        let request_id = request.correlation_id()?.to_string();
        let data = with_request_id(data, &request_id);
        let mut response = Self::new(response_type, data);
        response.context = request.context.clone();
        Some(response)
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_intent(mut self, intent: EventIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The correlation id embedded in `data`, falling back to the envelope.
    pub fn correlation_id(&self) -> Option<&str> {
        self.data
            .get(REQUEST_ID_KEY)
            .and_then(Value::as_str)
            .or(self.request_id.as_deref())
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.agent_id.as_deref())
    }
}

/// `<verb>_request` → `<verb>_response`.
pub fn response_type_for(request_type: &str) -> Option<String> {
    let verb = request_type.strip_suffix("_request")?;
    if verb.is_empty() {
        return None;
    }
    Some(format!("{verb}_response"))
}

/// Embed `request_id` in `data`, wrapping non-object payloads as
/// `{"payload": data}`.
pub(crate) fn with_request_id(data: Value, request_id: &str) -> Value {
    let mut object = match data {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".into(), other);
            map
        }
    };
    object.insert(REQUEST_ID_KEY.into(), json!(request_id));
    Value::Object(object)
}
