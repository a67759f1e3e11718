use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentx_bus::{BusEvent, EventBus, EventCategory};
use agentx_core::session_store::JsonlSessionRepository;
use agentx_core::{
    Driver, DriverConfig, DriverFactory, InMemorySessionRepository, Message,
    SessionRepository, StopReason, StreamEvent, StreamEventStream, UserMessage,
};
use agentx_engine::{AgentState, ChainStep};
use agentx_runtime::{
    AgentLifecycle, AgentRuntime, ConversationRecord, InMemoryConversationRepository,
    RuntimeError, register_command_handlers,
};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct DriverStats {
    receives: AtomicUsize,
    interrupts: AtomicUsize,
    disposed: AtomicBool,
}

#[derive(Clone)]
enum Step {
    Event(StreamEvent),
    Fail(&'static str),
}

/// Replays the same script for every user message.
struct ScriptedDriver {
    steps: Vec<Step>,
    stats: Arc<DriverStats>,
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn receive(
        &self,
        _message: &UserMessage,
        _cancel: CancellationToken,
    ) -> anyhow::Result<StreamEventStream> {
        self.stats.receives.fetch_add(1, Ordering::SeqCst);
        let items: Vec<anyhow::Result<StreamEvent>> = self
            .steps
            .iter()
            .cloned()
            .map(|step| match step {
                Step::Event(event) => Ok(event),
                Step::Fail(reason) => Err(anyhow::anyhow!(reason)),
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn interrupt(&self) {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.stats.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Streams whatever the test pushes into the channel until the sender drops.
struct ChannelDriver {
    rx: Mutex<Option<mpsc::UnboundedReceiver<StreamEvent>>>,
    stats: Arc<DriverStats>,
}

#[async_trait]
impl Driver for ChannelDriver {
    fn name(&self) -> &str {
        "channel"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn receive(
        &self,
        _message: &UserMessage,
        _cancel: CancellationToken,
    ) -> anyhow::Result<StreamEventStream> {
        self.stats.receives.fetch_add(1, Ordering::SeqCst);
        let rx = self.rx.lock().unwrap().take();
        let stream = futures::stream::unfold(rx, |rx| async move {
            let mut rx = rx?;
            let event = rx.recv().await?;
            Some((Ok::<_, anyhow::Error>(event), Some(rx)))
        });
        Ok(Box::pin(stream))
    }

    fn interrupt(&self) {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.stats.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct SharedDriverFactory(Arc<dyn Driver>);

#[async_trait]
impl DriverFactory for SharedDriverFactory {
    async fn create(&self, _config: &DriverConfig) -> anyhow::Result<Arc<dyn Driver>> {
        Ok(self.0.clone())
    }
}

struct Harness {
    runtime: Arc<AgentRuntime>,
    bus: Arc<EventBus>,
    sessions: Arc<dyn SessionRepository>,
    events: Arc<Mutex<Vec<BusEvent>>>,
}

impl Harness {
    async fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_sessions(driver, Arc::new(InMemorySessionRepository::new())).await
    }

    async fn with_sessions(driver: Arc<dyn Driver>, sessions: Arc<dyn SessionRepository>) -> Self {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        bus.on_any(move |e| {
            events_clone.lock().unwrap().push(e.clone());
            Ok(())
        });

        let conversations = Arc::new(InMemoryConversationRepository::new());
        conversations
            .insert(ConversationRecord::new("img-1", "ctr-1", "sess-1").with_model("test-model"))
            .await;

        let runtime = Arc::new(AgentRuntime::new(
            bus.clone(),
            sessions.clone(),
            conversations,
            Arc::new(SharedDriverFactory(driver)),
            Default::default(),
        ));
        Self {
            runtime,
            bus,
            sessions,
            events,
        }
    }

    fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    fn find(&self, event_type: &str) -> Vec<BusEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

fn hello_world() -> Vec<Step> {
    vec![
        Step::Event(StreamEvent::message_start("msg-1")),
        Step::Event(StreamEvent::text_delta("Hello")),
        Step::Event(StreamEvent::text_delta(" World")),
        Step::Event(StreamEvent::message_stop(StopReason::EndTurn)),
    ]
}

fn scripted(steps: Vec<Step>) -> (Arc<dyn Driver>, Arc<DriverStats>) {
    let stats = Arc::new(DriverStats::default());
    let driver = Arc::new(ScriptedDriver {
        steps,
        stats: stats.clone(),
    });
    (driver, stats)
}

fn channel() -> (Arc<dyn Driver>, Arc<DriverStats>, mpsc::UnboundedSender<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(DriverStats::default());
    let driver = Arc::new(ChannelDriver {
        rx: Mutex::new(Some(rx)),
        stats: stats.clone(),
    });
    (driver, stats, tx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_hello_world_end_to_end() {
    let (driver, stats) = scripted(hello_world());
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();
    assert_eq!(h.count("agent_created"), 1);

    let messages = h.runtime.receive(&agent_id, "Hi").await.unwrap();
    assert_eq!(stats.receives.load(Ordering::SeqCst), 1);

    match messages.as_slice() {
        [Message::Assistant(m)] => {
            assert_eq!(m.id, "msg-1");
            assert_eq!(m.text(), "Hello World");
        }
        other => panic!("unexpected messages {other:?}"),
    }

    assert_eq!(h.count("user_message"), 1);
    assert_eq!(h.count("text_delta"), 2);
    assert_eq!(h.count("assistant_message"), 1);
    assert_eq!(h.count("turn_request"), 1);
    assert_eq!(h.count("turn_response"), 1);
    let response = &h.find("turn_response")[0];
    assert!(response.data["duration_ms"].as_i64().unwrap() >= 0);
    assert_eq!(response.category, EventCategory::Turn);

    for event in h.find("assistant_message") {
        let context = event.context.unwrap();
        assert_eq!(context.agent_id.as_deref(), Some(agent_id.as_str()));
        assert_eq!(context.image_id.as_deref(), Some("img-1"));
        assert_eq!(context.container_id.as_deref(), Some("ctr-1"));
        assert_eq!(context.session_id.as_deref(), Some("sess-1"));
    }

    let stored = h.runtime.get_messages(&agent_id).await.unwrap();
    let subtypes: Vec<_> = stored.iter().map(Message::subtype).collect();
    assert_eq!(subtypes, vec!["user", "assistant"]);

    let agent = h.runtime.agent(&agent_id).unwrap();
    assert_eq!(agent.engine().state(), AgentState::Idle);
    assert!(!agent.is_receiving());
}

#[tokio::test]
async fn test_second_receive_is_rejected_while_first_runs() {
    let (driver, stats, tx) = channel();
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();

    let first = {
        let runtime = h.runtime.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move { runtime.receive(&agent_id, "first").await })
    };
    wait_until(|| stats.receives.load(Ordering::SeqCst) == 1).await;

    let second = h.runtime.receive(&agent_id, "second").await;
    match second {
        Err(e @ RuntimeError::AlreadyProcessing(_)) => {
            assert!(e.to_string().contains("already processing"));
        }
        other => panic!("expected AlreadyProcessing, got {other:?}"),
    }
    assert_eq!(stats.receives.load(Ordering::SeqCst), 1);

    tx.send(StreamEvent::message_start("m1")).unwrap();
    tx.send(StreamEvent::text_delta("still fine")).unwrap();
    tx.send(StreamEvent::message_stop(StopReason::EndTurn)).unwrap();
    drop(tx);

    let messages = first.await.unwrap().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(h.count("assistant_message"), 1);
    assert_eq!(h.count("user_message"), 1);

    // The slot is free again.
    assert!(h.runtime.receive(&agent_id, "third").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_driver_failure_is_published_and_returned() {
    let (driver, _) = scripted(vec![
        Step::Event(StreamEvent::message_start("m1")),
        Step::Event(StreamEvent::text_delta("par")),
        Step::Fail("connection reset"),
        Step::Event(StreamEvent::text_delta("never seen")),
    ]);
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();

    let err = h.runtime.receive(&agent_id, "Hi").await.unwrap_err();
    assert!(matches!(err, RuntimeError::Driver(_)));
    assert!(err.to_string().contains("connection reset"));

    assert_eq!(h.count("text_delta"), 1);
    let errors = h.find("error_received");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["error_code"], "driver_error");
    assert_eq!(h.count("error_message"), 1);
    assert_eq!(h.count("assistant_message"), 0);

    let stored = h.runtime.get_messages(&agent_id).await.unwrap();
    assert!(matches!(stored.last(), Some(Message::Error(_))));

    let agent = h.runtime.agent(&agent_id).unwrap();
    assert_eq!(agent.engine().state(), AgentState::Error);
    assert!(!agent.is_receiving());
}

#[tokio::test]
async fn test_interrupt_mid_message() {
    let (driver, stats, tx) = channel();
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();
    let agent = h.runtime.agent(&agent_id).unwrap();

    assert!(!h.runtime.interrupt(&agent_id).await.unwrap());

    let pump = {
        let runtime = h.runtime.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move { runtime.receive(&agent_id, "long answer please").await })
    };
    tx.send(StreamEvent::message_start("m1")).unwrap();
    tx.send(StreamEvent::text_delta("Once upon")).unwrap();
    wait_until(|| agent.engine().has_pending_message() && h.count("text_delta") == 1).await;

    assert!(h.runtime.interrupt(&agent_id).await.unwrap());
    assert_eq!(stats.interrupts.load(Ordering::SeqCst), 1);
    assert_eq!(h.count("conversation_interrupted"), 1);
    assert_eq!(h.count("agent_interrupted"), 1);
    drop(tx);

    let messages = pump.await.unwrap().unwrap();
    match messages.as_slice() {
        [Message::Error(e)] => assert_eq!(e.error_code.as_deref(), Some("interrupted")),
        other => panic!("unexpected messages {other:?}"),
    }
    assert!(!agent.engine().has_pending_message());
    assert_eq!(agent.engine().state(), AgentState::Idle);
}

#[tokio::test]
async fn test_lifecycle_operations() {
    let (driver, stats) = scripted(hello_world());
    let h = Harness::new(driver).await;

    let missing = h.runtime.create_agent("nope").await.unwrap_err();
    assert!(matches!(missing, RuntimeError::ConversationNotFound(_)));

    let agent_id = h.runtime.create_agent("img-1").await.unwrap();
    assert_eq!(h.runtime.agent_ids(), vec![agent_id.clone()]);
    assert_eq!(h.runtime.lifecycle(&agent_id).unwrap(), AgentLifecycle::Running);

    h.runtime.stop_agent(&agent_id).await.unwrap();
    assert_eq!(h.runtime.lifecycle(&agent_id).unwrap(), AgentLifecycle::Stopped);
    assert!(matches!(
        h.runtime.receive(&agent_id, "Hi").await,
        Err(RuntimeError::NotRunning { .. })
    ));
    assert_eq!(stats.receives.load(Ordering::SeqCst), 0);

    h.runtime.resume_agent(&agent_id).unwrap();
    assert_eq!(h.runtime.receive(&agent_id, "Hi").await.unwrap().len(), 1);

    h.runtime.destroy_agent(&agent_id).await.unwrap();
    assert!(stats.disposed.load(Ordering::SeqCst));
    assert!(h.runtime.agent_ids().is_empty());
    assert!(matches!(
        h.runtime.receive(&agent_id, "Hi").await,
        Err(RuntimeError::AgentNotFound(_))
    ));
    assert!(matches!(
        h.runtime.destroy_agent(&agent_id).await,
        Err(RuntimeError::AgentNotFound(_))
    ));

    for event_type in ["agent_created", "agent_stopped", "agent_resumed", "agent_destroyed"] {
        assert_eq!(h.count(event_type), 1, "{event_type}");
    }
    let destroyed = &h.find("agent_destroyed")[0];
    assert_eq!(destroyed.data["lifecycle"], "destroyed");
    assert_eq!(destroyed.category, EventCategory::Lifecycle);
}

#[tokio::test]
async fn test_command_handlers_answer_requests() {
    let (driver, _) = scripted(hello_world());
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();
    let handles = register_command_handlers(&h.runtime);

    let list = h
        .bus
        .request_with_timeout("agent_list_request", json!({}), Duration::from_secs(1))
        .await
        .unwrap();
    let agents = list.data["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agentId"], agent_id.as_str());
    assert_eq!(agents[0]["lifecycle"], "running");
    assert_eq!(agents[0]["state"], "idle");

    let interrupt = h
        .bus
        .request_with_timeout(
            "agent_interrupt_request",
            json!({ "agentId": agent_id }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(interrupt.data["accepted"], false);

    for handle in &handles {
        handle.unsubscribe();
    }
    let err = h
        .bus
        .request_with_timeout("agent_list_request", json!({}), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_command_handlers_do_not_keep_bus_alive() {
    let (driver, _) = scripted(hello_world());
    let h = Harness::new(driver).await;
    let _handles = register_command_handlers(&h.runtime);

    // Subscriptions are freed together with the bus that owns them.
    let held = Arc::new(());
    let marker = Arc::downgrade(&held);
    h.bus.on("noop", move |_| {
        assert!(Arc::strong_count(&held) > 0);
        Ok(())
    });
    assert!(marker.upgrade().is_some());

    drop(h);
    assert!(marker.upgrade().is_none());
}

#[tokio::test]
async fn test_middleware_veto_skips_driver() {
    let (driver, stats) = scripted(hello_world());
    let h = Harness::new(driver).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();
    h.runtime
        .agent(&agent_id)
        .unwrap()
        .engine()
        .use_middleware("no-shouting", |m: UserMessage| {
            if m.content.chars().any(char::is_lowercase) {
                ChainStep::Continue(m)
            } else {
                ChainStep::Stop
            }
        });

    assert!(h.runtime.receive(&agent_id, "HELLO").await.unwrap().is_empty());
    assert_eq!(stats.receives.load(Ordering::SeqCst), 0);
    assert_eq!(h.count("user_message"), 0);
    assert!(!h.runtime.agent(&agent_id).unwrap().is_receiving());

    assert_eq!(h.runtime.receive(&agent_id, "hello").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_messages_persist_to_jsonl_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, _) = scripted(hello_world());
    let sessions: Arc<dyn SessionRepository> =
        Arc::new(JsonlSessionRepository::new(dir.path().to_path_buf()));
    let h = Harness::with_sessions(driver, sessions).await;
    let agent_id = h.runtime.create_agent("img-1").await.unwrap();

    h.runtime.receive(&agent_id, "Hi").await.unwrap();
    h.runtime.receive(&agent_id, "Again").await.unwrap();

    let stored = h.sessions.get_messages("sess-1").await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(dir.path().join("sess-1.jsonl").exists());
}
