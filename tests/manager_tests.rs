//! Lifecycle and replay integration tests for the agent manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use agent_mesh::{
    Agent, AgentContext, AgentKind, AgentManager, AgentMessage, AgentRegistry, AgentSpec,
    AgentState, AgentStatus, MeshConfig, MeshError, MessageBus, MessageHandler, MessagePayload,
    Result, COORDINATOR_ID,
};

/// Test double driven by its settings: `fail_init` and `fail_shutdown`
/// inject failures, and every shutdown call is appended to a shared log so
/// tests can assert ordering.
struct MockAgent {
    ctx: AgentContext,
    kind: AgentKind,
    log: Arc<Mutex<Vec<(String, Instant)>>>,
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.ctx.id
    }

    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn initialize(&self) -> Result<()> {
        if self.ctx.settings["fail_init"] == true {
            return Err(MeshError::Agent("injected init failure".into()));
        }
        self.ctx.bus.register_agent(&self.ctx.id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.log.lock().push((self.ctx.id.clone(), Instant::now()));
        if self.ctx.settings["fail_shutdown"] == true {
            return Err(MeshError::Agent("injected shutdown failure".into()));
        }
        self.ctx.bus.unregister_agent(&self.ctx.id);
        Ok(())
    }

    fn status(&self) -> AgentStatus {
        AgentStatus::new(AgentState::Running)
    }
}

fn mock_registry(log: Arc<Mutex<Vec<(String, Instant)>>>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for kind in [
        AgentKind::Coordinator,
        AgentKind::Validation,
        AgentKind::Compliance,
        AgentKind::DomainLead,
    ] {
        let log = log.clone();
        registry.register(kind, move |ctx| {
            Arc::new(MockAgent {
                ctx,
                kind,
                log: log.clone(),
            })
        });
    }
    registry
}

fn config_with(agents: &[(&str, AgentKind)]) -> MeshConfig {
    let mut config = MeshConfig::default();
    for (id, kind) in agents {
        config
            .manager
            .agents
            .insert(id.to_string(), AgentSpec::new(*kind));
    }
    config
}

struct Recorder {
    seen: Mutex<Vec<AgentMessage>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn event_names(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter_map(|m| match &m.payload {
                MessagePayload::Event { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MessageHandler for Recorder {
    fn handle<'a>(
        &'a self,
        message: &'a AgentMessage,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().push(message.clone());
            Ok(())
        })
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_initialize_starts_coordinator_and_configured_agents() {
        let bus = Arc::new(MessageBus::with_defaults());
        let config = config_with(&[
            ("validator", AgentKind::Validation),
            ("lead", AgentKind::DomainLead),
        ]);
        let manager = AgentManager::new(bus, AgentRegistry::with_builtins(), &config);

        manager.initialize().await.unwrap();

        assert!(manager.is_ready());
        assert_eq!(manager.agent_count(), 3);
        let reports = manager.agent_status();
        let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["lead", COORDINATOR_ID, "validator"]);
        let coordinator = reports
            .iter()
            .find(|r| r.id == COORDINATOR_ID)
            .expect("coordinator report");
        assert_eq!(coordinator.kind, AgentKind::Coordinator);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_skips_unconstructible_kind() {
        let bus = Arc::new(MessageBus::with_defaults());
        let mut config = config_with(&[("validator", AgentKind::Validation)]);
        config.manager.agents.insert(
            "oracle".into(),
            AgentSpec {
                kind: "quantum".into(),
                settings: json!({}),
            },
        );
        let manager = AgentManager::new(bus, AgentRegistry::with_builtins(), &config);

        manager.initialize().await.unwrap();

        assert!(manager.is_ready());
        assert_eq!(manager.agent_count(), 2, "oracle skipped, siblings start");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_failure_propagates_and_leaves_not_ready() {
        let bus = Arc::new(MessageBus::with_defaults());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut config = config_with(&[("healthy", AgentKind::Compliance)]);
        config.manager.agents.insert(
            "broken".into(),
            AgentSpec::new(AgentKind::Validation).with_settings(json!({"fail_init": true})),
        );
        let manager = AgentManager::new(bus, mock_registry(log), &config);

        let err = manager.initialize().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(!manager.is_ready());
        // The failed instance is removed; the coordinator and any sibling
        // that came up stay tracked.
        assert!(manager
            .agent_status()
            .iter()
            .all(|report| report.id != "broken"));
    }

    #[tokio::test]
    async fn test_start_agent_is_idempotent() {
        let bus = Arc::new(MessageBus::with_defaults());
        let manager = AgentManager::new(
            bus.clone(),
            AgentRegistry::with_builtins(),
            &MeshConfig::default(),
        );
        manager.initialize().await.unwrap();

        let recorder = Recorder::new();
        bus.subscribe_to_agent(COORDINATOR_ID, recorder.clone());

        let first = manager
            .start_agent("validator", AgentKind::Validation, json!({}))
            .await
            .expect("first start");
        let second = manager
            .start_agent("validator", AgentKind::Validation, json!({}))
            .await
            .expect("second start");

        assert!(Arc::ptr_eq(&first, &second), "same live instance returned");
        assert_eq!(manager.agent_count(), 2);
        let started = recorder
            .event_names()
            .iter()
            .filter(|name| *name == "agentStarted")
            .count();
        assert_eq!(started, 1, "second start announces nothing");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_lifecycle_events_reach_coordinator() {
        let bus = Arc::new(MessageBus::with_defaults());
        let manager = AgentManager::new(
            bus.clone(),
            AgentRegistry::with_builtins(),
            &MeshConfig::default(),
        );
        manager.initialize().await.unwrap();

        let recorder = Recorder::new();
        bus.subscribe_to_agent(COORDINATOR_ID, recorder.clone());

        manager
            .start_agent("validator", AgentKind::Validation, json!({}))
            .await
            .expect("start");
        assert!(manager.stop_agent("validator").await);

        assert_eq!(
            recorder.event_names(),
            vec!["agentStarted", "agentStopping", "agentStopped"]
        );
        let seen = recorder.seen.lock();
        for message in seen.iter() {
            assert_eq!(message.source, "validator");
            if let MessagePayload::Event { data, .. } = &message.payload {
                assert_eq!(data["agentId"], "validator");
            }
        }
        drop(seen);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_agent_returns_false() {
        let bus = Arc::new(MessageBus::with_defaults());
        let manager = AgentManager::new(
            bus,
            AgentRegistry::with_builtins(),
            &MeshConfig::default(),
        );
        manager.initialize().await.unwrap();

        assert!(!manager.stop_agent("ghost").await);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_instance_for_retry() {
        let bus = Arc::new(MessageBus::with_defaults());
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = AgentManager::new(bus, mock_registry(log), &MeshConfig::default());
        manager.initialize().await.unwrap();

        manager
            .start_agent(
                "flaky",
                AgentKind::Validation,
                json!({"fail_shutdown": true}),
            )
            .await
            .expect("start");

        assert!(!manager.stop_agent("flaky").await);
        assert_eq!(manager.agent_count(), 2, "failed instance stays tracked");
    }
}

mod shutdown_order {
    use super::*;

    #[tokio::test]
    async fn test_coordinator_stops_last_even_when_a_peer_fails() {
        let bus = Arc::new(MessageBus::with_defaults());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut config = config_with(&[
            ("validator", AgentKind::Validation),
            ("lead", AgentKind::DomainLead),
        ]);
        config.manager.agents.insert(
            "flaky".into(),
            AgentSpec::new(AgentKind::Compliance).with_settings(json!({"fail_shutdown": true})),
        );
        let manager = AgentManager::new(bus, mock_registry(log.clone()), &config);
        manager.initialize().await.unwrap();
        assert_eq!(manager.agent_count(), 4);

        manager.shutdown().await;

        assert!(!manager.is_ready());
        let entries = log.lock().clone();
        assert_eq!(entries.len(), 4, "every agent's shutdown was attempted");
        let coordinator_at = entries
            .iter()
            .find(|(id, _)| id == COORDINATOR_ID)
            .map(|(_, at)| *at)
            .expect("coordinator shutdown logged");
        for (id, at) in &entries {
            if id != COORDINATOR_ID {
                assert!(*at <= coordinator_at, "{id} stopped before the coordinator");
            }
        }
        // The peer that failed its shutdown is still tracked for retry.
        assert_eq!(manager.agent_count(), 1);
        assert_eq!(manager.agent_status()[0].id, "flaky");
    }

    #[tokio::test]
    async fn test_shutdown_is_a_no_op_when_not_ready() {
        let bus = Arc::new(MessageBus::with_defaults());
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = AgentManager::new(
            bus,
            mock_registry(log.clone()),
            &MeshConfig::default(),
        );
        manager.initialize().await.unwrap();

        manager.shutdown().await;
        let after_first = log.lock().len();
        manager.shutdown().await;

        assert_eq!(log.lock().len(), after_first, "second call does nothing");
    }
}

mod replay {
    use super::*;

    fn command(source: &str, destination: &str, name: &str) -> AgentMessage {
        AgentMessage::new(
            source,
            destination,
            MessagePayload::Command {
                name: name.into(),
                args: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_tap_records_traffic_and_outcomes() {
        let bus = Arc::new(MessageBus::with_defaults());
        let config = config_with(&[("validator", AgentKind::Validation)]);
        let manager = AgentManager::new(bus.clone(), AgentRegistry::with_builtins(), &config);
        manager.initialize().await.unwrap();

        // Starting "validator" announced one lifecycle event to the
        // coordinator, which the tap retained.
        assert_eq!(manager.replay_buffer().len(), 1);

        bus.register_agent("tester");
        let reply = bus
            .send_with_response(command("tester", "validator", "lint"))
            .await
            .expect("service agents answer commands");
        assert!(matches!(reply.payload, MessagePayload::Response(ref body) if body.success));

        let stats = manager.replay_stats();
        assert_eq!(stats.size, 2, "command retained, response folded in");
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.priority_distribution.iter().sum::<usize>(), 2);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_tap_detaches_on_shutdown() {
        let bus = Arc::new(MessageBus::with_defaults());
        let manager = AgentManager::new(
            bus.clone(),
            AgentRegistry::with_builtins(),
            &MeshConfig::default(),
        );
        manager.initialize().await.unwrap();
        manager.shutdown().await;

        let settled = manager.replay_buffer().len();
        bus.register_agent("tester");
        bus.send_message(command("tester", "nowhere", "noop")).await;

        assert_eq!(
            manager.replay_buffer().len(),
            settled,
            "detached tap sees no further traffic"
        );
    }
}
