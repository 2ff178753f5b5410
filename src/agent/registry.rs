//! Closed set of agent kinds and the constructor registry keyed by them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::coordinator::CoordinatorAgent;
use super::core::{Agent, AgentContext};
use super::service::ServiceAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coordinator,
    Validation,
    Compliance,
    DomainLead,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Validation => "validation",
            Self::Compliance => "compliance",
            Self::DomainLead => "domain_lead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coordinator" => Some(Self::Coordinator),
            "validation" => Some(Self::Validation),
            "compliance" => Some(Self::Compliance),
            "domain_lead" => Some(Self::DomainLead),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type AgentCtor = Box<dyn Fn(AgentContext) -> Arc<dyn Agent> + Send + Sync>;

/// Constructor table mapping each kind to its implementation.
///
/// [`with_builtins`](Self::with_builtins) wires the closed kind set;
/// [`register`](Self::register) replaces a constructor, which is how tests
/// inject mocks.
#[derive(Default)]
pub struct AgentRegistry {
    ctors: HashMap<AgentKind, AgentCtor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AgentKind::Coordinator, |ctx| {
            Arc::new(CoordinatorAgent::new(ctx))
        });
        registry.register(AgentKind::Validation, |ctx| {
            Arc::new(ServiceAgent::new(AgentKind::Validation, ctx))
        });
        registry.register(AgentKind::Compliance, |ctx| {
            Arc::new(ServiceAgent::new(AgentKind::Compliance, ctx))
        });
        registry.register(AgentKind::DomainLead, |ctx| {
            Arc::new(ServiceAgent::new(AgentKind::DomainLead, ctx))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: AgentKind, ctor: F)
    where
        F: Fn(AgentContext) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        self.ctors.insert(kind, Box::new(ctor));
    }

    pub fn build(&self, kind: AgentKind, ctx: AgentContext) -> Option<Arc<dyn Agent>> {
        self.ctors.get(&kind).map(|ctor| ctor(ctx))
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.ctors.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        self.ctors.keys().copied().collect()
    }
}
