use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Client, Resource};

use crate::config::OperatorConfig;
use crate::controller::validation::{ClusterLookup, KubeLookup};
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::health::HealthState;

/// Controller name reported on Events
pub const CONTROLLER_NAME: &str = "mysql-controller";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration, fixed at startup
    pub config: Arc<OperatorConfig>,
    /// Read-only lookups used by validation
    pub lookup: Arc<dyn ClusterLookup>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Metrics and readiness, absent in tests
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            lookup: Arc::new(KubeLookup::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
            client,
            config: Arc::new(config),
            health_state,
        }
    }

    /// Publish an Event about `obj`
    pub async fn publish<K>(&self, obj: &K, type_: EventType, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        let reference: ObjectReference = obj.object_ref(&());
        self.events
            .publish(&reference, type_, reason, action, Some(note))
            .await;
    }

    /// Publish a Warning Event about `obj`
    pub async fn warn<K>(&self, obj: &K, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.publish(obj, EventType::Warning, reason, action, note).await;
    }

    /// Publish a Normal Event about `obj`
    pub async fn normal<K>(&self, obj: &K, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.publish(obj, EventType::Normal, reason, action, note).await;
    }
}
