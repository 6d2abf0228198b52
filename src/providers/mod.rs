/// External collaborators consumed by the dashboards, behind fixed-method
/// interfaces.
///
/// Implementations are resolved once at construction time; nothing probes a
/// collaborator's capabilities per call. Deployments without a given
/// collaborator wire the no-op implementation.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity provider: resolves a role string for credentials.
///
/// Used only to gate dashboard pages; the data-access core never consults
/// it.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn role_for(&self, username: &str, password: &str) -> anyhow::Result<Option<String>>;
}

/// Default role provider for deployments without an identity backend.
pub struct NoopRoleProvider;

#[async_trait]
impl RoleProvider for NoopRoleProvider {
    async fn role_for(&self, _username: &str, _password: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// A commerce-platform order, read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceOrder {
    pub id: String,
    pub total: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Commerce platform: read-only order list for a subject.
#[async_trait]
pub trait OrderFeed: Send + Sync {
    async fn recent_orders(&self, subject: &str) -> anyhow::Result<Vec<CommerceOrder>>;
}

/// Default order feed for deployments without a commerce backend.
pub struct NoopOrderFeed;

#[async_trait]
impl OrderFeed for NoopOrderFeed {
    async fn recent_orders(&self, _subject: &str) -> anyhow::Result<Vec<CommerceOrder>> {
        Ok(Vec::new())
    }
}

/// The collaborator set handed to the composition root.
#[derive(Clone)]
pub struct Collaborators {
    pub roles: Arc<dyn RoleProvider>,
    pub orders: Arc<dyn OrderFeed>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            roles: Arc::new(NoopRoleProvider),
            orders: Arc::new(NoopOrderFeed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_collaborators_answer_with_absence() {
        let collaborators = Collaborators::default();
        assert!(collaborators
            .roles
            .role_for("user", "pass")
            .await
            .unwrap()
            .is_none());
        assert!(collaborators
            .orders
            .recent_orders("u1")
            .await
            .unwrap()
            .is_empty());
    }
}
