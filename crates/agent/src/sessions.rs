use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

use cloudpilot_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use cloudpilot_core::domain::instance::InstanceId;
use cloudpilot_core::domain::provisioning::{
    FollowUpQuestion, ProvisioningSession, ProvisioningSpec, Slot, SlotOutcome,
};
use cloudpilot_gateway::{launch_failure_text, ProviderError, ResourceGateway};

use crate::conversation::FragmentExtractor;

/// Per-user provisioning sessions.
///
/// The outer lock only guards the map; each user's session sits behind its
/// own mutex so one user's read-modify-write never blocks another user.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ProvisioningSession>>>>,
}

impl SessionStore {
    pub async fn entry(&self, user_id: &str) -> Arc<Mutex<ProvisioningSession>> {
        if let Some(existing) = self.sessions.read().await.get(user_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(user_id.to_string()).or_default().clone()
    }

    pub async fn snapshot(&self, user_id: &str) -> Option<ProvisioningSession> {
        let entry = self.sessions.read().await.get(user_id).cloned()?;
        let session = entry.lock().await;
        Some(session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops sessions untouched for longer than `max_idle`. Sessions that are
    /// locked or referenced by an in-flight request are kept.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            match entry.try_lock() {
                Ok(session) => {
                    let idle = now.signed_duration_since(session.updated_at()).to_std();
                    idle.unwrap_or_default() <= max_idle
                }
                Err(_) => true,
            }
        });
        before - sessions.len()
    }
}

/// What one provisioning message led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    FollowUp(FollowUpQuestion),
    Launched { instance_id: InstanceId, confirmation: String },
    /// The provider refused the launch; the session is untouched.
    Rejected { message: String },
    Unavailable { message: String, error: ProviderError },
}

pub struct SlotFillingSessionManager {
    store: Arc<SessionStore>,
    extractor: Arc<dyn FragmentExtractor>,
    audit: Arc<dyn AuditSink>,
}

impl SlotFillingSessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        extractor: Arc<dyn FragmentExtractor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, extractor, audit }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Folds `text` into the user's session and reports the next missing slot
    /// or the completed spec. Never clears the session.
    pub async fn advance(&self, user_id: &str, text: &str) -> SlotOutcome {
        let entry = self.store.entry(user_id).await;
        let mut session = entry.lock().await;
        self.fold(&mut session, text)
    }

    /// Runs `advance` and, once every slot is filled, submits the launch while
    /// still holding the user's lock. The session is cleared only after the
    /// provider confirms the launch.
    ///
    /// Launch and clear run on their own task that owns the lock, so dropping
    /// this future (a request timeout, for one) cannot leave a launched
    /// instance behind a still-full session.
    pub async fn provision(
        &self,
        user_id: &str,
        correlation_id: &str,
        text: &str,
        gateway: &ResourceGateway,
    ) -> ProvisionOutcome {
        let entry = self.store.entry(user_id).await;
        let mut session = entry.lock_owned().await;

        let spec = match self.fold(&mut session, text) {
            SlotOutcome::FollowUp(question) => return ProvisionOutcome::FollowUp(question),
            SlotOutcome::Ready(spec) => spec,
        };

        let commit = LaunchCommit {
            session,
            spec,
            gateway: gateway.clone(),
            audit: self.audit.clone(),
            context: AuditContext::new(user_id, correlation_id, "slot-filling"),
        };
        match tokio::spawn(commit.run()).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let error = ProviderError::Unavailable(format!("launch task failed: {error}"));
                ProvisionOutcome::Unavailable { message: launch_failure_text(&error), error }
            }
        }
    }

    fn fold(&self, session: &mut ProvisioningSession, text: &str) -> SlotOutcome {
        session.apply(&self.extractor.extract(text));
        if let Some(question) = session.next_follow_up() {
            return SlotOutcome::FollowUp(question);
        }
        match session.to_spec() {
            Ok(spec) => SlotOutcome::Ready(spec),
            Err(error) => {
                warn!(event_name = "provisioning.slot_invalid", error = %error, "dropping slot");
                session.forget(Slot::StorageSize);
                SlotOutcome::FollowUp(FollowUpQuestion::for_slot(Slot::StorageSize))
            }
        }
    }
}

struct LaunchCommit {
    session: OwnedMutexGuard<ProvisioningSession>,
    spec: ProvisioningSpec,
    gateway: ResourceGateway,
    audit: Arc<dyn AuditSink>,
    context: AuditContext,
}

impl LaunchCommit {
    async fn run(mut self) -> ProvisionOutcome {
        let AuditContext { user_id, correlation_id, .. } = self.context.clone();
        match self.gateway.launch(&self.spec).await {
            Ok((instance_id, confirmation)) => {
                self.session.clear();
                self.audit.emit(
                    AuditEvent::new(
                        &self.context,
                        "provisioning.committed",
                        AuditCategory::Provisioning,
                        AuditOutcome::Success,
                    )
                    .with_metadata("instance_id", instance_id.to_string())
                    .with_metadata("name", self.spec.display_name.clone()),
                );
                info!(
                    event_name = "provisioning.committed",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    instance_id = %instance_id,
                    "instance launched, session cleared"
                );
                ProvisionOutcome::Launched { instance_id, confirmation }
            }
            Err(error) => {
                let message = launch_failure_text(&error);
                let outcome = if error.is_unavailable() {
                    AuditOutcome::Failed
                } else {
                    AuditOutcome::Rejected
                };
                self.audit.emit(
                    AuditEvent::new(
                        &self.context,
                        "provisioning.launch_failed",
                        AuditCategory::Provisioning,
                        outcome,
                    )
                    .with_metadata("error", error.to_string()),
                );
                warn!(
                    event_name = "provisioning.launch_failed",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    error = %error,
                    "launch failed, session kept"
                );
                if error.is_unavailable() {
                    ProvisionOutcome::Unavailable { message, error }
                } else {
                    ProvisionOutcome::Rejected { message }
                }
            }
        }
    }
}
