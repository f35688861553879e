//! In-memory repository implementations.
//!
//! Used by engine, dispatcher and status tests, and handy for embedding the
//! engine without a database. State lives behind `Arc<Mutex<..>>`, so clones
//! share the same store the way clones of a SQLite pool do.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use stepline_types::error::RepositoryError;
use stepline_types::user::{NewUser, User, UserUpdate};
use stepline_types::workflow::{InstanceStatus, StepRecord, WorkflowInstance};

use super::instance::{InstanceFilter, InstanceRepository};
use super::user::UserRepository;

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InstanceState {
    instances: HashMap<String, WorkflowInstance>,
    steps: HashMap<String, Vec<StepRecord>>,
}

/// In-memory `InstanceRepository`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInstanceRepository {
    state: Arc<Mutex<InstanceState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `RepositoryError::Connection`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }

    /// Run `f` against a live (non-terminal) instance.
    fn update_live<F>(&self, id: &str, f: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut InstanceState, DateTime<Utc>) -> Result<(), RepositoryError>,
    {
        self.check_available()?;
        let mut state = self.lock();
        let status = state
            .instances
            .get(id)
            .map(|i| i.status)
            .ok_or(RepositoryError::NotFound)?;
        if status.is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "instance {id} is {status}"
            )));
        }
        let now = Utc::now();
        f(&mut state, now)?;
        if let Some(instance) = state.instances.get_mut(id) {
            instance.updated_at = now;
        }
        Ok(())
    }
}

impl InstanceRepository for InMemoryInstanceRepository {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        state
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, RepositoryError> {
        self.check_available()?;
        Ok(self.lock().instances.get(id).cloned())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        self.check_available()?;
        let state = self.lock();
        let mut instances: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| {
                filter
                    .definition_type
                    .as_deref()
                    .is_none_or(|t| i.definition_type == t)
            })
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        instances.truncate(filter.limit as usize);
        Ok(instances)
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        self.check_available()?;
        let state = self.lock();
        let mut instances: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    async fn mark_running(&self, id: &str) -> Result<(), RepositoryError> {
        self.update_live(id, |state, _| {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.status = InstanceStatus::Running;
                instance.wake_at = None;
            }
            Ok(())
        })
    }

    async fn record_step(&self, id: &str, record: &StepRecord) -> Result<(), RepositoryError> {
        self.update_live(id, |state, _| {
            let steps = state.steps.entry(id.to_string()).or_default();
            if steps.iter().any(|s| s.step_name == record.step_name) {
                return Err(RepositoryError::Conflict(format!(
                    "step '{}' already recorded for instance {id}",
                    record.step_name
                )));
            }
            steps.push(record.clone());
            steps.sort_by_key(|s| s.step_index);

            if let Some(instance) = state.instances.get_mut(id) {
                instance.checkpoint = Some(record.to_checkpoint());
                instance.status = InstanceStatus::Running;
                instance.wake_at = None;
            }
            Ok(())
        })
    }

    async fn mark_sleeping(&self, id: &str, wake_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.update_live(id, |state, _| {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.status = InstanceStatus::Sleeping;
                instance.wake_at = Some(wake_at);
            }
            Ok(())
        })
    }

    async fn complete_instance(
        &self,
        id: &str,
        result: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        self.update_live(id, |state, now| {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.status = InstanceStatus::Completed;
                instance.result = Some(result.clone());
                instance.wake_at = None;
                instance.completed_at = Some(now);
            }
            Ok(())
        })
    }

    async fn fail_instance(&self, id: &str, error: &str) -> Result<(), RepositoryError> {
        self.update_live(id, |state, now| {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.status = InstanceStatus::Failed;
                instance.error = Some(error.to_string());
                instance.wake_at = None;
                instance.completed_at = Some(now);
            }
            Ok(())
        })
    }

    async fn list_step_records(&self, id: &str) -> Result<Vec<StepRecord>, RepositoryError> {
        self.check_available()?;
        Ok(self.lock().steps.get(id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct UserState {
    users: BTreeMap<i64, User>,
    next_id: i64,
}

/// In-memory `UserRepository`. IDs start at 1.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserRepository {
    state: Arc<Mutex<UserState>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UserState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl UserRepository for InMemoryUserRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<User, RepositoryError> {
        let mut state = self.lock();
        if let Some(email) = &update.email {
            if state.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(RepositoryError::Conflict(format!(
                    "email '{email}' already registered"
                )));
            }
        }
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        update.apply(user, Utc::now());
        Ok(user.clone())
    }

    async fn create_user(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.email == new_user.email) {
            return Err(RepositoryError::Conflict(format!(
                "email '{}' already registered",
                new_user.email
            )));
        }
        state.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: state.next_id,
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            email_verified: new_user.email_verified,
            role: new_user.role.clone(),
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(index: u32, name: &str) -> StepRecord {
        StepRecord {
            step_index: index,
            step_name: name.to_string(),
            result: json!({"step": name}),
            attempts: 1,
            completed_at: Utc::now(),
        }
    }

    async fn seeded(id: &str) -> InMemoryInstanceRepository {
        let repo = InMemoryInstanceRepository::new();
        repo.create_instance(&WorkflowInstance::queued(id.to_string(), "Test", json!({})))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn duplicate_instance_is_conflict() {
        let repo = seeded("wf-1").await;
        let err = repo
            .create_instance(&WorkflowInstance::queued("wf-1".into(), "Test", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn record_step_sets_checkpoint_and_running() {
        let repo = seeded("wf-1").await;
        repo.mark_sleeping("wf-1", Utc::now()).await.unwrap();
        repo.record_step("wf-1", &record(0, "nap")).await.unwrap();

        let instance = repo.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.wake_at.is_none());
        assert_eq!(instance.checkpoint.unwrap().step_name, "nap");

        let err = repo.record_step("wf-1", &record(0, "nap")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn terminal_instances_reject_writes() {
        let repo = seeded("wf-1").await;
        repo.complete_instance("wf-1", &json!({"ok": true})).await.unwrap();

        assert!(matches!(
            repo.fail_instance("wf-1", "late").await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            repo.mark_running("wf-1").await,
            Err(RepositoryError::Conflict(_))
        ));

        let instance = repo.get_instance("wf-1").await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.error.is_none());
        assert!(instance.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let repo = InMemoryInstanceRepository::new();
        assert!(matches!(
            repo.mark_running("missing").await,
            Err(RepositoryError::NotFound)
        ));
        assert!(repo.get_instance("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_unfinished_skips_terminal() {
        let repo = seeded("wf-1").await;
        repo.create_instance(&WorkflowInstance::queued("wf-2".into(), "Test", json!({})))
            .await
            .unwrap();
        repo.fail_instance("wf-2", "boom").await.unwrap();

        let unfinished = repo.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, "wf-1");

        let failed = repo
            .list_instances(&InstanceFilter {
                status: Some(InstanceStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "wf-2");
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_connection() {
        let repo = InMemoryInstanceRepository::new();
        repo.set_unavailable(true);
        let err = repo
            .create_instance(&WorkflowInstance::queued("wf-1".into(), "Test", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Connection));
    }

    #[tokio::test]
    async fn users_crud() {
        let repo = InMemoryUserRepository::new();
        let user = repo
            .create_user(&NewUser {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                email_verified: false,
                role: None,
            })
            .await
            .unwrap();
        assert_eq!(user.id, 1);

        let dup = repo
            .create_user(&NewUser {
                name: "Other".into(),
                email: "ada@example.com".into(),
                email_verified: false,
                role: None,
            })
            .await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));

        let updated = repo
            .update_user(
                1,
                &UserUpdate {
                    email_verified: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.email_verified);

        assert_eq!(repo.list_users(10, 0).await.unwrap().len(), 1);
        assert!(repo.list_users(10, 1).await.unwrap().is_empty());
        assert!(matches!(
            repo.update_user(42, &UserUpdate::default()).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
