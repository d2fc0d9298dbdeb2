//! Identity registry and referential-integrity checks.

use crate::record::ChangeRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vaultsync_protocol::{ChangePayload, EntityType};

/// Identity row for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    /// Project id.
    pub id: u64,
    /// Project name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Identity row for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIdentity {
    /// Dataset id.
    pub id: u64,
    /// Dataset name.
    pub name: String,
    /// Owning project.
    pub project_id: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Identity row for a git connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConnectionIdentity {
    /// Connection id.
    pub id: u64,
    /// Provider name, e.g. `github`.
    pub provider: String,
    /// Provider-side user id.
    pub provider_user_id: String,
    /// Provider-side email, if known.
    pub provider_email: Option<String>,
    /// Opaque credential token. Encryption at rest is the backend's
    /// concern, not this core's.
    pub token: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A change record that failed a referential-integrity check.
///
/// Violations are recorded and surfaced for manual reconciliation; the
/// offending record is never silently discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    /// Entity type of the offending record.
    pub entity_type: EntityType,
    /// Entity id of the offending record.
    pub entity_id: u64,
    /// Per-entity sequence of the offending record.
    pub sequence: u64,
    /// Human-readable description.
    pub reason: String,
    /// When the violation was detected.
    pub detected_at: DateTime<Utc>,
}

impl IntegrityViolation {
    fn new(record: &ChangeRecord, reason: impl Into<String>) -> Self {
        Self {
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            sequence: record.sequence,
            reason: reason.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Read-mostly registry of the identities change records reference.
///
/// The graph resolves `entityType`/`entityId` pairs so the log and the
/// reconciliation engine can validate records before folding, and checks
/// the Dataset→Project foreign reference. It is kept in step with folded
/// changes via [`ProjectGraph::apply_record`].
#[derive(Debug, Default)]
pub struct ProjectGraph {
    projects: RwLock<HashMap<u64, ProjectIdentity>>,
    datasets: RwLock<HashMap<u64, DatasetIdentity>>,
    git_connections: RwLock<HashMap<u64, GitConnectionIdentity>>,
    violations: RwLock<Vec<IntegrityViolation>>,
}

impl ProjectGraph {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project identity.
    pub fn register_project(&self, identity: ProjectIdentity) {
        self.projects.write().insert(identity.id, identity);
    }

    /// Registers a dataset identity.
    pub fn register_dataset(&self, identity: DatasetIdentity) {
        self.datasets.write().insert(identity.id, identity);
    }

    /// Registers a git connection identity.
    pub fn register_git_connection(&self, identity: GitConnectionIdentity) {
        self.git_connections.write().insert(identity.id, identity);
    }

    /// Removes a project identity.
    pub fn remove_project(&self, id: u64) {
        self.projects.write().remove(&id);
    }

    /// Removes a dataset identity.
    pub fn remove_dataset(&self, id: u64) {
        self.datasets.write().remove(&id);
    }

    /// Removes a git connection identity.
    pub fn remove_git_connection(&self, id: u64) {
        self.git_connections.write().remove(&id);
    }

    /// Returns the project identity, if registered.
    pub fn project(&self, id: u64) -> Option<ProjectIdentity> {
        self.projects.read().get(&id).cloned()
    }

    /// Returns the dataset identity, if registered.
    pub fn dataset(&self, id: u64) -> Option<DatasetIdentity> {
        self.datasets.read().get(&id).cloned()
    }

    /// Returns the git connection identity, if registered.
    pub fn git_connection(&self, id: u64) -> Option<GitConnectionIdentity> {
        self.git_connections.read().get(&id).cloned()
    }

    /// Returns true if an identity of the given type and id is registered.
    pub fn contains(&self, entity_type: EntityType, id: u64) -> bool {
        match entity_type {
            EntityType::Project => self.projects.read().contains_key(&id),
            EntityType::Dataset => self.datasets.read().contains_key(&id),
            EntityType::GitConnection => self.git_connections.read().contains_key(&id),
        }
    }

    /// Checks a record's references against the registry.
    ///
    /// - `Update`/`Delete` of an unregistered entity is flagged.
    /// - A dataset record whose `projectId` does not resolve to a live
    ///   project is flagged.
    ///
    /// The check never mutates the registry.
    pub fn check_reference(&self, record: &ChangeRecord) -> Result<(), IntegrityViolation> {
        match &record.payload {
            ChangePayload::Create { fields } => {
                if record.entity_type == EntityType::Dataset {
                    if let Some(project_id) = fields.get("projectId").and_then(|v| v.as_u64()) {
                        if !self.contains(EntityType::Project, project_id) {
                            return Err(IntegrityViolation::new(
                                record,
                                format!("dataset references missing project {project_id}"),
                            ));
                        }
                    }
                }
                Ok(())
            }
            ChangePayload::Update { fields } => {
                if !self.contains(record.entity_type, record.entity_id) {
                    return Err(IntegrityViolation::new(
                        record,
                        format!("update of unregistered {}", record.key()),
                    ));
                }
                if record.entity_type == EntityType::Dataset {
                    if let Some(project_id) = fields.get("projectId").and_then(|v| v.as_u64()) {
                        if !self.contains(EntityType::Project, project_id) {
                            return Err(IntegrityViolation::new(
                                record,
                                format!("dataset references missing project {project_id}"),
                            ));
                        }
                    }
                }
                Ok(())
            }
            ChangePayload::Delete => {
                if !self.contains(record.entity_type, record.entity_id) {
                    return Err(IntegrityViolation::new(
                        record,
                        format!("delete of unregistered {}", record.key()),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Keeps the registry in step with a folded record: `Create` registers
    /// an identity from the payload fields, `Delete` removes it, `Update`
    /// refreshes the fields it mentions.
    pub fn apply_record(&self, record: &ChangeRecord) {
        match &record.payload {
            ChangePayload::Create { fields } => {
                let str_field =
                    |name: &str| fields.get(name).and_then(|v| v.as_str()).map(String::from);
                match record.entity_type {
                    EntityType::Project => self.register_project(ProjectIdentity {
                        id: record.entity_id,
                        name: str_field("name").unwrap_or_default(),
                        created_at: record.created_at,
                    }),
                    EntityType::Dataset => self.register_dataset(DatasetIdentity {
                        id: record.entity_id,
                        name: str_field("name").unwrap_or_default(),
                        project_id: fields
                            .get("projectId")
                            .and_then(|v| v.as_u64())
                            .unwrap_or_default(),
                        created_at: record.created_at,
                    }),
                    EntityType::GitConnection => {
                        self.register_git_connection(GitConnectionIdentity {
                            id: record.entity_id,
                            provider: str_field("provider").unwrap_or_default(),
                            provider_user_id: str_field("providerUserId").unwrap_or_default(),
                            provider_email: str_field("providerEmail"),
                            token: str_field("token"),
                            created_at: record.created_at,
                        })
                    }
                }
            }
            ChangePayload::Update { fields } => match record.entity_type {
                EntityType::Project => {
                    if let Some(identity) = self.projects.write().get_mut(&record.entity_id) {
                        if let Some(name) = fields.get("name").and_then(|v| v.as_str()) {
                            identity.name = name.to_string();
                        }
                    }
                }
                EntityType::Dataset => {
                    if let Some(identity) = self.datasets.write().get_mut(&record.entity_id) {
                        if let Some(name) = fields.get("name").and_then(|v| v.as_str()) {
                            identity.name = name.to_string();
                        }
                        if let Some(project_id) = fields.get("projectId").and_then(|v| v.as_u64()) {
                            identity.project_id = project_id;
                        }
                    }
                }
                EntityType::GitConnection => {
                    if let Some(identity) = self.git_connections.write().get_mut(&record.entity_id)
                    {
                        if let Some(email) = fields.get("providerEmail").and_then(|v| v.as_str()) {
                            identity.provider_email = Some(email.to_string());
                        }
                        if let Some(token) = fields.get("token").and_then(|v| v.as_str()) {
                            identity.token = Some(token.to_string());
                        }
                    }
                }
            },
            ChangePayload::Delete => match record.entity_type {
                EntityType::Project => self.remove_project(record.entity_id),
                EntityType::Dataset => self.remove_dataset(record.entity_id),
                EntityType::GitConnection => self.remove_git_connection(record.entity_id),
            },
        }
    }

    /// Records a detected violation for later reconciliation.
    ///
    /// Re-detecting the same coordinate (for example on every materialize
    /// over the offending record) does not duplicate the entry.
    pub fn record_violation(&self, violation: IntegrityViolation) {
        let mut violations = self.violations.write();
        if violations.iter().any(|v| {
            v.entity_type == violation.entity_type
                && v.entity_id == violation.entity_id
                && v.sequence == violation.sequence
        }) {
            return;
        }
        tracing::warn!(
            entity = %format!("{}/{}", violation.entity_type, violation.entity_id),
            sequence = violation.sequence,
            reason = %violation.reason,
            "integrity violation"
        );
        violations.push(violation);
    }

    /// Returns true if the coordinate was flagged when its record entered
    /// the log. Folds skip flagged records.
    pub fn is_flagged(&self, entity_type: EntityType, entity_id: u64, sequence: u64) -> bool {
        self.violations.read().iter().any(|v| {
            v.entity_type == entity_type && v.entity_id == entity_id && v.sequence == sequence
        })
    }

    /// All unresolved violations, oldest first.
    pub fn violations(&self) -> Vec<IntegrityViolation> {
        self.violations.read().clone()
    }

    /// Number of unresolved violations.
    pub fn violation_count(&self) -> usize {
        self.violations.read().len()
    }

    /// Clears violations after manual reconciliation.
    pub fn clear_violations(&self) {
        self.violations.write().clear();
    }
}
