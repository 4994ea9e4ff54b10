//! In-memory portfolio projects with audited mutations.
//!
//! [`ProjectRepository`] holds the rows and doubles as the audit pipeline's
//! prior-state reader. [`ProjectService`] wraps every mutation in the
//! [`AuditInterceptor`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use vitrine_audit::{
    Arguments, AuditAction, AuditError, AuditInterceptor, Audited, EntityStateReader, StateMap,
};

/// Entity type recorded in audit events.
pub const PROJECT_ENTITY: &str = "Project";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub published: bool,
}

/// Body of create and update requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInput {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project {0} not found")]
    NotFound(u64),

    #[error("project title must not be empty")]
    EmptyTitle,
}

#[derive(Default)]
pub struct ProjectRepository {
    rows: RwLock<BTreeMap<u64, Project>>,
    next_id: AtomicU64,
}

impl ProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<Project> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Project> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn insert(&self, input: ProjectInput) -> Result<Project, ProjectError> {
        validate(&input)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let project = Project {
            id,
            title: input.title,
            summary: input.summary,
            tags: input.tags,
            published: false,
        };
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, project.clone());
        Ok(project)
    }

    fn modify(
        &self,
        id: u64,
        change: impl FnOnce(&mut Project),
    ) -> Result<Project, ProjectError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let project = rows.get_mut(&id).ok_or(ProjectError::NotFound(id))?;
        change(project);
        Ok(project.clone())
    }

    fn remove(&self, id: u64) -> Result<Project, ProjectError> {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .ok_or(ProjectError::NotFound(id))
    }
}

fn validate(input: &ProjectInput) -> Result<(), ProjectError> {
    if input.title.trim().is_empty() {
        return Err(ProjectError::EmptyTitle);
    }
    Ok(())
}

#[async_trait]
impl EntityStateReader for ProjectRepository {
    async fn read_entity_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StateMap>, AuditError> {
        if entity_type != PROJECT_ENTITY {
            return Err(AuditError::StateLookup {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                reason: format!("repository only holds {PROJECT_ENTITY} rows"),
            });
        }
        let Ok(id) = entity_id.parse::<u64>() else {
            return Ok(None);
        };
        let Some(project) = self.get(id) else {
            return Ok(None);
        };
        let state = serde_json::to_value(project).map_err(|e| AuditError::StateLookup {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(state.as_object().cloned())
    }
}

/// Audit descriptors, parsed once at startup.
struct AuditedOps {
    create: Audited,
    update: Audited,
    delete: Audited,
    publish: Audited,
    unpublish: Audited,
}

impl AuditedOps {
    fn new() -> Result<Self, AuditError> {
        let transition = |action: AuditAction| -> Result<Audited, AuditError> {
            Ok(Audited::new(action, PROJECT_ENTITY)
                .entity_id_path("#id")?
                .entity_name_path("#result.title")?
                .capture_prior_state())
        };

        Ok(Self {
            create: Audited::new(AuditAction::Create, PROJECT_ENTITY)
                .entity_id_path("#result.id")?
                .entity_name_path("#request.title")?,
            update: transition(AuditAction::Update)?,
            delete: transition(AuditAction::Delete)?,
            publish: transition(AuditAction::Publish)?,
            unpublish: transition(AuditAction::Unpublish)?,
        })
    }
}

pub struct ProjectService {
    repo: Arc<ProjectRepository>,
    audit: AuditInterceptor,
    ops: AuditedOps,
}

impl ProjectService {
    pub fn new(
        repo: Arc<ProjectRepository>,
        audit: AuditInterceptor,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            repo,
            audit,
            ops: AuditedOps::new()?,
        })
    }

    pub fn get(&self, id: u64) -> Result<Project, ProjectError> {
        self.repo.get(id).ok_or(ProjectError::NotFound(id))
    }

    pub fn list(&self) -> Vec<Project> {
        self.repo.list()
    }

    pub async fn create(&self, input: ProjectInput) -> Result<Project, ProjectError> {
        let args = Arguments::new().with("request", &input);
        let repo = self.repo.as_ref();
        self.audit
            .intercept(&self.ops.create, &args, move || async move { repo.insert(input) })
            .await
    }

    pub async fn update(&self, id: u64, input: ProjectInput) -> Result<Project, ProjectError> {
        let args = Arguments::new().with("id", id).with("request", &input);
        let repo = self.repo.as_ref();
        self.audit
            .intercept(&self.ops.update, &args, move || async move {
                validate(&input)?;
                repo.modify(id, |project| {
                    project.title = input.title;
                    project.summary = input.summary;
                    project.tags = input.tags;
                })
            })
            .await
    }

    pub async fn delete(&self, id: u64) -> Result<Project, ProjectError> {
        let args = Arguments::new().with("id", id);
        let repo = self.repo.as_ref();
        self.audit
            .intercept(&self.ops.delete, &args, move || async move { repo.remove(id) })
            .await
    }

    pub async fn publish(&self, id: u64) -> Result<Project, ProjectError> {
        self.set_published(id, true).await
    }

    pub async fn unpublish(&self, id: u64) -> Result<Project, ProjectError> {
        self.set_published(id, false).await
    }

    async fn set_published(&self, id: u64, published: bool) -> Result<Project, ProjectError> {
        let op = if published {
            &self.ops.publish
        } else {
            &self.ops.unpublish
        };
        let args = Arguments::new().with("id", id);
        let repo = self.repo.as_ref();
        self.audit
            .intercept(op, &args, move || async move {
                repo.modify(id, |project| project.published = published)
            })
            .await
    }
}
