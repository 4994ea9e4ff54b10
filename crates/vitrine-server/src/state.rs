//! Shared application state.

use crate::projects::{ProjectRepository, ProjectService};
use std::sync::Arc;
use vitrine_audit::{AuditError, AuditPipeline};
use vitrine_core::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    server: ServerConfig,
    pipeline: Arc<AuditPipeline>,
    projects: ProjectService,
}

impl AppState {
    /// Wire the sample project service to `pipeline`.
    pub fn new(server: ServerConfig, pipeline: Arc<AuditPipeline>) -> Result<Self, AuditError> {
        let repo = Arc::new(ProjectRepository::new());
        let projects = ProjectService::new(repo.clone(), pipeline.interceptor(repo))?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                server,
                pipeline,
                projects,
            }),
        })
    }

    pub fn pipeline(&self) -> &AuditPipeline {
        &self.inner.pipeline
    }

    pub fn projects(&self) -> &ProjectService {
        &self.inner.projects
    }

    pub fn trust_actor_headers(&self) -> bool {
        self.inner.server.trust_actor_headers
    }
}
