use std::sync::Arc;
use std::time::Duration;

use crate::blob::BlobStore;
use crate::config::Settings;
use crate::db::models::Project;
use crate::db::Database;
use crate::provider::MailProvider;
use crate::threads::SideDirectory;

use super::error::IngestError;
use super::membership::Whitelist;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_in_flight: usize,
    pub max_retries: u32,
    pub latency_ceiling: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            batch_delay: settings.batch_delay(),
            max_in_flight: settings.max_in_flight.max(1),
            max_retries: settings.max_retries.max(1),
            latency_ceiling: settings.latency_ceiling(),
        }
    }
}

/// Everything a pipeline stage needs, passed explicitly.
#[derive(Clone)]
pub struct IngestContext {
    pub provider: Arc<dyn MailProvider>,
    pub store: Database,
    pub blobs: Arc<dyn BlobStore>,
    pub options: IngestOptions,
}

impl IngestContext {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Database,
        blobs: Arc<dyn BlobStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            provider,
            store,
            blobs,
            options,
        }
    }
}

/// A project together with its current team, loaded once per job.
#[derive(Debug, Clone)]
pub struct ProjectScope {
    pub project: Project,
    pub whitelist: Whitelist,
    pub sides: SideDirectory,
}

impl ProjectScope {
    pub fn load(store: &Database, project_id: &str) -> Result<Self, IngestError> {
        let project = store
            .get_project(project_id)?
            .ok_or_else(|| IngestError::UnknownProject(project_id.to_string()))?;
        Self::for_project(store, project)
    }

    pub fn for_project(store: &Database, project: Project) -> Result<Self, IngestError> {
        let members = store.list_team_members(&project.project_id)?;
        Ok(Self {
            whitelist: Whitelist::from_members(&members),
            sides: SideDirectory::from_members(&members),
            project,
        })
    }
}
