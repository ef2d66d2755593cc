use std::sync::Arc;

use crate::broadcast::StepProgressBroadcaster;
use crate::config::Config;
use crate::db::{process_repo, Database, ProcessRecord};
use crate::error::{ConfigError, ContentflowError, RegistryError};
use crate::pipeline::{ArtifactType, FileDetail, PipelineState};
use crate::queue::{dead_letter_queue_name, encode_body, queue_name, QueueTransport, SqliteQueue};
use crate::storage::ProcessStorage;

/// Optional identifiers attached to a submitted document.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub schema_id: Option<String>,
    pub metadata_id: Option<String>,
}

/// Shared clients for one host process, built once at startup and handed to
/// every component. Cloning is cheap.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub queue: Arc<dyn QueueTransport>,
    pub storage: ProcessStorage,
    pub progress: Option<StepProgressBroadcaster>,
}

impl AppContext {
    pub fn new(
        config: Config,
        db: Database,
        queue: Arc<dyn QueueTransport>,
        storage: ProcessStorage,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            queue,
            storage,
            progress: None,
        }
    }

    /// Opens the configured database and storage, with the SQLite queue on
    /// the same database file.
    pub fn from_config(config: Config) -> Result<Self, ContentflowError> {
        let db_path = config.database_path().ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and no home directory is available".to_string(),
        })?;
        let db = Database::open(&db_path)?;
        let queue: Arc<dyn QueueTransport> = Arc::new(SqliteQueue::new(db.clone()));
        let storage = ProcessStorage::new(config.storage_path());

        log::info!(
            "Context ready: database {}, storage {}",
            db_path.display(),
            storage.root().display()
        );

        Ok(Self::new(config, db, queue, storage))
    }

    pub fn with_progress(mut self, broadcaster: StepProgressBroadcaster) -> Self {
        self.progress = Some(broadcaster);
        self
    }

    pub fn queue_name(&self, step: &str) -> String {
        queue_name(&self.config.pipeline_prefix, step)
    }

    pub fn dead_letter_queue_name(&self, step: &str) -> String {
        dead_letter_queue_name(&self.queue_name(step))
    }

    pub fn first_step(&self) -> Option<&str> {
        self.config.process_steps.first().map(String::as_str)
    }

    /// Starts a new process for `content`: stores the source file and the
    /// initial state, records the process and enqueues it on the first step.
    /// Returns the new process id.
    pub fn submit(
        &self,
        file_name: &str,
        content: &[u8],
        options: &SubmitOptions,
    ) -> Result<String, ContentflowError> {
        let first_step = self.first_step().ok_or(RegistryError::NoSteps)?.to_string();
        let process_id = uuid::Uuid::new_v4().to_string();

        let mut state = PipelineState::new(&process_id, self.config.process_steps.clone());
        state.pipeline_status.schema_id = options.schema_id.clone();
        state.pipeline_status.metadata_id = options.metadata_id.clone();

        self.storage.upload_bytes(&process_id, file_name, content)?;
        let mut source = FileDetail::new(&process_id, file_name, ArtifactType::SourceContent, None);
        source.size = Some(content.len() as u64);
        source.add_log_entry("submit", "Source file has been uploaded");
        let mime_type = source.mime_type.clone();
        state.files.push(source);
        self.storage.save_pipeline_state(&state)?;

        let record = ProcessRecord::new(&process_id, Some(file_name), mime_type.as_deref());
        process_repo::insert(&self.db, &record)?;

        let body = encode_body(&state.to_json()?, self.config.queue.message_encoding);
        self.queue.send(&self.queue_name(&first_step), &body)?;

        log::info!(
            "Submitted {} as process {} to step {}",
            file_name,
            process_id,
            first_step
        );
        Ok(process_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_opens_clients() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_directory: dir.path().join("blobs").to_string_lossy().into_owned(),
            database_path: Some(dir.path().join("cf.db").to_string_lossy().into_owned()),
            ..Config::default()
        };

        let ctx = AppContext::from_config(config).unwrap();
        assert_eq!(ctx.queue_name("map"), "content-pipeline-map-queue");
        assert_eq!(
            ctx.dead_letter_queue_name("map"),
            "content-pipeline-map-queue-dead-letter-queue"
        );
        assert_eq!(ctx.first_step(), Some("extract"));

        ctx.queue.send(&ctx.queue_name("map"), "x").unwrap();
        assert_eq!(ctx.queue.approximate_count(&ctx.queue_name("map")).unwrap(), 1);
    }

    #[test]
    fn test_submit_enqueues_on_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let ctx = AppContext::new(
            Config::default(),
            db.clone(),
            Arc::new(SqliteQueue::new(db)),
            ProcessStorage::new(dir.path()),
        );

        let options = SubmitOptions {
            schema_id: Some("invoice".into()),
            metadata_id: None,
        };
        let process_id = ctx.submit("claim.pdf", b"%PDF", &options).unwrap();

        let message = ctx
            .queue
            .receive(&ctx.queue_name("extract"), std::time::Duration::from_secs(30))
            .unwrap()
            .unwrap();
        let state = PipelineState::from_message_body(&message.body).unwrap();
        assert_eq!(state.process_id, process_id);
        assert_eq!(state.pipeline_status.schema_id.as_deref(), Some("invoice"));
        assert_eq!(state.source_files().count(), 1);
        assert_eq!(ctx.storage.download(&process_id, "claim.pdf").unwrap(), b"%PDF");

        let record = process_repo::find_by_id(&ctx.db, &process_id).unwrap().unwrap();
        assert_eq!(record.processed_file_mime_type.as_deref(), Some("application/pdf"));
    }
}
