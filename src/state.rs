use crate::config::ServiceConfig;
use crate::detectors::{NuditySettings, Registry};
use crate::folder::FolderScanner;
use crate::models::ModelStore;
use std::sync::Arc;

/// Shared by the HTTP and gRPC surfaces.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub scanner: Arc<FolderScanner>,
    pub http: reqwest::Client,
    /// Cap for uploads, fetched URLs and gRPC messages alike.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(config: &ServiceConfig) -> Self {
        let models = Arc::new(ModelStore::new(&config.models_dir, config.intra_threads));
        Self {
            registry: Registry::with_builtin(
                models.clone(),
                NuditySettings {
                    mode: config.nudity_mode,
                    ..NuditySettings::default()
                },
            ),
            scanner: Arc::new(FolderScanner::new(models, config.process_root.clone())),
            http: reqwest::Client::new(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}
