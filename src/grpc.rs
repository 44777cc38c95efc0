use crate::detectors::{DetectError, DetectOptions, ErrorKind, Upload};
use crate::fetch::fetch_upload;
use crate::folder::FolderError;
use crate::state::AppState;
use tonic::{Request, Response, Status};
use tracing::{error, info};

// Generated from the "media_triage_service" package in proto/media_triage.proto.
pub mod media_triage_service {
    tonic::include_proto!("media_triage_service");
    // Exposed for the reflection service
    pub(crate) const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("media_triage_descriptor");
}

use media_triage_service::{
    DetectRequest, DetectResponse, ListCategoriesRequest, ListCategoriesResponse,
    ProcessFolderRequest, ProcessFolderResponse, detect_request::Source,
    media_triage_server::{MediaTriage, MediaTriageServer},
};

pub struct TriageService {
    state: AppState,
}

impl TriageService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Wraps the service with message limits matching the upload cap, since
    /// files and previews travel inline.
    pub fn into_server(self) -> MediaTriageServer<Self> {
        let limit = self.state.max_upload_bytes;
        MediaTriageServer::new(self)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit)
    }

    async fn upload_from(&self, filename: String, source: Option<Source>) -> Result<Upload, Status> {
        match source {
            Some(Source::FileData(bytes)) if !bytes.is_empty() => {
                let filename = if filename.is_empty() {
                    "upload".to_string()
                } else {
                    filename
                };
                Ok(Upload::new(filename, bytes))
            }
            Some(Source::FileUrl(url)) if !url.trim().is_empty() => {
                let mut upload = fetch_upload(&self.state.http, &url, self.state.max_upload_bytes)
                    .await
                    .map_err(|e| status_from(DetectError::from(e)))?;
                if !filename.is_empty() {
                    upload.filename = filename;
                }
                Ok(upload)
            }
            _ => Err(Status::invalid_argument("Missing category or file")),
        }
    }
}

fn status_from(err: DetectError) -> Status {
    match err.kind() {
        ErrorKind::InvalidInput => Status::invalid_argument(err.to_string()),
        ErrorKind::Unavailable => Status::unavailable(err.to_string()),
        ErrorKind::Internal => {
            error!(error = %err, "detection failed");
            Status::internal(err.to_string())
        }
    }
}

#[tonic::async_trait]
impl MediaTriage for TriageService {
    async fn detect(
        &self,
        request: Request<DetectRequest>,
    ) -> Result<Response<DetectResponse>, Status> {
        let request = request.into_inner();
        info!(request_id = %request.request_id, category = %request.category, "detect request");
        if request.category.trim().is_empty() {
            return Err(Status::invalid_argument("Missing category or file"));
        }

        self.state
            .registry
            .resolve(&request.category)
            .map_err(status_from)?;
        let upload = self.upload_from(request.filename, request.source).await?;
        let detected = self
            .state
            .registry
            .detect(
                &request.category,
                upload,
                DetectOptions {
                    preview: request.preview,
                },
            )
            .await
            .map_err(status_from)?;
        let result_json = serde_json::to_string(&detected.findings)
            .map_err(|e| Status::internal(format!("Failed to serialize findings: {e}")))?;

        Ok(Response::new(DetectResponse {
            request_id: request.request_id,
            category: request.category,
            result_json,
            preview_image: detected.preview.unwrap_or_default(),
        }))
    }

    async fn list_categories(
        &self,
        _request: Request<ListCategoriesRequest>,
    ) -> Result<Response<ListCategoriesResponse>, Status> {
        let categories = self
            .state
            .registry
            .categories()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        Ok(Response::new(ListCategoriesResponse { categories }))
    }

    async fn process_folder(
        &self,
        request: Request<ProcessFolderRequest>,
    ) -> Result<Response<ProcessFolderResponse>, Status> {
        let ProcessFolderRequest {
            input_dir,
            categories,
        } = request.into_inner();
        let scanner = self.state.scanner.clone();
        let report = tokio::task::spawn_blocking(move || scanner.scan(&input_dir, &categories))
            .await
            .map_err(|e| Status::internal(e.to_string()))?
            .map_err(|err| match err {
                FolderError::InvalidInputDir => {
                    Status::invalid_argument(FolderError::InvalidInputDir.to_string())
                }
                FolderError::Detect(err) => status_from(err),
                other => {
                    error!(error = %other, "folder scan failed");
                    Status::internal(other.to_string())
                }
            })?;

        Ok(Response::new(ProcessFolderResponse {
            images: report.images,
            skipped_videos: report.skipped_videos,
        }))
    }
}
