//! HTTP surface: multipart uploads on `/detect`, folder scans on `/process`
//! and their annotated outputs under `/files`.

use crate::config::ServiceConfig;
use crate::detectors::{DetectError, DetectOptions, ErrorKind, Findings, Upload};
use crate::fetch::fetch_upload;
use crate::folder::{FolderError, FolderReport};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State, multipart::MultipartError, rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub fn router(state: AppState, config: &ServiceConfig) -> Router {
    let mut router = Router::new()
        .route("/detect", post(detect))
        .route("/process", post(process))
        .route("/categories", get(categories))
        .route("/health", get(health));
    // Paths are relative to the scan root; nothing is served without one.
    if let Some(root) = &config.process_root {
        router = router.nest_service("/files", ServeDir::new(root));
    }
    router
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        let status = match err.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "detection failed");
        } else {
            warn!(error = %err, "detection rejected");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct DetectBody {
    success: bool,
    result: Findings,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<String>,
}

/// Form fields: `category`, then `file` or `url`, and optionally `preview`.
async fn detect(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DetectBody>, ApiError> {
    let mut category: Option<String> = None;
    let mut upload: Option<Upload> = None;
    let mut url: Option<String> = None;
    let mut preview = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("category") => category = Some(field.text().await?),
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                upload = Some(Upload::new(filename, bytes.to_vec()));
            }
            Some("url") => url = Some(field.text().await?),
            Some("preview") => preview = is_truthy(&field.text().await?),
            _ => {}
        }
    }

    let category = category.filter(|c| !c.trim().is_empty());
    let url = url.filter(|u| !u.trim().is_empty());
    let (category, upload) = match (category, upload, url) {
        (Some(category), Some(upload), _) => (category, upload),
        (Some(category), None, Some(url)) => {
            state.registry.resolve(&category)?;
            let upload = fetch_upload(&state.http, &url, state.max_upload_bytes)
                .await
                .map_err(DetectError::from)?;
            (category, upload)
        }
        _ => return Err(ApiError::bad_request("Missing category or file")),
    };

    let detected = state
        .registry
        .detect(&category, upload, DetectOptions { preview })
        .await?;
    Ok(Json(DetectBody {
        success: true,
        result: detected.findings,
        preview: detected.preview,
    }))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    input_dir: Option<String>,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ProcessBody {
    status: &'static str,
    result: FolderReport,
}

async fn process(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<ProcessBody>, (StatusCode, Json<serde_json::Value>)> {
    let failure = |status: StatusCode, message: String| (status, Json(json!({ "error": message })));
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable /process body");
            return Err(failure(
                StatusCode::BAD_REQUEST,
                FolderError::InvalidInputDir.to_string(),
            ));
        }
    };

    let input_dir = request.input_dir.unwrap_or_default();
    let categories = request.categories.unwrap_or_default();
    let scanner = state.scanner.clone();
    let outcome =
        tokio::task::spawn_blocking(move || scanner.scan(&input_dir, &categories)).await;

    match outcome {
        Ok(Ok(result)) => Ok(Json(ProcessBody {
            status: "done",
            result,
        })),
        Ok(Err(FolderError::InvalidInputDir)) => Err(failure(
            StatusCode::BAD_REQUEST,
            FolderError::InvalidInputDir.to_string(),
        )),
        Ok(Err(err)) => {
            error!(error = %err, "folder scan failed");
            Err(failure(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
        Err(err) => Err(failure(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

async fn categories(State(state): State<AppState>) -> Json<serde_json::Value> {
    let names: Vec<&str> = state
        .registry
        .categories()
        .iter()
        .map(|c| c.as_str())
        .collect();
    Json(json!({ "categories": names }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use image::RgbImage;
    use tower::ServiceExt;

    const BOUNDARY: &str = "triage-boundary";

    fn config(models_dir: &std::path::Path) -> ServiceConfig {
        ServiceConfig {
            models_dir: models_dir.to_path_buf(),
            intra_threads: 1,
            ..ServiceConfig::default()
        }
    }

    fn app_with(config: ServiceConfig) -> Router {
        router(AppState::new(&config), &config)
    }

    fn app(models_dir: &std::path::Path) -> Router {
        app_with(config(models_dir))
    }

    fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn detect_request(fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/detect")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields)))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn png_bytes() -> Vec<u8> {
        let mut png = std::io::Cursor::new(Vec::new());
        RgbImage::new(8, 8)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        png.into_inner()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "OK"}));
    }

    #[tokio::test]
    async fn categories_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/categories").body(Body::empty()).unwrap();
        let (_, body) = send(app(dir.path()), request).await;
        assert_eq!(
            body["categories"],
            json!(["people", "vehicles", "technology", "objects", "weapons", "appearance", "content"])
        );
    }

    #[tokio::test]
    async fn missing_file_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let request = detect_request(&[("category", None, b"people")]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "Missing category or file"}));
    }

    #[tokio::test]
    async fn unknown_category_is_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let request = detect_request(&[
            ("category", None, b"ocr"),
            ("file", Some("a.png"), b"bytes"),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Category not supported");
    }

    #[tokio::test]
    async fn undecodable_image_succeeds_with_error_in_result() {
        let dir = tempfile::tempdir().unwrap();
        let request = detect_request(&[
            ("category", None, b"people"),
            ("file", Some("a.png"), b"not really a png"),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "result": {"category": "people", "detections": [], "error": "Image a.png not found."}
            })
        );
    }

    #[tokio::test]
    async fn missing_model_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let png = png_bytes();
        let request = detect_request(&[
            ("category", None, b"technology"),
            ("file", Some("desk.png"), &png),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("coco model unavailable"));
    }

    #[tokio::test]
    async fn short_text_documents_are_screened_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let request = detect_request(&[
            ("category", None, b"content"),
            ("file", Some("note.txt"), b"hi"),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["suicidal_label"], "non-suicidal");
        assert_eq!(body["result"]["filename"], "note.txt");
    }

    #[tokio::test]
    async fn invalid_url_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let request = detect_request(&[
            ("category", None, b"people"),
            ("url", None, b"ftp://evidence/a.png"),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid URL"));
    }

    #[tokio::test]
    async fn unknown_category_is_rejected_before_fetching_the_url() {
        let dir = tempfile::tempdir().unwrap();
        // nothing listens on port 1, so a fetch would surface as 503
        let request = detect_request(&[
            ("category", None, b"bogus"),
            ("url", None, b"http://127.0.0.1:1/a.png"),
        ]);
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "Category not supported"}));
    }

    fn process_request(body: impl Into<Body>) -> Request<Body> {
        Request::post("/process")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn process_accepts_null_categories() {
        let models = tempfile::tempdir().unwrap();
        let evidence = tempfile::tempdir().unwrap();
        let body = json!({"input_dir": evidence.path(), "categories": null}).to_string();
        let (status, body) = send(app(models.path()), process_request(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], json!({"images": [], "skipped_videos": []}));
    }

    #[tokio::test]
    async fn malformed_process_body_gets_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), process_request("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid or missing input_dir"}));

        let (status, body) =
            send(app(dir.path()), process_request(r#"{"categories": 3}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid or missing input_dir"}));
    }

    async fn fetch_file(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::get(path).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn annotated_outputs_are_served_from_the_process_root() {
        let models = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let outputs = root.path().join("case1").join("suspicious_images");
        std::fs::create_dir_all(&outputs).unwrap();
        std::fs::write(outputs.join("a_knife_87.jpg"), b"jpeg bytes").unwrap();

        let config = ServiceConfig {
            process_root: Some(root.path().to_path_buf()),
            ..config(models.path())
        };
        let (status, bytes) = fetch_file(
            app_with(config.clone()),
            "/files/case1/suspicious_images/a_knife_87.jpg",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"jpeg bytes");

        let (status, _) = fetch_file(app_with(config), "/files/case1/missing.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn files_are_not_served_without_a_process_root() {
        let models = tempfile::tempdir().unwrap();
        let (status, _) = fetch_file(app(models.path()), "/files/etc/passwd").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn process_requires_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/process")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"input_dir": "/no/such/dir"}"#))
            .unwrap();
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid or missing input_dir"}));
    }

    #[tokio::test]
    async fn process_reports_skipped_videos() {
        let models = tempfile::tempdir().unwrap();
        let evidence = tempfile::tempdir().unwrap();
        std::fs::write(evidence.path().join("clip.mkv"), b"video").unwrap();
        let request = Request::post("/process")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"input_dir": evidence.path()}).to_string(),
            ))
            .unwrap();
        let (status, body) = send(app(models.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "done");
        assert_eq!(body["result"]["images"], json!([]));
        assert_eq!(body["result"]["skipped_videos"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn preview_flag_parsing() {
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("1"));
        assert!(!is_truthy("no"));
    }
}
