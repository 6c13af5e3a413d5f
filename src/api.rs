//! HTTP surface for CareLens.
//!
//! Endpoints:
//!
//! - `GET /` – Health probe with service name and version.
//! - `POST /api/query` – Answer `{ "question": ... }` from the indexed documents.
//! - `POST /api/sentiment` – Analyze patient feedback with context (department, wait, rating).
//! - `POST /api/files/upload` – Multipart `file` upload; stores the file and indexes it.
//! - `GET /api/system/info` – Manifest summary, readiness flags, and counters.
//! - `POST /api/system/reload` – Full sync of every watched directory.
//! - `POST /api/whatsapp/send` – Pass-through send via the messaging gateway.
//! - `POST /api/whatsapp/webhook` – Inbound gateway message answered with TwiML.
//! - `GET /api/whatsapp/status/:sid` – Pass-through delivery status.
//!
//! Successful responses are wrapped as `{ "success": true, "data": ... }`; failures as
//! `{ "success": false, "error": { "code", "message", "retryable" } }`.

use crate::feedback::FeedbackRequest;
use crate::messaging::OutboundMessage;
use crate::service::{InboundMessage, InsightApi, ServiceError};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Form, Multipart, Path, State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Largest accepted request body, uploads included.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build the HTTP router over an [`InsightApi`] implementation.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: InsightApi + 'static,
{
    Router::new()
        .route("/", get(health))
        .route("/api/query", post(query::<S>))
        .route("/api/sentiment", post(analyze_sentiment::<S>))
        .route("/api/files/upload", post(upload_file::<S>))
        .route("/api/system/info", get(system_info::<S>))
        .route("/api/system/reload", post(reload::<S>))
        .route("/api/whatsapp/send", post(send_whatsapp::<S>))
        .route("/api/whatsapp/webhook", post(whatsapp_webhook::<S>))
        .route("/api/whatsapp/status/:sid", get(whatsapp_status::<S>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Success envelope.
#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

async fn health() -> Json<Envelope<serde_json::Value>> {
    success(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Request body for `POST /api/query`.
#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: Option<String>,
}

async fn query<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let Json(request) = payload.map_err(json_rejection)?;
    let question = request.question.unwrap_or_default();
    let answer = service.answer(&question).await?;
    Ok(success(answer).into_response())
}

async fn analyze_sentiment<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let Json(request) = payload.map_err(json_rejection)?;
    let analysis = service.analyze_feedback(request).await?;
    Ok(success(analysis).into_response())
}

/// Accept the multipart part named `file` and hand it to the service.
async fn upload_file<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ServiceError::Validation(error.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Validation("the file part has no file name".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ServiceError::Validation(error.body_text()))?;
        let outcome = service.ingest_upload(&file_name, bytes.to_vec()).await?;
        tracing::info!(
            file = %outcome.file_name,
            indexed = outcome.indexed,
            "Upload request completed"
        );
        return Ok(success(outcome).into_response());
    }
    Err(ServiceError::Validation("multipart field `file` is required".into()).into())
}

async fn system_info<S>(State(service): State<Arc<S>>) -> Response
where
    S: InsightApi,
{
    success(service.system_info()).into_response()
}

async fn reload<S>(State(service): State<Arc<S>>) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let summary = service.reload().await?;
    Ok(success(summary).into_response())
}

async fn send_whatsapp<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<OutboundMessage>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let Json(message) = payload.map_err(json_rejection)?;
    let status = service.send_message(message).await?;
    Ok(success(status).into_response())
}

/// Form fields posted by the gateway for an inbound message.
#[derive(Deserialize)]
struct WebhookForm {
    #[serde(rename = "Body", default)]
    body: String,
    #[serde(rename = "From", default)]
    from: String,
}

async fn whatsapp_webhook<S>(
    State(service): State<Arc<S>>,
    payload: Result<Form<WebhookForm>, FormRejection>,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let Form(form) = payload
        .map_err(|rejection| ServiceError::Validation(rejection.body_text()))?;
    let reply = service
        .relay_inbound(InboundMessage {
            from: form.from,
            body: form.body,
        })
        .await;
    Ok(twiml(&reply))
}

async fn whatsapp_status<S>(
    State(service): State<Arc<S>>,
    Path(sid): Path<String>,
) -> Result<Response, AppError>
where
    S: InsightApi,
{
    let status = service.message_status(&sid).await?;
    Ok(success(status).into_response())
}

fn twiml(message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        quick_xml::escape::escape(message)
    );
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn json_rejection(rejection: JsonRejection) -> ServiceError {
    ServiceError::Validation(rejection.body_text())
}

/// Service error rendered as a JSON error envelope.
pub struct AppError(ServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::Validation(_) | ServiceError::UnsupportedFileKind(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::SyncInProgress => StatusCode::CONFLICT,
            ServiceError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::ExternalService { .. } | ServiceError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        let body = json!({
            "success": false,
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable(),
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::answer::{Answer, SourceCitation};
    use crate::feedback::{
        ContextualAnalyzer, FeedbackAnalysis, FeedbackContext, FeedbackPipeline, FeedbackRequest,
        RiskPolicy,
    };
    use crate::generation::{GenerationClient, GenerationRequest};
    use crate::ingestion::{DocumentKind, IngestionReport};
    use crate::messaging::{MessageStatus, OutboundMessage};
    use crate::metrics::MetricsSnapshot;
    use crate::resilience::CapabilityError;
    use crate::service::{
        CapabilityStatus, InboundMessage, IndexStatus, InsightApi, ReloadSummary, ServiceError,
        SystemInfo, UploadOutcome, compose_relay_reply,
    };
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct UnavailableGenerator;

    #[async_trait]
    impl GenerationClient for UnavailableGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, CapabilityError> {
            Err(CapabilityError::Unavailable("offline".into()))
        }

        fn model(&self) -> &str {
            "offline"
        }
    }

    struct StubInsight {
        ready: bool,
        uploads: Mutex<Vec<(String, usize)>>,
        feedback: FeedbackPipeline,
    }

    impl StubInsight {
        fn new(ready: bool) -> Arc<Self> {
            Arc::new(Self {
                ready,
                uploads: Mutex::new(Vec::new()),
                feedback: FeedbackPipeline::new(
                    ContextualAnalyzer::new(Arc::new(UnavailableGenerator)),
                    RiskPolicy::default(),
                ),
            })
        }
    }

    #[async_trait]
    impl InsightApi for StubInsight {
        async fn answer(&self, question: &str) -> Result<Answer, ServiceError> {
            if question.trim().is_empty() {
                return Err(ServiceError::Validation("question is required".into()));
            }
            if !self.ready {
                return Err(ServiceError::NotReady("no index".into()));
            }
            Ok(Answer {
                question: question.into(),
                answer: "The wait time is 45 minutes <approx> & rising.".into(),
                sources: vec![SourceCitation {
                    document: "data/pdfs/report.pdf".into(),
                    name: "report.pdf".into(),
                    kind: DocumentKind::Paginated,
                    score: 0.9,
                }],
                passages: Vec::new(),
                processing_id: Uuid::nil(),
                generation: 1,
                answered_at: "2026-01-01T00:00:00Z".into(),
            })
        }

        async fn analyze_feedback(
            &self,
            request: FeedbackRequest,
        ) -> Result<FeedbackAnalysis, ServiceError> {
            let context = FeedbackContext::try_from(request)?;
            Ok(self.feedback.analyze(context).await)
        }

        async fn ingest_upload(
            &self,
            file_name: &str,
            bytes: Vec<u8>,
        ) -> Result<UploadOutcome, ServiceError> {
            let kind = DocumentKind::from_path(std::path::Path::new(file_name))
                .ok_or_else(|| ServiceError::UnsupportedFileKind(file_name.into()))?;
            self.uploads
                .lock()
                .await
                .push((file_name.to_string(), bytes.len()));
            Ok(UploadOutcome {
                file_name: file_name.into(),
                kind,
                stored_path: format!("data/pdfs/{file_name}"),
                indexed: true,
                report: Some(IngestionReport::default()),
            })
        }

        fn system_info(&self) -> SystemInfo {
            SystemInfo {
                version: "test",
                index: IndexStatus {
                    ready: self.ready,
                    generation: None,
                    built_at: None,
                    documents: 0,
                    chunks: 0,
                    syncing: false,
                },
                embedding: CapabilityStatus {
                    ready: true,
                    model: Some("hash".into()),
                },
                analyzer: CapabilityStatus {
                    ready: true,
                    model: Some("offline".into()),
                },
                messaging: CapabilityStatus {
                    ready: false,
                    model: None,
                },
                directories: Vec::new(),
                documents: Vec::new(),
                metrics: MetricsSnapshot::default(),
            }
        }

        async fn reload(&self) -> Result<ReloadSummary, ServiceError> {
            Err(ServiceError::SyncInProgress)
        }

        async fn send_message(
            &self,
            message: OutboundMessage,
        ) -> Result<MessageStatus, ServiceError> {
            Ok(MessageStatus {
                sid: "SM1".into(),
                status: "queued".into(),
                to: Some(message.to),
                date_created: None,
                date_updated: None,
                error_code: None,
                error_message: None,
            })
        }

        async fn message_status(&self, sid: &str) -> Result<MessageStatus, ServiceError> {
            Err(ServiceError::NotFound(format!("message {sid} not found")))
        }

        async fn relay_inbound(&self, message: InboundMessage) -> String {
            compose_relay_reply(self.answer(&message.body).await)
        }
    }

    async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        (status, body.to_vec())
    }

    fn json_request(method: Method, uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    fn parse(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json body")
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            Request::builder().uri("/").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json = parse(&body);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn query_returns_answer_envelope() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            json_request(Method::POST, "/api/query", json!({"question": "what is the wait time?"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json = parse(&body);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["sources"][0]["name"], "report.pdf");
        assert_eq!(json["data"]["sources"][0]["kind"], "paginated");
        assert!(json["data"]["processing_id"].is_string());
    }

    #[tokio::test]
    async fn query_without_question_is_bad_request() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            json_request(Method::POST, "/api/query", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json = parse(&body);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let (status, body) = send(create_router(StubInsight::new(true)), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse(&body)["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn query_before_index_is_service_unavailable() {
        let (status, body) = send(
            create_router(StubInsight::new(false)),
            json_request(Method::POST, "/api/query", json!({"question": "hours?"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json = parse(&body);
        assert_eq!(json["error"]["code"], "not_ready");
        assert_eq!(json["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn sentiment_degrades_when_generator_is_down() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            json_request(
                Method::POST,
                "/api/sentiment",
                json!({
                    "feedback_text": "Temps d'attente catastrophique",
                    "rating": 1,
                    "wait_time_min": 120,
                    "department": "Emergency"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let data = &parse(&body)["data"];
        assert_eq!(data["degraded"], true);
        assert_eq!(data["primary_sentiment"], "unknown");
        assert_eq!(data["risk_level"], "high");
        assert!(!data["recommendations"].as_array().expect("array").is_empty());
    }

    #[tokio::test]
    async fn sentiment_without_text_is_bad_request() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            json_request(Method::POST, "/api/sentiment", json!({"rating": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse(&body)["error"]["code"], "validation_error");
    }

    fn multipart_request(file_name: &str, contents: &str) -> Request<Body> {
        let boundary = "carelens-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{contents}\r\n--{boundary}--\r\n"
        );
        Request::builder()
            .method(Method::POST)
            .uri("/api/files/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn upload_forwards_file_part() {
        let service = StubInsight::new(true);
        let (status, body) = send(
            create_router(service.clone()),
            multipart_request("report.pdf", "%PDF-1.4 body"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body)["data"]["indexed"], true);
        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.as_slice(), &[("report.pdf".to_string(), 13)]);
    }

    #[tokio::test]
    async fn upload_of_unsupported_kind_is_bad_request() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            multipart_request("notes.txt", "hello"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse(&body)["error"]["code"], "unsupported_file_kind");
    }

    #[tokio::test]
    async fn reload_during_sync_is_conflict() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            Request::builder()
                .method(Method::POST)
                .uri("/api/system/reload")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse(&body)["error"]["code"], "sync_in_progress");
    }

    #[tokio::test]
    async fn system_info_exposes_readiness() {
        let (status, body) = send(
            create_router(StubInsight::new(false)),
            Request::builder()
                .uri("/api/system/info")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = &parse(&body)["data"];
        assert_eq!(data["index"]["ready"], false);
        assert_eq!(data["messaging"]["ready"], false);
    }

    #[tokio::test]
    async fn webhook_answers_with_escaped_twiml() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/whatsapp/webhook")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("Body=what+is+the+wait+time%3F&From=whatsapp%3A%2B33600000000"))
            .expect("request");
        let response = create_router(StubInsight::new(true))
            .oneshot(request)
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/xml"
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let xml = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(xml.contains("<Response><Message>"));
        assert!(xml.contains("&lt;approx&gt; &amp; rising"));
    }

    #[tokio::test]
    async fn send_passes_through_gateway_status() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            json_request(
                Method::POST,
                "/api/whatsapp/send",
                json!({"to": "+33600000000", "message": "hello"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse(&body)["data"]["sid"], "SM1");
    }

    #[tokio::test]
    async fn unknown_message_status_is_not_found() {
        let (status, body) = send(
            create_router(StubInsight::new(true)),
            Request::builder()
                .uri("/api/whatsapp/status/SM404")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parse(&body)["error"]["code"], "not_found");
    }
}
