//! Webhook HTTP server
//!
//! Serves the ValidatingAdmissionWebhook endpoint for MySQL resources.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use futures::FutureExt;
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::admission::{AdmissionDecision, AdmissionInput, AdmissionOperation, admit};
use crate::controller::validation::{ClusterLookup, KubeLookup};
use crate::crd::MySQL;

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared state for webhook handlers
pub struct WebhookState {
    pub lookup: Arc<dyn ClusterLookup>,
}

impl WebhookState {
    pub fn new(lookup: Arc<dyn ClusterLookup>) -> Self {
        Self { lookup }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(validate_mysql))
        .with_state(state)
}

/// Validate MySQL admission webhook handler
pub(crate) async fn validate_mysql(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview>,
) -> impl IntoResponse {
    let Some(request) = review.request else {
        error!("Admission review missing request");
        return (
            StatusCode::BAD_REQUEST,
            Json(create_response(
                "",
                &AdmissionDecision::bad_request("Missing request in AdmissionReview"),
            )),
        );
    };

    let uid = request.uid.clone();
    info!(
        uid = %uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    let decision = match decode_request(request) {
        Ok(input) => guarded_admit(state.lookup.as_ref(), &input).await,
        Err(decision) => decision,
    };

    match &decision {
        AdmissionDecision::Allowed => info!(uid = %uid, "Admission request allowed"),
        AdmissionDecision::Denied { reason, message, .. } => {
            warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied")
        }
        AdmissionDecision::Failed { message } => {
            error!(uid = %uid, message = %message, "Admission request failed")
        }
    }

    (StatusCode::OK, Json(create_response(&uid, &decision)))
}

/// Run [`admit`], turning a panic into a `Failed` decision so the API server
/// still receives a well-formed 500 response
async fn guarded_admit(lookup: &dyn ClusterLookup, input: &AdmissionInput) -> AdmissionDecision {
    match AssertUnwindSafe(admit(lookup, input)).catch_unwind().await {
        Ok(decision) => decision,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(name = %input.name, detail = %detail, "Admission handler panicked");
            AdmissionDecision::Failed {
                message: format!("internal error while admitting {}: {}", input.name, detail),
            }
        }
    }
}

/// Turn the raw request into typed input, or a 400 decision
fn decode_request(request: AdmissionRequest) -> Result<AdmissionInput, AdmissionDecision> {
    let operation = AdmissionOperation::parse(&request.operation).ok_or_else(|| {
        AdmissionDecision::bad_request(format!("unsupported operation {}", request.operation))
    })?;

    let parse = |value: Option<serde_json::Value>, field: &str| -> Result<Option<MySQL>, AdmissionDecision> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v).map(Some).map_err(|e| {
                AdmissionDecision::bad_request(format!("Failed to parse {}: {}", field, e))
            }),
        }
    };
    let object = parse(request.object, "object")?;
    let old_object = parse(request.old_object, "oldObject")?;

    let from_object = |f: fn(&MySQL) -> Option<String>| {
        object.as_ref().or(old_object.as_ref()).and_then(f)
    };
    let namespace = request
        .namespace
        .or_else(|| from_object(|db| db.metadata.namespace.clone()))
        .unwrap_or_default();
    let name = request
        .name
        .or_else(|| from_object(|db| db.metadata.name.clone()))
        .unwrap_or_default();

    Ok(AdmissionInput {
        operation,
        namespace,
        name,
        object,
        old_object,
    })
}

/// Create an AdmissionReview response
fn create_response(uid: &str, decision: &AdmissionDecision) -> AdmissionReviewResponse {
    let status = match decision {
        AdmissionDecision::Allowed => None,
        AdmissionDecision::Denied {
            code,
            reason,
            message,
        } => Some(AdmissionStatus {
            code: *code,
            message: message.clone(),
            reason: Some(reason.clone()),
        }),
        AdmissionDecision::Failed { message } => Some(AdmissionStatus {
            code: decision.code(),
            message: message.clone(),
            reason: Some("InternalError".to_string()),
        }),
    };

    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed: decision.is_allowed(),
            status,
        },
    }
}

/// Certificate mounted from the webhook Secret
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
pub const WEBHOOK_PORT: u16 = 8443;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[source] std::io::Error),

    #[error("Webhook server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Serve `/validate` over TLS on 0.0.0.0:[`WEBHOOK_PORT`]
///
/// Admission lookups go straight to the API server, so a MySQLVersion
/// created a moment ago is already visible to the validator.
pub async fn run_webhook_server(
    client: Client,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(WebhookError::TlsConfig)?;

    let lookup: Arc<dyn ClusterLookup> = Arc::new(KubeLookup::new(client));
    let app = create_webhook_router(Arc::new(WebhookState::new(lookup)));

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(%addr, "Webhook server listening with TLS");
    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await
        .map_err(WebhookError::Server)
}
