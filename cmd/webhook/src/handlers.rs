use crate::admission::{AdmissionResponse, AdmissionReview};
use crate::state::WebhookState;
use crate::validator;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use pullcheck_registry::CheckImage;
use serde_json::Value;
use tracing::{debug, error, info};

/// Admission handler for image-pull secrets.
///
/// Takes the raw body rather than an extractor so that envelope failures
/// map to plain-text 400 responses: a review that cannot be decoded, or one
/// without a request, has no UID to echo and therefore gets no verdict
/// body. Everything decodable answers 200 with the verdict inside the
/// review, deny reasons included.
pub async fn validate_secret<C>(State(state): State<WebhookState<C>>, body: Bytes) -> Response
where
    C: CheckImage + Clone + Send + Sync + 'static,
{
    debug!("admission review: {}", String::from_utf8_lossy(&body));

    let mut review: AdmissionReview<Value> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!("can't deserialize admission review: {e}");
            return (
                StatusCode::BAD_REQUEST,
                "can't deserialize admission review",
            )
                .into_response();
        }
    };

    let Some(request) = review.request.take() else {
        error!("admission review has no request");
        return (StatusCode::BAD_REQUEST, "admission review has no request").into_response();
    };
    let uid = request.uid;

    let response = match validator::decode_secret(request.object) {
        Ok(secret) => {
            let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
            let name = secret.metadata.name.as_deref().unwrap_or("");
            match validator::validate_secret(&secret, &state.image, &state.checker).await {
                Ok(()) => {
                    info!("validation of the {namespace}/{name} secret was successful");
                    AdmissionResponse::allow(uid)
                }
                Err(err) => {
                    error!("validation of {namespace}/{name} secret failed: {err}");
                    AdmissionResponse::deny(uid, err.to_string())
                }
            }
        }
        Err(err) => {
            error!("can't decode object under review: {err}");
            AdmissionResponse::deny(uid, err.to_string())
        }
    };

    match serde_json::to_vec(&review.response(response)) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!("can't serialize admission review: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "can't serialize admission review",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use pullcheck_registry::{AuthConfig, CheckError};
    use serde_json::json;

    const TEST_UID: &str = "12345678-1234-1234-1234-123456789012";

    /// Accepts only entries with username "valid"; counts every call.
    #[derive(Clone, Default)]
    struct FakeRegistryClient {
        calls: Arc<AtomicUsize>,
    }

    impl CheckImage for FakeRegistryClient {
        async fn check_image(
            &self,
            _registry: &str,
            _image: &str,
            auth: &AuthConfig,
        ) -> Result<(), CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if auth.username.as_deref() == Some("valid") {
                Ok(())
            } else {
                Err(CheckError::BadAuthConfig("auth failed".to_string()))
            }
        }
    }

    fn test_state() -> WebhookState<FakeRegistryClient> {
        WebhookState::new("repo/app:stable", FakeRegistryClient::default())
    }

    async fn call(state: WebhookState<FakeRegistryClient>, body: &[u8]) -> (StatusCode, Value) {
        let response = validate_secret(State(state), Bytes::copy_from_slice(body)).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    fn review_with_secret(secret_type: &str, docker_config: Option<&str>) -> Vec<u8> {
        let mut data = json!({});
        if let Some(config) = docker_config {
            data[DOCKER_CONFIG_JSON_KEY] = Value::String(BASE64.encode(config));
        }
        serde_json::to_vec(&json!({
            "kind": "AdmissionReview",
            "apiVersion": "admission.k8s.io/v1",
            "request": {
                "uid": TEST_UID,
                "operation": "CREATE",
                "object": {
                    "kind": "Secret",
                    "apiVersion": "v1",
                    "metadata": {"name": "test", "namespace": "default"},
                    "data": data,
                    "type": secret_type,
                },
            },
        }))
        .unwrap()
    }

    fn message(body: &Value) -> &str {
        body["response"]["status"]["message"].as_str().unwrap()
    }

    #[tokio::test]
    async fn test_undecodable_envelope_is_bad_request() {
        let (status, body) = call(test_state(), b"not json at all").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let text = body.as_str().unwrap();
        assert!(text.contains("can't deserialize admission review"));
        assert!(!text.contains("allowed"));
    }

    #[tokio::test]
    async fn test_review_without_request_is_bad_request() {
        let review = json!({"kind": "AdmissionReview", "apiVersion": "admission.k8s.io/v1"});
        let (status, body) = call(test_state(), &serde_json::to_vec(&review).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.as_str().unwrap().contains("admission review has no request"));
    }

    #[tokio::test]
    async fn test_request_without_object_is_denied() {
        let review = json!({
            "kind": "AdmissionReview",
            "apiVersion": "admission.k8s.io/v1",
            "request": {"uid": TEST_UID, "operation": "CREATE"},
        });
        let (status, body) = call(test_state(), &serde_json::to_vec(&review).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(body["response"]["uid"], json!(TEST_UID));
        assert!(message(&body).contains("can't deserialize secret"));
    }

    #[tokio::test]
    async fn test_wrong_secret_type_is_denied() {
        let (status, body) = call(test_state(), &review_with_secret("Opaque", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(body["response"]["uid"], json!(TEST_UID));
        assert!(message(&body).contains(DOCKER_CONFIG_JSON_TYPE));
    }

    #[tokio::test]
    async fn test_missing_config_field_is_denied() {
        let (status, body) =
            call(test_state(), &review_with_secret(DOCKER_CONFIG_JSON_TYPE, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert!(message(&body).contains(DOCKER_CONFIG_JSON_KEY));
    }

    #[tokio::test]
    async fn test_config_without_auths_is_denied() {
        let review = review_with_secret(DOCKER_CONFIG_JSON_TYPE, Some(r#"{"aaa": "bbb"}"#));
        let (status, body) = call(test_state(), &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(message(&body), "bad docker config");
    }

    #[tokio::test]
    async fn test_empty_auths_is_denied() {
        let review = review_with_secret(DOCKER_CONFIG_JSON_TYPE, Some(r#"{"auths": {}}"#));
        let (status, body) = call(test_state(), &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(message(&body), "bad docker config");
    }

    #[tokio::test]
    async fn test_failing_credentials_are_denied_with_checker_message() {
        let review = review_with_secret(
            DOCKER_CONFIG_JSON_TYPE,
            Some(r#"{"auths": {"registry.example.com": {"username": "bogus", "password": "x"}}}"#),
        );
        let (status, body) = call(test_state(), &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(body["response"]["uid"], json!(TEST_UID));
        assert!(message(&body).contains("auth failed"));
    }

    #[tokio::test]
    async fn test_working_credentials_are_allowed() {
        let state = test_state();
        let calls = state.checker.calls.clone();
        let review = review_with_secret(
            DOCKER_CONFIG_JSON_TYPE,
            Some(r#"{"auths": {"registry.example.com": {"username": "valid", "password": "x"}}}"#),
        );
        let (status, body) = call(state, &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(true));
        assert_eq!(body["response"]["uid"], json!(TEST_UID));
        assert!(body["response"].get("status").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_registry_failure_short_circuits() {
        let state = test_state();
        let calls = state.checker.calls.clone();
        let review = review_with_secret(
            DOCKER_CONFIG_JSON_TYPE,
            Some(
                r#"{"auths": {
                    "first.example.com": {"username": "bogus", "password": "x"},
                    "second.example.com": {"username": "bogus", "password": "x"}
                }}"#,
            ),
        );
        let (status, body) = call(state, &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_registry_is_checked_on_success() {
        let state = test_state();
        let calls = state.checker.calls.clone();
        let review = review_with_secret(
            DOCKER_CONFIG_JSON_TYPE,
            Some(
                r#"{"auths": {
                    "first.example.com": {"username": "valid", "password": "x"},
                    "second.example.com": {"username": "valid", "password": "x"}
                }}"#,
            ),
        );
        let (status, body) = call(state, &review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_review_yields_same_verdict() {
        let review = review_with_secret(
            DOCKER_CONFIG_JSON_TYPE,
            Some(r#"{"auths": {"registry.example.com": {"username": "valid", "password": "x"}}}"#),
        );
        let (first_status, first_body) = call(test_state(), &review).await;
        let (second_status, second_body) = call(test_state(), &review).await;
        assert_eq!(first_status, second_status);
        assert_eq!(first_body, second_body);
    }
}
