//! Unit tests for admission webhook decisions
//!
//! Policy internals are tested next to the policies in src/webhooks/policies;
//! these tests drive the public `admit` entry point and the HTTP router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::*;
use mysql_operator::controller::validation::ClusterLookup;
use mysql_operator::crd::{MySQL, MySQLVersion, TerminationPolicy};
use mysql_operator::webhooks::{
    AdmissionDecision, AdmissionInput, AdmissionOperation, WebhookState, admit,
    create_webhook_router,
};

fn input(operation: AdmissionOperation, object: Option<MySQL>, old: Option<MySQL>) -> AdmissionInput {
    AdmissionInput {
        operation,
        namespace: "default".to_string(),
        name: "db".to_string(),
        object,
        old_object: old,
    }
}

fn denied_reason(decision: &AdmissionDecision) -> &str {
    match decision {
        AdmissionDecision::Denied { reason, .. } => reason,
        other => panic!("expected a denial, got {:?}", other),
    }
}

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_create_allowed() {
        let lookup = InMemoryLookup::with_catalog();
        let decision = admit(
            &lookup,
            &input(AdmissionOperation::Create, Some(create_test_mysql("db", "default")), None),
        )
        .await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_invalid_create_forbidden() {
        let lookup = InMemoryLookup::with_catalog();
        let db = MySQLBuilder::new("db", "default").with_version("9.9").build();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, Some(db), None)).await;
        assert_eq!(decision.code(), 403);
        assert_eq!(denied_reason(&decision), "InvalidSpec");
    }

    #[tokio::test]
    async fn test_version_missing_from_catalog_denied() {
        let lookup = InMemoryLookup::with_catalog();
        let db = MySQLBuilder::new("db", "default").with_version("3.0").build();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, Some(db), None)).await;
        assert!(!decision.is_allowed());
        assert_ne!(decision.code(), 500);
        assert_eq!(decision.code(), 403);
        assert_eq!(denied_reason(&decision), "InvalidSpec");
    }

    #[tokio::test]
    async fn test_group_of_eleven_denied() {
        let lookup = InMemoryLookup::with_catalog();
        let db = MySQLBuilder::group_replication("db", "default")
            .with_replicas(11)
            .build();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, Some(db), None)).await;
        assert_eq!(decision.code(), 403);
        assert_eq!(denied_reason(&decision), "InvalidSpec");
    }

    #[tokio::test]
    async fn test_group_of_one_denied() {
        let lookup = InMemoryLookup::with_catalog();
        let db = MySQLBuilder::group_replication("db", "default")
            .with_replicas(1)
            .build();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, Some(db), None)).await;
        assert_eq!(decision.code(), 403);
    }

    #[tokio::test]
    async fn test_group_of_five_allowed() {
        let lookup = InMemoryLookup::with_catalog();
        let db = MySQLBuilder::new("db", "default")
            .with_version("8.0.23")
            .with_replicas(5)
            .with_group("dc002fc3-c412-4d18-b1d4-66c1fbfbbc9b")
            .build();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, Some(db), None)).await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_create_without_object_is_bad_request() {
        let lookup = InMemoryLookup::with_catalog();
        let decision = admit(&lookup, &input(AdmissionOperation::Create, None, None)).await;
        assert_eq!(decision.code(), 400);
    }

    #[tokio::test]
    async fn test_lookup_outage_fails_closed() {
        let lookup = InMemoryLookup::with_catalog().unavailable();
        let decision = admit(
            &lookup,
            &input(AdmissionOperation::Create, Some(create_test_mysql("db", "default")), None),
        )
        .await;
        assert!(matches!(decision, AdmissionDecision::Failed { .. }));
        assert_eq!(decision.code(), 500);
        assert!(!decision.is_allowed());
    }
}

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_unchanged_spec_allowed_without_lookup() {
        // metadata-only updates must not depend on the catalog
        let lookup = InMemoryLookup::with_catalog().unavailable();
        let old = create_test_mysql("db", "default");
        let mut new = old.clone();
        new.metadata.labels = Some([("team".to_string(), "dba".to_string())].into());
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_scaling_allowed() {
        let lookup = InMemoryLookup::with_catalog();
        let old = create_test_mysql("db", "default");
        let new = MySQLBuilder::new("db", "default").with_replicas(2).build();
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_storage_class_change_denied() {
        let lookup = InMemoryLookup::with_catalog().with_storage_class("fast-ssd");
        let old = create_test_mysql("db", "default");
        let new = MySQLBuilder::new("db", "default")
            .with_storage_class(Some("fast-ssd"))
            .build();
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(denied_reason(&decision), "StorageClassImmutable");
    }

    #[tokio::test]
    async fn test_storage_type_change_denied() {
        let lookup = InMemoryLookup::with_catalog();
        let old = create_test_mysql("db", "default");
        let new = MySQLBuilder::new("db", "default").ephemeral().build();
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(denied_reason(&decision), "StorageTypeImmutable");
    }

    #[tokio::test]
    async fn test_init_change_after_initialization_denied() {
        let lookup = InMemoryLookup::with_catalog();
        let old = MySQLBuilder::new("db", "default")
            .with_snapshot_init("snap-1", false)
            .initialized()
            .build();
        let new = MySQLBuilder::new("db", "default")
            .with_snapshot_init("snap-2", false)
            .initialized()
            .build();
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(denied_reason(&decision), "InitImmutable");
    }

    #[tokio::test]
    async fn test_update_still_validates_spec() {
        let lookup = InMemoryLookup::with_catalog();
        let old = create_test_mysql("db", "default");
        let new = MySQLBuilder::new("db", "default").with_replicas(-1).build();
        let decision = admit(&lookup, &input(AdmissionOperation::Update, Some(new), Some(old))).await;
        assert_eq!(denied_reason(&decision), "InvalidSpec");
    }

    #[tokio::test]
    async fn test_update_without_old_object_is_bad_request() {
        let lookup = InMemoryLookup::with_catalog();
        let decision = admit(
            &lookup,
            &input(AdmissionOperation::Update, Some(create_test_mysql("db", "default")), None),
        )
        .await;
        assert_eq!(decision.code(), 400);
    }
}

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_database_allowed() {
        let lookup = InMemoryLookup::with_catalog();
        let decision = admit(&lookup, &input(AdmissionOperation::Delete, None, None)).await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_halt_policy_allowed() {
        let lookup = InMemoryLookup::with_catalog().with_mysql(create_test_mysql("db", "default"));
        let decision = admit(&lookup, &input(AdmissionOperation::Delete, None, None)).await;
        assert_eq!(decision, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn test_do_not_terminate_denied() {
        let db = MySQLBuilder::new("db", "default")
            .with_termination_policy(TerminationPolicy::DoNotTerminate)
            .build();
        let lookup = InMemoryLookup::with_catalog().with_mysql(db);
        let decision = admit(&lookup, &input(AdmissionOperation::Delete, None, None)).await;
        assert_eq!(decision.code(), 403);
        assert_eq!(denied_reason(&decision), "DeletionLocked");
    }

    #[tokio::test]
    async fn test_do_not_pause_denied() {
        let db = MySQLBuilder::new("db", "default").with_do_not_pause().build();
        let lookup = InMemoryLookup::with_catalog().with_mysql(db);
        let decision = admit(&lookup, &input(AdmissionOperation::Delete, None, None)).await;
        assert_eq!(denied_reason(&decision), "DeletionLocked");
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let lookup = InMemoryLookup::with_catalog().unavailable();
        let decision = admit(&lookup, &input(AdmissionOperation::Delete, None, None)).await;
        assert!(matches!(decision, AdmissionDecision::Failed { .. }));
    }
}

mod router_tests {
    use super::*;

    async fn post_review(
        lookup: impl ClusterLookup + 'static,
        review: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let app = create_webhook_router(Arc::new(WebhookState::new(Arc::new(lookup))));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/validate")
                    .header("content-type", "application/json")
                    .body(Body::from(review.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn review(operation: &str, object: Option<&MySQL>) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "review-1",
                "operation": operation,
                "namespace": "default",
                "name": "db",
                "object": object.map(|db| serde_json::to_value(db).unwrap()),
            }
        })
    }

    #[tokio::test]
    async fn test_allowed_review() {
        let db = create_test_mysql("db", "default");
        let (status, body) = post_review(InMemoryLookup::with_catalog(), review("CREATE", Some(&db))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(body["kind"], "AdmissionReview");
        assert_eq!(body["response"]["uid"], "review-1");
        assert_eq!(body["response"]["allowed"], true);
        assert!(body["response"].get("status").is_none());
    }

    #[tokio::test]
    async fn test_denied_review() {
        let db = MySQLBuilder::new("db", "default").with_replicas(-3).build();
        let (status, body) = post_review(InMemoryLookup::with_catalog(), review("CREATE", Some(&db))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], false);
        assert_eq!(body["response"]["status"]["code"], 403);
        assert_eq!(body["response"]["status"]["reason"], "InvalidSpec");
    }

    #[tokio::test]
    async fn test_unknown_operation_review() {
        let (_, body) = post_review(InMemoryLookup::with_catalog(), review("PATCH", None)).await;
        assert_eq!(body["response"]["allowed"], false);
        assert_eq!(body["response"]["status"]["code"], 400);
    }

    #[tokio::test]
    async fn test_review_without_request() {
        let (status, body) = post_review(
            InMemoryLookup::with_catalog(),
            serde_json::json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["response"]["allowed"], false);
    }

    /// Lookup whose every call panics
    struct BrokenLookup;

    #[async_trait]
    impl ClusterLookup for BrokenLookup {
        async fn mysql_version(&self, _name: &str) -> Result<Option<MySQLVersion>, kube::Error> {
            panic!("catalog cache poisoned")
        }

        async fn storage_class_exists(&self, _name: &str) -> Result<bool, kube::Error> {
            panic!("catalog cache poisoned")
        }

        async fn secret_exists(&self, _namespace: &str, _name: &str) -> Result<bool, kube::Error> {
            panic!("catalog cache poisoned")
        }

        async fn mysql(&self, _namespace: &str, _name: &str) -> Result<Option<MySQL>, kube::Error> {
            panic!("catalog cache poisoned")
        }
    }

    #[tokio::test]
    async fn test_panicking_lookup_answers_internal_error() {
        let db = create_test_mysql("db", "default");
        let (status, body) = post_review(BrokenLookup, review("CREATE", Some(&db))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["uid"], "review-1");
        assert_eq!(body["response"]["allowed"], false);
        assert_eq!(body["response"]["status"]["code"], 500);
        assert_eq!(body["response"]["status"]["reason"], "InternalError");
    }
}
