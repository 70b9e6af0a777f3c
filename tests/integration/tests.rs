//! Fast integration tests for mysql-operator
//!
//! These tests verify the objects the operator writes and the lifecycle it
//! drives. They do NOT wait for MySQL pods to become ready, which would
//! require pulling images and starting mysqld.
//!
//! Tests verify:
//! - StatefulSet, Services and the auth Secret are created with owner references
//! - The finalizer is added, and removed according to the termination policy
//! - Invalid specs end in the Failed phase with a reason
//! - Halting preserves the database in a DormantDatabase that can be wiped out

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::Api;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use mysql_operator::crd::{
    DatabasePhase, DormantDatabase, DormantPhase, MySQL, MySQLVersion, TerminationPolicy,
};

use crate::common::{MySQLBuilder, create_test_version};
use crate::{
    FAST_TIMEOUT, ScopedOperator, SharedTestCluster, TestNamespace, dormant_phase,
    ensure_crds_installed, generation_observed, has_finalizer, has_reason, is_deleted, is_phase,
    wait_for, wait_for_resource,
};

/// Test context that holds the operator for the test duration
struct TestContext {
    client: kube::Client,
    ns: TestNamespace,
    _operator: ScopedOperator,
    _cluster: std::sync::Arc<SharedTestCluster>,
}

impl TestContext {
    fn mysqls(&self) -> Api<MySQL> {
        Api::namespaced(self.client.clone(), self.ns.name())
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), self.ns.name())
    }

    async fn create(&self, db: &MySQL) {
        self.mysqls()
            .create(&PostParams::default(), db)
            .await
            .expect("create MySQL");
    }

    async fn cleanup(self) {
        self.ns.cleanup().await.ok();
    }
}

/// Set up test infrastructure: CRDs, the `8.0` catalog entry, a namespace and an operator
async fn setup(prefix: &str) -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,kube=warn")
        .with_test_writer()
        .try_init();

    let cluster = SharedTestCluster::get().await.expect("Failed to get cluster");
    ensure_crds_installed(&cluster).await.expect("Failed to install CRDs");

    let client = cluster.new_client().await.expect("Failed to create client");

    let versions: Api<MySQLVersion> = Api::all(client.clone());
    versions
        .patch(
            "8.0",
            &PatchParams::apply("integration-test").force(),
            &Patch::Apply(&create_test_version("8.0", "8.0.23", false)),
        )
        .await
        .expect("apply MySQLVersion");

    let ns = TestNamespace::create(client.clone(), prefix)
        .await
        .expect("create ns");
    let operator = ScopedOperator::start(client.clone(), ns.name()).await;

    TestContext {
        client,
        ns,
        _operator: operator,
        _cluster: cluster,
    }
}

/// MySQL using the cluster default storage class
fn database(name: &str, namespace: &str) -> MySQLBuilder {
    MySQLBuilder::new(name, namespace)
        .with_storage_class(None)
        .with_termination_policy(TerminationPolicy::Delete)
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_creates_child_resources() {
    let ctx = setup("my-res").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(&database("res", &ns).build()).await;

    wait_for(&ctx.mysqls(), "res", is_phase(DatabasePhase::Running), FAST_TIMEOUT)
        .await
        .expect("database should reach Running");

    let sts = wait_for_resource(&ctx.api::<StatefulSet>(), "res", FAST_TIMEOUT)
        .await
        .expect("StatefulSet should exist");
    let owner = sts
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first())
        .expect("StatefulSet should be owned");
    assert_eq!(owner.kind, "MySQL");
    assert_eq!(owner.name, "res");
    assert_eq!(sts.spec.unwrap().service_name.as_deref(), Some("kubedb"));

    wait_for_resource(&ctx.api::<Service>(), "res", FAST_TIMEOUT)
        .await
        .expect("primary Service should exist");
    wait_for_resource(&ctx.api::<Service>(), "kubedb", FAST_TIMEOUT)
        .await
        .expect("governing Service should exist");
    let secret = wait_for_resource(&ctx.api::<Secret>(), "res-auth", FAST_TIMEOUT)
        .await
        .expect("auth Secret should exist");
    assert!(secret.metadata.owner_references.is_none());

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_finalizer_and_generation() {
    let ctx = setup("my-fin").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(&database("fin", &ns).build()).await;

    wait_for(&ctx.mysqls(), "fin", has_finalizer(), FAST_TIMEOUT)
        .await
        .expect("finalizer should be added");
    wait_for(&ctx.mysqls(), "fin", generation_observed(), FAST_TIMEOUT)
        .await
        .expect("generation should be observed");

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_unknown_version_fails() {
    let ctx = setup("my-inv").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(&database("inv", &ns).with_version("0.1").build()).await;

    wait_for(&ctx.mysqls(), "inv", is_phase(DatabasePhase::Failed), FAST_TIMEOUT)
        .await
        .expect("database should fail");
    wait_for(&ctx.mysqls(), "inv", has_reason("0.1"), FAST_TIMEOUT)
        .await
        .expect("reason should name the version");

    let sts = ctx.api::<StatefulSet>().get_opt("inv").await.expect("get");
    assert!(sts.is_none(), "no StatefulSet for an invalid spec");

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_scale_updates_statefulset() {
    let ctx = setup("my-scale").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(&database("scale", &ns).build()).await;

    wait_for(&ctx.mysqls(), "scale", is_phase(DatabasePhase::Running), FAST_TIMEOUT)
        .await
        .expect("database should reach Running");

    ctx.mysqls()
        .patch(
            "scale",
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"spec": {"replicas": 2}})),
        )
        .await
        .expect("patch replicas");
    wait_for(&ctx.mysqls(), "scale", generation_observed(), FAST_TIMEOUT)
        .await
        .expect("new generation should be observed");

    let sts = ctx.api::<StatefulSet>().get("scale").await.expect("get");
    assert_eq!(sts.spec.unwrap().replicas, Some(2));

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_delete_policy_leaves_no_dormant() {
    let ctx = setup("my-del").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(&database("del", &ns).build()).await;

    wait_for(&ctx.mysqls(), "del", has_finalizer(), FAST_TIMEOUT)
        .await
        .expect("finalizer should be added");
    ctx.mysqls()
        .delete("del", &DeleteParams::default())
        .await
        .expect("delete");
    wait_for(&ctx.mysqls(), "del", is_deleted(), FAST_TIMEOUT)
        .await
        .expect("MySQL should be gone");

    let dormant = ctx.api::<DormantDatabase>().get_opt("del").await.expect("get");
    assert!(dormant.is_none());
    let secret = ctx.api::<Secret>().get_opt("del-auth").await.expect("get");
    assert!(secret.is_some(), "Delete keeps the auth Secret");

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_do_not_terminate_blocks_deletion() {
    let ctx = setup("my-lock").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(
        &database("lock", &ns)
            .with_termination_policy(TerminationPolicy::DoNotTerminate)
            .build(),
    )
    .await;

    wait_for(&ctx.mysqls(), "lock", has_finalizer(), FAST_TIMEOUT)
        .await
        .expect("finalizer should be added");
    ctx.mysqls()
        .delete("lock", &DeleteParams::default())
        .await
        .expect("delete");

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    let db = ctx.mysqls().get("lock").await.expect("database should still exist");
    assert!(db.metadata.deletion_timestamp.is_some());

    // release the lock so the namespace can go away
    ctx.mysqls()
        .patch(
            "lock",
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"spec": {"terminationPolicy": "Delete"}})),
        )
        .await
        .expect("patch policy");
    wait_for(&ctx.mysqls(), "lock", is_deleted(), FAST_TIMEOUT)
        .await
        .expect("MySQL should be gone once unlocked");

    ctx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_halt_then_wipe_out() {
    let ctx = setup("my-halt").await;
    let ns = ctx.ns.name().to_string();
    ctx.create(
        &database("halt", &ns)
            .with_termination_policy(TerminationPolicy::Halt)
            .build(),
    )
    .await;

    wait_for(&ctx.mysqls(), "halt", is_phase(DatabasePhase::Running), FAST_TIMEOUT)
        .await
        .expect("database should reach Running");
    ctx.mysqls()
        .delete("halt", &DeleteParams::default())
        .await
        .expect("delete");
    wait_for(&ctx.mysqls(), "halt", is_deleted(), FAST_TIMEOUT)
        .await
        .expect("MySQL should be gone");

    let dormants = ctx.api::<DormantDatabase>();
    wait_for(&dormants, "halt", dormant_phase(DormantPhase::Paused), FAST_TIMEOUT)
        .await
        .expect("DormantDatabase should be Paused");
    assert!(ctx.api::<Secret>().get_opt("halt-auth").await.expect("get").is_some());

    dormants
        .patch(
            "halt",
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"spec": {"wipeOut": true}})),
        )
        .await
        .expect("request wipe out");
    wait_for(&dormants, "halt", dormant_phase(DormantPhase::WipedOut), FAST_TIMEOUT)
        .await
        .expect("DormantDatabase should be WipedOut");
    assert!(ctx.api::<Secret>().get_opt("halt-auth").await.expect("get").is_none());

    ctx.cleanup().await;
}
