//! Lifecycle decisions that do not touch the API server
//!
//! - what deleting a database does, given its termination policy
//! - building the DormantDatabase that preserves a halted database
//! - deciding whether a new MySQL may resume a DormantDatabase

use std::collections::BTreeMap;

use chrono::Utc;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::controller::error::Result;
use crate::crd::{
    DormantDatabase, DormantDatabaseSpec, DormantDatabaseStatus, DormantPhase, InitSpec, MySQL,
    MySQLSpec, Origin, OriginMeta, SecretReference, TerminationPolicy, default_auth_secret_name,
};
use crate::resources::common::{
    ANNOTATION_IGNORE, ANNOTATION_INIT_SPEC, KIND, LABEL_DATABASE_KIND, LABEL_DATABASE_NAME,
};

/// What the deletion path does with a database's data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationAction {
    /// Keep the finalizer and refuse to proceed
    Block,
    /// Preserve in a DormantDatabase, keep volumes and secret
    Halt,
    /// Halt requested but the ignore annotation is set: drop the finalizer only
    Skip,
    /// Remove volumes, keep the secret
    Delete,
    /// Remove volumes, secret and dormant record
    WipeOut,
}

/// Decide what deleting `db` does
pub fn termination_action(db: &MySQL) -> TerminationAction {
    if db.spec.is_deletion_locked() {
        return TerminationAction::Block;
    }
    match db.spec.termination_policy {
        TerminationPolicy::DoNotTerminate => TerminationAction::Block,
        TerminationPolicy::Halt if has_ignore_annotation(db) => TerminationAction::Skip,
        TerminationPolicy::Halt => TerminationAction::Halt,
        TerminationPolicy::Delete => TerminationAction::Delete,
        TerminationPolicy::WipeOut => TerminationAction::WipeOut,
    }
}

fn has_ignore_annotation(db: &MySQL) -> bool {
    db.annotations()
        .get(ANNOTATION_IGNORE)
        .is_some_and(|v| v != "false")
}

/// Spec with `init` removed and the auth secret reference filled in
pub fn normalized_spec(db: &MySQL) -> MySQLSpec {
    let mut spec = db.spec.clone();
    spec.init = None;
    if spec.database_secret.is_none() {
        spec.database_secret = Some(SecretReference {
            secret_name: default_auth_secret_name(&db.name_any()),
        });
    }
    spec
}

/// Build the DormantDatabase preserving a halted database
///
/// The origin spec is stored without `init`; the init spec itself is kept
/// as JSON in the `kubedb.com/init-spec` annotation.
pub fn dormant_from(db: &MySQL) -> Result<DormantDatabase> {
    let name = db.name_any();
    let namespace = db.namespace().unwrap_or_default();

    let mut annotations = BTreeMap::new();
    if let Some(init) = &db.spec.init {
        annotations.insert(ANNOTATION_INIT_SPEC.to_string(), serde_json::to_string(init)?);
    }

    let mut dormant = DormantDatabase::new(
        &name,
        DormantDatabaseSpec {
            origin: Origin {
                metadata: OriginMeta {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    labels: db.labels().clone(),
                    annotations: db.annotations().clone(),
                },
                spec: normalized_spec(db),
            },
            wipe_out: false,
            resume: false,
        },
    );
    dormant.metadata = ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(namespace),
        labels: Some(BTreeMap::from([
            (LABEL_DATABASE_KIND.to_string(), KIND.to_string()),
            (LABEL_DATABASE_NAME.to_string(), name),
        ])),
        annotations: Some(annotations),
        ..Default::default()
    };
    dormant.status = Some(DormantDatabaseStatus {
        phase: DormantPhase::Paused,
        reason: None,
        paused_time: Some(Utc::now().to_rfc3339()),
    });
    Ok(dormant)
}

/// Outcome of comparing a new MySQL with an existing DormantDatabase
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DormantMatch {
    /// The new database is the halted one; resume it
    Resume,
    /// The records conflict; creation must fail with this message
    Mismatch(String),
}

/// Decide whether `db` may take over `dormant`
///
/// `init` is compared against the annotation ignoring the `initialized`
/// marker; everything else must equal the origin spec once the auth secret
/// default is applied.
pub fn match_dormant(db: &MySQL, dormant: &DormantDatabase) -> DormantMatch {
    if dormant.labels().get(LABEL_DATABASE_KIND).map(String::as_str) != Some(KIND) {
        return DormantMatch::Mismatch(format!(
            "DormantDatabase \"{}\" exists for a different database kind",
            dormant.name_any()
        ));
    }

    if dormant.spec.wipe_out
        || dormant
            .status
            .as_ref()
            .is_some_and(|s| matches!(s.phase, DormantPhase::WipingOut | DormantPhase::WipedOut))
    {
        return DormantMatch::Mismatch(format!(
            "DormantDatabase \"{}\" has been wiped out; delete it before reusing the name",
            dormant.name_any()
        ));
    }

    if let Some(raw) = dormant.annotations().get(ANNOTATION_INIT_SPEC)
        && let Some(init) = &db.spec.init
    {
        match serde_json::from_str::<InitSpec>(raw) {
            Ok(stored) if same_init(&stored, init) => {}
            Ok(_) => {
                return DormantMatch::Mismatch(
                    "spec.init does not match the DormantDatabase init-spec annotation".to_string(),
                );
            }
            Err(e) => return DormantMatch::Mismatch(format!("invalid init-spec annotation: {}", e)),
        }
    }

    if dormant.spec.origin.spec != normalized_spec(db) {
        return DormantMatch::Mismatch(
            "MySQL spec does not match the origin spec of the DormantDatabase".to_string(),
        );
    }

    DormantMatch::Resume
}

fn same_init(a: &InitSpec, b: &InitSpec) -> bool {
    InitSpec {
        initialized: false,
        ..a.clone()
    } == InitSpec {
        initialized: false,
        ..b.clone()
    }
}

/// Rebuild the MySQL object recorded in a DormantDatabase
pub fn mysql_from_dormant(dormant: &DormantDatabase) -> Result<MySQL> {
    let origin = &dormant.spec.origin;
    let mut spec = origin.spec.clone();
    if let Some(raw) = dormant.annotations().get(ANNOTATION_INIT_SPEC) {
        let mut init: InitSpec = serde_json::from_str(raw)?;
        // data already lives on the preserved volumes
        init.initialized = true;
        spec.init = Some(init);
    }

    let mut db = MySQL::new(&origin.metadata.name, spec);
    db.metadata.namespace = Some(origin.metadata.namespace.clone());
    if !origin.metadata.labels.is_empty() {
        db.metadata.labels = Some(origin.metadata.labels.clone());
    }
    if !origin.metadata.annotations.is_empty() {
        db.metadata.annotations = Some(origin.metadata.annotations.clone());
    }
    Ok(db)
}

/// Whether an auth secret is still referenced by another database
///
/// `self_name` is the database being wiped out; its own MySQL and dormant
/// record do not count.
pub fn secret_referenced(
    secret_name: &str,
    self_name: &str,
    databases: &[MySQL],
    dormants: &[DormantDatabase],
) -> bool {
    let by_database = databases
        .iter()
        .filter(|db| db.name_any() != self_name)
        .any(|db| db.auth_secret_name() == secret_name);
    let by_dormant = dormants
        .iter()
        .filter(|d| d.name_any() != self_name)
        .any(|d| {
            d.spec
                .origin
                .spec
                .database_secret
                .as_ref()
                .is_some_and(|s| s.secret_name == secret_name)
        });
    by_database || by_dormant
}
