//! Reconciliation of DormantDatabase records
//!
//! A dormant record is inert until a user sets `spec.wipeOut` (delete the
//! preserved volumes and secret) or `spec.resume` (recreate the MySQL).

use std::sync::Arc;

use chrono::Utc;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::lifecycle::mysql_from_dormant;
use crate::controller::reconciler::{delete_auth_secret, delete_volumes};
use crate::crd::{DormantDatabase, DormantDatabaseStatus, DormantPhase, MySQL, default_auth_secret_name};
use crate::events::{actions, reasons};
use crate::resources::common::FIELD_MANAGER;

/// What a dormant record asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DormantAction {
    /// Nothing to do until the spec changes
    Idle,
    WipeOut,
    Resume,
}

/// Decide what to do with a dormant record; wiping out wins over resuming
pub fn dormant_action(dormant: &DormantDatabase) -> DormantAction {
    let phase = dormant.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if phase == DormantPhase::WipedOut {
        return DormantAction::Idle;
    }
    if dormant.spec.wipe_out {
        return DormantAction::WipeOut;
    }
    if dormant.spec.resume {
        return DormantAction::Resume;
    }
    DormantAction::Idle
}

/// Reconcile a DormantDatabase
#[instrument(skip(dormant, ctx), fields(name = %dormant.name_any(), namespace = dormant.namespace().unwrap_or_default()))]
pub async fn reconcile_dormant(dormant: Arc<DormantDatabase>, ctx: Arc<Context>) -> Result<Action> {
    if dormant.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    let ns = dormant.namespace().unwrap_or_default();

    match dormant_action(&dormant) {
        DormantAction::Idle => Ok(Action::await_change()),
        DormantAction::WipeOut => wipe_out(&dormant, &ctx, &ns).await,
        DormantAction::Resume => resume(&dormant, &ctx, &ns).await,
    }
}

/// Error policy for the dormant controller
pub fn dormant_error_policy(dormant: Arc<DormantDatabase>, error: &Error, _ctx: Arc<Context>) -> Action {
    let delay = BackoffConfig::default().delay_for_error(error, 0);
    if error.is_retryable() {
        warn!(name = %dormant.name_any(), error = %error, ?delay, "Retryable error, requeuing");
    } else {
        error!(name = %dormant.name_any(), error = %error, ?delay, "Non-retryable error, requeuing");
    }
    Action::requeue(delay)
}

async fn set_status(
    dormant: &DormantDatabase,
    ctx: &Context,
    ns: &str,
    phase: DormantPhase,
    reason: Option<String>,
) -> Result<()> {
    let api: Api<DormantDatabase> = Api::namespaced(ctx.client.clone(), ns);
    let previous = dormant.status.clone().unwrap_or_default();
    let status = DormantDatabaseStatus {
        phase,
        reason,
        paused_time: previous.paused_time.or_else(|| Some(Utc::now().to_rfc3339())),
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&dormant.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn wipe_out(dormant: &DormantDatabase, ctx: &Context, ns: &str) -> Result<Action> {
    let db_name = dormant.spec.origin.metadata.name.clone();
    info!(database = %db_name, "Wiping out dormant database");
    ctx.normal(dormant, reasons::WIPING_OUT, actions::WIPE_OUT, "Wiping out data and secrets".to_string()).await;
    set_status(dormant, ctx, ns, DormantPhase::WipingOut, None).await?;

    let secret_name = dormant
        .spec
        .origin
        .spec
        .database_secret
        .as_ref()
        .map(|s| s.secret_name.clone())
        .unwrap_or_else(|| default_auth_secret_name(&db_name));

    let wiped = async {
        delete_volumes(ctx, ns, &db_name).await?;
        delete_auth_secret(ctx, ns, &db_name, &secret_name).await
    }
    .await;

    match wiped {
        Ok(()) => {
            set_status(dormant, ctx, ns, DormantPhase::WipedOut, None).await?;
            let message = "Successfully wiped out".to_string();
            ctx.normal(dormant, reasons::SUCCESSFUL_WIPE_OUT, actions::WIPE_OUT, message).await;
            Ok(Action::await_change())
        }
        Err(e) => {
            ctx.warn(dormant, reasons::FAILED_TO_WIPE_OUT, actions::WIPE_OUT, e.to_string()).await;
            set_status(dormant, ctx, ns, DormantPhase::Failed, Some(e.to_string())).await?;
            Err(e)
        }
    }
}

/// Recreate the MySQL; its own reconcile matches this record, resumes and
/// deletes it
async fn resume(dormant: &DormantDatabase, ctx: &Context, ns: &str) -> Result<Action> {
    let api: Api<MySQL> = Api::namespaced(ctx.client.clone(), ns);
    let db = mysql_from_dormant(dormant)?;
    let db_name = db.name_any();

    if dormant.status.as_ref().map(|s| s.phase) != Some(DormantPhase::Resuming) {
        set_status(dormant, ctx, ns, DormantPhase::Resuming, None).await?;
        ctx.normal(dormant, reasons::RESUMING, actions::RESUME, format!("Resuming MySQL \"{}\"", db_name)).await;
    }

    if api.get_opt(&db_name).await?.is_some() {
        return Ok(Action::await_change());
    }

    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    match api.create(&params, &db).await {
        Ok(_) => {
            info!(database = %db_name, "Recreated MySQL from dormant database");
            Ok(Action::await_change())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(Action::await_change()),
        Err(e) => {
            ctx.warn(dormant, reasons::FAILED_TO_CREATE, actions::RESUME, e.to_string()).await;
            Err(e.into())
        }
    }
}
