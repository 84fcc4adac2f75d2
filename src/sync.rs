// src/sync.rs

use crate::config::Config;
use crate::directory::{DirectoryAttribute, DirectoryClient, DirectoryError, UserSnapshot};
use crate::error::BridgeError;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// What caused a sync attempt. Each trigger has its own enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Created,
    Updated,
}

impl From<crate::provision::ProvisionOutcome> for SyncTrigger {
    fn from(outcome: crate::provision::ProvisionOutcome) -> Self {
        match outcome {
            crate::provision::ProvisionOutcome::Created => SyncTrigger::Created,
            crate::provision::ProvisionOutcome::Updated => SyncTrigger::Updated,
        }
    }
}

/// A local user event handed to the outbound sync path. Carries a full
/// snapshot so the sync never reads back from the local directory.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub user: UserSnapshot,
    pub trigger: SyncTrigger,
    /// A raw credential from the upstream event (e.g. a password reset);
    /// pushed as a permanent provider credential after a successful write.
    pub raw_password: Option<String>,
}

/// The distinguishable result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The provider-side identity was updated in place.
    Updated,
    /// The update hit "subject not found" and fell back to a create.
    Created,
    /// Sync was disabled or preconditions were missing; nothing was sent.
    Skipped(&'static str),
}

/// Pushes a local user snapshot to the remote directory service.
///
/// Upsert is try-update-then-create: the update call goes first and a
/// `NotFound` answer falls directly into a create with the identical
/// attribute set. There is no existence pre-check, so no window between
/// check and create.
#[instrument(skip(event, config, client), fields(user_id = event.user.id), err)]
pub async fn sync_user(
    event: &SyncEvent,
    config: &Config,
    client: &dyn DirectoryClient,
) -> Result<SyncOutcome, BridgeError> {
    if !config.sync_enabled {
        return Ok(SyncOutcome::Skipped("sync disabled"));
    }
    let trigger_enabled = match event.trigger {
        SyncTrigger::Created => config.sync_on_create,
        SyncTrigger::Updated => config.sync_on_update,
    };
    if !trigger_enabled {
        return Ok(SyncOutcome::Skipped("trigger disabled"));
    }
    let Some(pool_id) = config.user_pool_id.as_deref() else {
        warn!("directory sync enabled but user_pool_id is not configured");
        return Ok(SyncOutcome::Skipped("missing pool id"));
    };
    if event.user.email.is_empty() {
        warn!(user_id = event.user.id, "directory sync skipped: user has no email");
        return Ok(SyncOutcome::Skipped("missing email"));
    }

    let attributes = build_attributes(&event.user, config);
    let username = event.user.username.as_str();

    let outcome = match client
        .update_user_attributes(pool_id, username, &attributes)
        .await
    {
        Ok(()) => SyncOutcome::Updated,
        Err(DirectoryError::NotFound) => {
            debug!(%username, "remote identity absent, falling back to create");
            client
                .create_user(pool_id, username, &attributes)
                .await
                .map_err(|e| BridgeError::DirectorySyncFailed {
                    operation: "create".to_string(),
                    reason: e.to_string(),
                })?;
            SyncOutcome::Created
        }
        Err(e) => {
            return Err(BridgeError::DirectorySyncFailed {
                operation: "update".to_string(),
                reason: e.to_string(),
            })
        }
    };

    if let Some(password) = event.raw_password.as_deref().filter(|p| !p.is_empty()) {
        client
            .set_password(pool_id, username, password, true)
            .await
            .map_err(|e| BridgeError::DirectorySyncFailed {
                operation: "set_password".to_string(),
                reason: e.to_string(),
            })?;
    }

    info!(%username, ?outcome, "directory sync complete");
    Ok(outcome)
}

/// Best-effort wrapper for call sites inside local user operations: failures
/// are recorded and returned as a report, never as an error the triggering
/// operation would see.
pub async fn sync_user_best_effort(
    event: &SyncEvent,
    config: &Config,
    client: &dyn DirectoryClient,
) -> SyncOutcome {
    match sync_user(event, config, client).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(user_id = event.user.id, error = %e, "directory sync failed");
            SyncOutcome::Skipped("sync failed")
        }
    }
}

/// The fixed attribute set mirrored to the provider, in wire order.
fn build_attributes(user: &UserSnapshot, config: &Config) -> Vec<DirectoryAttribute> {
    let full_name = {
        let joined = format!("{} {}", user.first_name, user.last_name);
        let joined = joined.trim();
        if joined.is_empty() {
            user.display_name.clone()
        } else {
            joined.to_string()
        }
    };
    let role = user
        .primary_role()
        .unwrap_or(config.default_role.as_str())
        .to_string();

    vec![
        DirectoryAttribute::new("name", full_name),
        DirectoryAttribute::new("given_name", user.first_name.as_str()),
        DirectoryAttribute::new("family_name", user.last_name.as_str()),
        DirectoryAttribute::new("email", user.email.as_str()),
        DirectoryAttribute::new("email_verified", "true"),
        DirectoryAttribute::new("phone_number", user.phone.as_str()),
        DirectoryAttribute::new(
            "phone_number_verified",
            if user.phone.is_empty() { "false" } else { "true" },
        ),
        DirectoryAttribute::new("address", format_address(user)),
        DirectoryAttribute::new(config.sync_role_attribute.as_str(), role),
    ]
}

/// The provider's `address` attribute: a JSON object with a formatted line
/// plus the individual components.
fn format_address(user: &UserSnapshot) -> String {
    let a = &user.address;
    let street = format!("{} {}", a.street_address, a.extended_address);
    let street = street.trim();
    let formatted = format!("{street}, {}, {}, {}", a.locality, a.postal_code, a.country);
    json!({
        "formatted": formatted.trim(),
        "street_address": street,
        "locality": a.locality,
        "region": a.region,
        "postal_code": a.postal_code,
        "country": a.country,
    })
    .to_string()
}
