// src/provision.rs

use crate::config::Config;
use crate::directory::{LocalDirectory, ProfileUpdate, UserId};
use crate::error::BridgeError;
use crate::model::Claims;
use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, info};

/// Whether reconciliation created the local user or updated an existing one.
/// Returned explicitly so callers (e.g. outbound sync triggers) can react
/// without any event-bus indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Updated,
}

/// Reconciles verified claims into the local user directory.
///
/// Looks the user up by email (the sole join key), creates one when absent,
/// applies non-empty profile claims, and maps the role claim. Returns the
/// local user id together with the created/updated outcome.
pub async fn reconcile(
    claims: &Claims,
    directory: &dyn LocalDirectory,
    config: &Config,
) -> Result<(UserId, ProvisionOutcome), BridgeError> {
    let email = claims
        .non_empty(&config.email_claim)
        .filter(|e| is_plausible_email(e))
        .ok_or(BridgeError::MissingEmailClaim)?;

    let first_name = claims.non_empty("given_name");
    let last_name = claims.non_empty("family_name");
    let display_name = claims.non_empty(&config.display_name_claim);

    let existing = directory
        .find_by_email(email)
        .await
        .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?;

    let (user_id, outcome) = match existing {
        Some(id) => (id, ProvisionOutcome::Updated),
        None => {
            let candidate = username_candidate(claims, config, email, first_name, last_name);
            let username = unique_username(&candidate, directory).await?;
            let password = generate_credential(20);
            let id = directory
                .create_user(&username, &password, email)
                .await
                .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?;
            info!(user_id = id, %username, "provisioned new local user");
            (id, ProvisionOutcome::Created)
        }
    };

    let update = ProfileUpdate {
        first_name: first_name.map(str::to_string),
        last_name: last_name.map(str::to_string),
        display_name: display_name.map(str::to_string),
    };
    if !update.is_empty() {
        directory
            .update_profile(user_id, update)
            .await
            .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?;
    }

    apply_role_mapping(claims, user_id, directory, config).await?;

    Ok((user_id, outcome))
}

/// Exact-match lookup in the mapping, falling back to the default role.
/// Pure and deterministic: the same claim value always yields the same role
/// for a given configuration.
pub fn resolve_role<'a>(
    claim_value: &str,
    mapping: &'a HashMap<String, String>,
    default_role: &'a str,
) -> &'a str {
    mapping.get(claim_value).map(String::as_str).unwrap_or(default_role)
}

async fn apply_role_mapping(
    claims: &Claims,
    user_id: UserId,
    directory: &dyn LocalDirectory,
    config: &Config,
) -> Result<(), BridgeError> {
    let claim_value = claims.str(&config.role_claim).unwrap_or("");
    let mapped = resolve_role(claim_value, &config.role_mapping, &config.default_role);

    let current = directory
        .primary_role(user_id)
        .await
        .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?
        .filter(|r| !r.is_empty());

    // A manually elevated role is never overwritten when the guard is on.
    let should_set = match (&current, config.only_set_role_if_current_is_default) {
        (None, _) => true,
        (Some(_), false) => true,
        (Some(role), true) => role == &config.default_role,
    };

    if should_set && !mapped.is_empty() {
        directory
            .set_role(user_id, mapped)
            .await
            .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?;
        debug!(user_id, claim_value, mapped, "applied role mapping");
    } else {
        debug!(user_id, claim_value, mapped, "role mapping skipped");
    }
    Ok(())
}

/// Username derivation priority: configured claim, provider preferred
/// username, given[-family] name, email local-part.
fn username_candidate(
    claims: &Claims,
    config: &Config,
    email: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> String {
    if let Some(name) = claims.non_empty(&config.username_claim) {
        return name.to_string();
    }
    if let Some(name) = claims.non_empty("preferred_username") {
        return name.to_string();
    }
    if let Some(first) = first_name {
        return match last_name {
            Some(last) => format!("{first}-{last}"),
            None => first.to_string(),
        };
    }
    email.split('@').next().unwrap_or_default().to_string()
}

/// Restricts a candidate to the directory's username charset and appends the
/// smallest positive integer suffix that avoids a collision.
async fn unique_username(
    candidate: &str,
    directory: &dyn LocalDirectory,
) -> Result<String, BridgeError> {
    let base = sanitize_username(candidate);
    let mut username = base.clone();
    let mut suffix = 1u32;
    while directory
        .username_exists(&username)
        .await
        .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?
    {
        username = format!("{base}{suffix}");
        suffix += 1;
    }
    Ok(username)
}

fn sanitize_username(raw: &str) -> String {
    let sanitized: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if sanitized.is_empty() {
        "user".to_string()
    } else {
        sanitized
    }
}

const CREDENTIAL_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+";

/// A strong random credential for newly provisioned users. It is never shown
/// to the visitor; authentication happens through the established session.
fn generate_credential(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CREDENTIAL_CHARSET[rng.random_range(0..CREDENTIAL_CHARSET.len())] as char)
        .collect()
}

/// Minimal syntactic email check: one `@` with non-empty local and domain
/// parts, no whitespace. The directory applies its own stricter rules.
fn is_plausible_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}
