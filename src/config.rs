// src/config.rs

use crate::error::BridgeError;
use std::collections::HashMap;
use url::Url;

/// The main configuration for the SSO bridge.
///
/// Holds everything needed to talk to the hosted identity provider and to
/// reconcile verified claims into the local user directory. Construct it
/// with [`ConfigBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Hosted provider domain, e.g. `auth.example.auth.eu-west-1.amazoncognito.com`.
    /// Bare host only; the bridge prepends `https://` when building URLs.
    pub provider_domain: String,
    /// The application's client id, as registered with the provider.
    pub client_id: String,
    /// Optional client secret. When present it is sent both as an HTTP Basic
    /// header and as a form field during token exchange.
    pub client_secret: Option<String>,
    /// Space-separated OAuth2 scope string.
    pub scope: String,
    /// The application's own base URL. Its host anchors the safe-redirect
    /// check and the redirect/logout URIs are resolved against it.
    pub site_url: Url,
    /// Path that receives the provider callback.
    pub redirect_path: String,
    /// Master switch for the login flow.
    pub login_enabled: bool,
    /// When set, unauthenticated page requests are redirected to the
    /// provider without the visitor asking for a login form.
    pub auto_redirect: bool,
    /// Paths that never trigger a login redirect and are never accepted as
    /// post-login targets. The callback and post-logout paths are always
    /// treated as excluded in addition to this list.
    pub excluded_paths: Vec<String>,
    pub logout_enabled: bool,
    /// Local landing path after the provider-side logout completes.
    pub logout_redirect_path: String,
    /// When false, login only succeeds for users that already exist locally.
    pub provisioning_enabled: bool,
    /// When false, the identity token payload is trusted as-is; the
    /// authorization-code exchange itself is the trust boundary.
    pub verify_tokens: bool,
    pub email_claim: String,
    pub username_claim: String,
    pub display_name_claim: String,
    pub role_claim: String,
    /// Claim value -> local role. Misses fall through to `default_role`.
    pub role_mapping: HashMap<String, String>,
    pub default_role: String,
    /// Guards against an SSO login demoting a manually elevated role: the
    /// mapped role is only applied when the current primary role is absent
    /// or still the default.
    pub only_set_role_if_current_is_default: bool,
    /// Master switch for outbound directory sync.
    pub sync_enabled: bool,
    /// Provider-side user pool identifier, required for outbound sync.
    pub user_pool_id: Option<String>,
    /// Name of the provider attribute that mirrors the local primary role.
    pub sync_role_attribute: String,
    pub sync_on_create: bool,
    pub sync_on_update: bool,
    /// Routes detailed failure causes to the operator log channel.
    pub debug: bool,
}

impl Config {
    /// The provider's base URL. A bare domain gets the `https://` scheme; an
    /// explicit `http://` prefix is honored so local stand-ins work.
    pub fn provider_base_url(&self) -> String {
        let domain = self.provider_domain.trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }

    /// The absolute callback URI registered with the provider.
    pub fn redirect_uri(&self) -> Result<Url, BridgeError> {
        self.site_url
            .join(&normalize_path(&self.redirect_path))
            .map_err(|e| BridgeError::InvalidUrl(e.to_string()))
    }

    /// The absolute post-logout landing URI.
    pub fn logout_uri(&self) -> Result<Url, BridgeError> {
        self.site_url
            .join(&normalize_path(&self.logout_redirect_path))
            .map_err(|e| BridgeError::InvalidUrl(e.to_string()))
    }

    /// The full excluded-path set: configured exclusions plus the callback
    /// and post-logout paths, all normalized.
    pub fn excluded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .excluded_paths
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| canonical_path(p))
            .collect();
        paths.push(canonical_path(&self.redirect_path));
        paths.push(canonical_path(&self.logout_redirect_path));
        paths.sort();
        paths.dedup();
        paths
    }

    /// Whether `path` is in the excluded set (normalized compare).
    pub fn is_path_excluded(&self, path: &str) -> bool {
        let candidate = canonical_path(path);
        self.excluded_paths().iter().any(|p| *p == candidate)
    }
}

/// Ensures a single leading slash.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{}", trimmed.trim_start_matches('/'))
}

/// Lowercased, leading slash ensured, trailing slash stripped. Used for all
/// excluded-path and redirect-target comparisons.
pub fn canonical_path(path: &str) -> String {
    let normalized = normalize_path(path).to_ascii_lowercase();
    if normalized.len() > 1 {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    }
}

/// A builder for creating a [`Config`].
///
/// `provider_domain`, `client_id` and `site_url` are required; everything
/// else has the documented default.
#[derive(Default)]
pub struct ConfigBuilder {
    provider_domain: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scope: Option<String>,
    site_url: Option<Url>,
    redirect_path: Option<String>,
    login_enabled: bool,
    auto_redirect: bool,
    excluded_paths: Option<Vec<String>>,
    logout_enabled: bool,
    logout_redirect_path: Option<String>,
    provisioning_enabled: Option<bool>,
    verify_tokens: Option<bool>,
    email_claim: Option<String>,
    username_claim: Option<String>,
    display_name_claim: Option<String>,
    role_claim: Option<String>,
    role_mapping: HashMap<String, String>,
    default_role: Option<String>,
    only_set_role_if_current_is_default: Option<bool>,
    sync_enabled: bool,
    user_pool_id: Option<String>,
    sync_role_attribute: Option<String>,
    sync_on_create: Option<bool>,
    sync_on_update: Option<bool>,
    debug: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hosted provider domain. Required.
    pub fn provider_domain(mut self, domain: impl Into<String>) -> Self {
        self.provider_domain = Some(domain.into());
        self
    }

    /// Sets the application client id. Required.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the application's own base URL. Required.
    pub fn site_url(mut self, url: &str) -> Result<Self, BridgeError> {
        let parsed = Url::parse(url).map_err(|e| BridgeError::InvalidUrl(e.to_string()))?;
        self.site_url = Some(parsed);
        Ok(self)
    }

    pub fn redirect_path(mut self, path: impl Into<String>) -> Self {
        self.redirect_path = Some(path.into());
        self
    }

    pub fn login_enabled(mut self, enabled: bool) -> Self {
        self.login_enabled = enabled;
        self
    }

    pub fn auto_redirect(mut self, enabled: bool) -> Self {
        self.auto_redirect = enabled;
        self
    }

    pub fn excluded_paths(mut self, paths: Vec<String>) -> Self {
        self.excluded_paths = Some(paths);
        self
    }

    pub fn logout_enabled(mut self, enabled: bool) -> Self {
        self.logout_enabled = enabled;
        self
    }

    pub fn logout_redirect_path(mut self, path: impl Into<String>) -> Self {
        self.logout_redirect_path = Some(path.into());
        self
    }

    pub fn provisioning_enabled(mut self, enabled: bool) -> Self {
        self.provisioning_enabled = Some(enabled);
        self
    }

    /// Disables signature verification entirely. Only meaningful when the
    /// deployment treats the code exchange itself as the trust boundary.
    pub fn verify_tokens(mut self, enabled: bool) -> Self {
        self.verify_tokens = Some(enabled);
        self
    }

    pub fn email_claim(mut self, key: impl Into<String>) -> Self {
        self.email_claim = Some(key.into());
        self
    }

    pub fn username_claim(mut self, key: impl Into<String>) -> Self {
        self.username_claim = Some(key.into());
        self
    }

    pub fn display_name_claim(mut self, key: impl Into<String>) -> Self {
        self.display_name_claim = Some(key.into());
        self
    }

    pub fn role_claim(mut self, key: impl Into<String>) -> Self {
        self.role_claim = Some(key.into());
        self
    }

    pub fn role_mapping(mut self, mapping: HashMap<String, String>) -> Self {
        self.role_mapping = mapping;
        self
    }

    pub fn default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = Some(role.into());
        self
    }

    pub fn only_set_role_if_current_is_default(mut self, enabled: bool) -> Self {
        self.only_set_role_if_current_is_default = Some(enabled);
        self
    }

    pub fn sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn user_pool_id(mut self, pool_id: impl Into<String>) -> Self {
        self.user_pool_id = Some(pool_id.into());
        self
    }

    pub fn sync_role_attribute(mut self, name: impl Into<String>) -> Self {
        self.sync_role_attribute = Some(name.into());
        self
    }

    pub fn sync_on_create(mut self, enabled: bool) -> Self {
        self.sync_on_create = Some(enabled);
        self
    }

    pub fn sync_on_update(mut self, enabled: bool) -> Self {
        self.sync_on_update = Some(enabled);
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Consumes the builder and returns a `Config`.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfiguration` if `provider_domain`, `client_id` or
    /// `site_url` were not set.
    pub fn build(self) -> Result<Config, BridgeError> {
        let provider_domain = self
            .provider_domain
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| BridgeError::MissingConfiguration("provider_domain".to_string()))?;
        let client_id = self
            .client_id
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| BridgeError::MissingConfiguration("client_id".to_string()))?;
        let site_url = self
            .site_url
            .ok_or_else(|| BridgeError::MissingConfiguration("site_url".to_string()))?;

        Ok(Config {
            provider_domain: provider_domain.trim().to_string(),
            client_id,
            client_secret: self.client_secret.filter(|s| !s.is_empty()),
            scope: self.scope.unwrap_or_else(|| "openid email profile".to_string()),
            site_url,
            redirect_path: self.redirect_path.unwrap_or_else(|| "/sso-login".to_string()),
            login_enabled: self.login_enabled,
            auto_redirect: self.auto_redirect,
            excluded_paths: self
                .excluded_paths
                .unwrap_or_else(|| vec!["/logout".to_string(), "/sso-login".to_string()]),
            logout_enabled: self.logout_enabled,
            logout_redirect_path: self
                .logout_redirect_path
                .unwrap_or_else(|| "/logout".to_string()),
            provisioning_enabled: self.provisioning_enabled.unwrap_or(true),
            verify_tokens: self.verify_tokens.unwrap_or(true),
            email_claim: self.email_claim.unwrap_or_else(|| "email".to_string()),
            username_claim: self.username_claim.unwrap_or_else(|| "username".to_string()),
            display_name_claim: self
                .display_name_claim
                .unwrap_or_else(|| "name".to_string()),
            role_claim: self
                .role_claim
                .unwrap_or_else(|| "custom:user_role".to_string()),
            role_mapping: self.role_mapping,
            default_role: self.default_role.unwrap_or_else(|| "subscriber".to_string()),
            only_set_role_if_current_is_default: self
                .only_set_role_if_current_is_default
                .unwrap_or(true),
            sync_enabled: self.sync_enabled,
            user_pool_id: self.user_pool_id.filter(|p| !p.is_empty()),
            sync_role_attribute: self
                .sync_role_attribute
                .unwrap_or_else(|| "custom:user_role".to_string()),
            sync_on_create: self.sync_on_create.unwrap_or(true),
            sync_on_update: self.sync_on_update.unwrap_or(true),
            debug: self.debug,
        })
    }
}
