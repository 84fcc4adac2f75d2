// src/flow.rs

use crate::config::{canonical_path, Config};
use crate::directory::{LocalDirectory, SessionSink, UserId};
use crate::error::BridgeError;
use crate::model::{OAuthState, TokenEndpointResponse};
use crate::provision::{reconcile, ProvisionOutcome};
use crate::verifier::Verifier;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters delivered to the callback path.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// The result of a completed login: who was resolved, where to send them,
/// and whether provisioning created or updated the local user.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: UserId,
    pub redirect_to: Url,
    pub provisioning: Option<ProvisionOutcome>,
}

/// The authorization-code flow orchestrator.
///
/// Stateless between requests: flow state lives entirely in the opaque
/// `state` parameter round-tripped through the provider and in the single
/// request's execution. Each stage feeds the next with typed values; the
/// first failing stage aborts the request before any session exists.
pub struct SsoFlow {
    config: Config,
    verifier: Verifier,
    http_client: reqwest::Client,
    directory: Arc<dyn LocalDirectory>,
    sessions: Arc<dyn SessionSink>,
}

impl SsoFlow {
    pub fn new(
        config: Config,
        directory: Arc<dyn LocalDirectory>,
        sessions: Arc<dyn SessionSink>,
    ) -> Self {
        let verifier = Verifier::new(config.clone());
        let http_client = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            verifier,
            http_client,
            directory,
            sessions,
        }
    }

    /// The provider authorization URL carrying an opaque state that encodes
    /// `redirect_to` as the post-login target.
    pub fn authorize_url(&self, redirect_to: &str) -> Result<Url, BridgeError> {
        let redirect_uri = self.config.redirect_uri()?;
        let state = OAuthState::new(redirect_to).encode();

        let mut url = Url::parse(&format!(
            "{}/oauth2/authorize",
            self.config.provider_base_url()
        ))
        .map_err(|e| BridgeError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", &state);
        Ok(url)
    }

    /// The unsolicited-redirect decision for an ordinary page request.
    ///
    /// `None` means the request proceeds untouched: SSO or auto-redirect
    /// off, visitor already authenticated, or the path is excluded.
    pub fn login_redirect(
        &self,
        current_url: &Url,
        logged_in: bool,
    ) -> Result<Option<Url>, BridgeError> {
        if !self.config.login_enabled || !self.config.auto_redirect || logged_in {
            return Ok(None);
        }
        if self.config.is_path_excluded(current_url.path()) {
            return Ok(None);
        }
        self.authorize_url(current_url.as_str()).map(Some)
    }

    /// The explicit login-form variant: same gate minus auto-redirect, with
    /// the caller-requested target (falling back to the site root).
    pub fn login_form_redirect(
        &self,
        requested_target: Option<&str>,
        logged_in: bool,
    ) -> Result<Option<Url>, BridgeError> {
        if !self.config.login_enabled || logged_in {
            return Ok(None);
        }
        let target = requested_target
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.site_url.to_string());
        self.authorize_url(&target).map(Some)
    }

    /// Runs the callback pipeline: code exchange, token verification, user
    /// resolution, session establishment, safe-redirect computation.
    ///
    /// Any error aborts before a session exists; callers surface
    /// [`BridgeError::user_message`] to the visitor.
    #[instrument(skip(self, params), err)]
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<LoginOutcome, BridgeError> {
        if !self.config.login_enabled {
            return Err(BridgeError::MissingConfiguration("login_enabled".to_string()));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                BridgeError::MalformedToken("callback is missing the authorization code".to_string())
            })?;

        let id_token = self.exchange_code(code).await.inspect_err(|e| {
            self.log_failure("token exchange", e);
        })?;

        let claims = self.verifier.verify(&id_token).await.inspect_err(|e| {
            self.log_failure("token verification", e);
        })?;

        let (user_id, provisioning) = if self.config.provisioning_enabled {
            let (id, outcome) = reconcile(&claims, self.directory.as_ref(), &self.config)
                .await
                .inspect_err(|e| self.log_failure("provisioning", e))?;
            (id, Some(outcome))
        } else {
            let email = claims.non_empty(&self.config.email_claim).unwrap_or("");
            let found = if email.is_empty() {
                None
            } else {
                self.directory
                    .find_by_email(email)
                    .await
                    .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?
            };
            let id = found.ok_or_else(|| {
                BridgeError::UserResolutionFailed("user not found".to_string())
            })?;
            (id, None)
        };

        self.sessions
            .establish_session(user_id)
            .await
            .map_err(|e| BridgeError::UserResolutionFailed(e.to_string()))?;

        let redirect_to = self.post_login_redirect(params.state.as_deref());
        info!(user_id, %redirect_to, "login complete");
        Ok(LoginOutcome {
            user_id,
            redirect_to,
            provisioning,
        })
    }

    /// The provider-side logout redirect, or `None` when logout handling is
    /// off, configuration is incomplete, or the request is already the
    /// post-logout landing.
    pub fn logout_redirect(&self, current_path: &str) -> Option<Url> {
        if !self.config.logout_enabled {
            return None;
        }
        if canonical_path(current_path) == canonical_path(&self.config.logout_redirect_path) {
            return None;
        }
        let logout_uri = self.config.logout_uri().ok()?;
        let mut url = Url::parse(&format!("{}/logout", self.config.provider_base_url())).ok()?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("logout_uri", logout_uri.as_str());
        Some(url)
    }

    /// A redirect target is safe when its host equals the site's own host
    /// (case-insensitive). Any same-host path outside the excluded set is
    /// accepted; this deliberately mirrors the narrow original trust
    /// boundary rather than an allow-list.
    pub fn is_safe_redirect(&self, target: &str) -> bool {
        let Ok(parsed) = Url::parse(target) else {
            return false;
        };
        match (parsed.host_str(), self.config.site_url.host_str()) {
            (Some(target_host), Some(own_host)) => target_host.eq_ignore_ascii_case(own_host),
            _ => false,
        }
    }

    fn post_login_redirect(&self, raw_state: Option<&str>) -> Url {
        let fallback = self.config.site_url.clone();
        let Some(state) = raw_state.and_then(OAuthState::decode) else {
            return fallback;
        };
        if state.redirect_to.is_empty() || !self.is_safe_redirect(&state.redirect_to) {
            debug!(target = %state.redirect_to, "rejecting unsafe post-login redirect");
            return fallback;
        }
        let Ok(target) = Url::parse(&state.redirect_to) else {
            return fallback;
        };
        if self.config.is_path_excluded(target.path()) {
            debug!(target = %target, "post-login redirect points at an excluded path");
            return fallback;
        }
        target
    }

    async fn exchange_code(&self, code: &str) -> Result<String, BridgeError> {
        let redirect_uri = self.config.redirect_uri()?;
        let token_url = format!("{}/oauth2/token", self.config.provider_base_url());

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let mut request = self.http_client.post(&token_url).form(&form);
        if let Some(secret) = self.config.client_secret.as_deref() {
            request = request.basic_auth(&self.config.client_id, Some(secret));
        }

        let response = request.send().await?;
        let status = response.status();
        let body: TokenEndpointResponse =
            response.json().await.map_err(|_| {
                BridgeError::TokenExchangeFailed(format!("unparseable response (HTTP {status})"))
            })?;

        if let Some(error) = body.error {
            let detail = body
                .error_description
                .map(|d| format!("{error}: {d}"))
                .unwrap_or(error);
            return Err(BridgeError::TokenExchangeFailed(detail));
        }
        body.id_token
            .filter(|t| !t.is_empty())
            .ok_or(BridgeError::MissingIdentityToken)
    }

    /// Operator-facing diagnostics. The visitor only ever sees the generic
    /// `user_message`; the cause lands here, louder when debug is on.
    fn log_failure(&self, stage: &str, error: &BridgeError) {
        if self.config.debug {
            warn!(stage, %error, "login flow failed");
        } else {
            debug!(stage, %error, "login flow failed");
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::directory::{DirectoryError, InMemoryDirectory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSessions {
        established: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl SessionSink for RecordingSessions {
        async fn establish_session(&self, user_id: UserId) -> Result<(), DirectoryError> {
            self.established.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    fn flow_with(config: Config) -> SsoFlow {
        SsoFlow::new(
            config,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(RecordingSessions::default()),
        )
    }

    fn enabled_config() -> Config {
        ConfigBuilder::new()
            .provider_domain("idp.example.com")
            .client_id("client-1")
            .site_url("https://app.example.com")
            .unwrap()
            .login_enabled(true)
            .auto_redirect(true)
            .build()
            .unwrap()
    }

    #[test]
    fn authorize_url_carries_the_wire_parameters() {
        let flow = flow_with(enabled_config());
        let url = flow.authorize_url("https://app.example.com/docs").unwrap();

        assert_eq!(url.host_str(), Some("idp.example.com"));
        assert_eq!(url.path(), "/oauth2/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["redirect_uri"], "https://app.example.com/sso-login");

        let state = OAuthState::decode(&pairs["state"]).unwrap();
        assert_eq!(state.redirect_to, "https://app.example.com/docs");
        assert_eq!(state.sso_attempted, "0");
    }

    #[test]
    fn login_redirect_skips_excluded_and_authenticated_requests() {
        let flow = flow_with(enabled_config());
        let page = Url::parse("https://app.example.com/docs").unwrap();
        let callback = Url::parse("https://app.example.com/sso-login").unwrap();

        assert!(flow.login_redirect(&page, false).unwrap().is_some());
        assert!(flow.login_redirect(&page, true).unwrap().is_none());
        assert!(flow.login_redirect(&callback, false).unwrap().is_none());
    }

    #[test]
    fn login_redirect_requires_auto_redirect() {
        let mut config = enabled_config();
        config.auto_redirect = false;
        let flow = flow_with(config);
        let page = Url::parse("https://app.example.com/docs").unwrap();
        assert!(flow.login_redirect(&page, false).unwrap().is_none());
        // The explicit login-form path still works.
        assert!(flow.login_form_redirect(None, false).unwrap().is_some());
    }

    #[test]
    fn foreign_host_redirect_falls_back_to_site_root() {
        let flow = flow_with(enabled_config());
        let state = OAuthState::new("https://evil.example.net/phish").encode();
        let target = flow.post_login_redirect(Some(&state));
        assert_eq!(target.as_str(), "https://app.example.com/");
    }

    #[test]
    fn same_host_redirect_is_accepted() {
        let flow = flow_with(enabled_config());
        let state = OAuthState::new("https://APP.EXAMPLE.COM/account/orders").encode();
        let target = flow.post_login_redirect(Some(&state));
        assert_eq!(target.path(), "/account/orders");
    }

    #[test]
    fn excluded_path_redirect_falls_back_to_site_root() {
        let flow = flow_with(enabled_config());
        let state = OAuthState::new("https://app.example.com/logout").encode();
        let target = flow.post_login_redirect(Some(&state));
        assert_eq!(target.as_str(), "https://app.example.com/");
    }

    #[test]
    fn absent_or_garbled_state_falls_back_to_site_root() {
        let flow = flow_with(enabled_config());
        assert_eq!(
            flow.post_login_redirect(None).as_str(),
            "https://app.example.com/"
        );
        assert_eq!(
            flow.post_login_redirect(Some("%%%not-state%%%")).as_str(),
            "https://app.example.com/"
        );
    }

    #[test]
    fn logout_redirect_honors_gates() {
        let mut config = enabled_config();
        config.logout_enabled = true;
        let flow = flow_with(config);

        let url = flow.logout_redirect("/account").unwrap();
        assert_eq!(url.host_str(), Some("idp.example.com"));
        assert_eq!(url.path(), "/logout");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["logout_uri"], "https://app.example.com/logout");

        // Already on the landing path: no loop.
        assert!(flow.logout_redirect("/logout").is_none());
        assert!(flow.logout_redirect("/logout/").is_none());

        let flow = flow_with(enabled_config());
        assert!(flow.logout_redirect("/account").is_none());
    }

    #[tokio::test]
    async fn callback_without_code_is_fatal() {
        let flow = flow_with(enabled_config());
        let err = flow
            .handle_callback(&CallbackParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedToken(_)));
    }
}
