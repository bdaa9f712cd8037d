//! Authentication service
//!
//! Drives an account through its session lifecycle:
//! - register: create the account, mail the activation link, open a session
//! - login / refresh / logout: open, rotate and close the session
//! - activate: follow the emailed link
//! - get_me / change_password: operations on the signed-in account
//!
//! An account has at most one live session. Opening a session (register,
//! login, password change) overwrites the stored refresh token; refresh swaps
//! it only if the presented token is still the stored one, so every refresh
//! token works exactly once.

use crate::db::is_unique_violation;
use crate::db::repositories::AccountRepository;
use crate::models::Account;
use crate::services::activation::ActivationService;
use crate::services::password::{hash_password, verify_against_dummy, verify_password};
use crate::services::token::{TokenClaims, TokenPair, TokenPayload, TokenService};
use crate::services::validation::{
    normalize_email, validate_avatar_url, validate_email, validate_full_name, validate_password,
};
use anyhow::Context;
use std::sync::Arc;

/// Message for every failed login, whichever check failed
const BAD_CREDENTIALS: &str = "Bad login or password";
/// Message for every rejected refresh token
const NOT_AUTHORIZED: &str = "User is not authorized";

/// Error types for authentication operations
#[derive(Debug, thiserror::Error)]
pub enum AuthServiceError {
    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Bad credentials or an unusable token
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Account or activation link not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Email already registered
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AuthServiceError {
    fn bad_credentials() -> Self {
        Self::AuthenticationError(BAD_CREDENTIALS.to_string())
    }

    fn not_authorized() -> Self {
        Self::AuthenticationError(NOT_AUTHORIZED.to_string())
    }
}

/// A signed-in account with its fresh tokens
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub account: Account,
    pub tokens: TokenPair,
}

/// Input for account registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

impl RegisterInput {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            full_name: full_name.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for changing the password of the signed-in account
#[derive(Debug, Clone)]
pub struct ChangePasswordInput {
    /// Current password
    pub password: String,
    pub new_password1: String,
    pub new_password2: String,
}

/// Authentication service
pub struct AuthService {
    accounts: Arc<dyn AccountRepository>,
    tokens: Arc<TokenService>,
    activation: Arc<ActivationService>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        tokens: Arc<TokenService>,
        activation: Arc<ActivationService>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            activation,
        }
    }

    /// Register a new account and open its first session.
    ///
    /// The activation email is best-effort: a delivery failure is logged and
    /// registration still succeeds.
    ///
    /// # Errors
    ///
    /// - `ValidationError` for a malformed email, short password or name, bad avatar URL
    /// - `AccountExists` if the email is taken
    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession, AuthServiceError> {
        self.validate_register_input(&input)?;
        let email = normalize_email(&input.email);

        if self
            .accounts
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(account_exists(&email));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let link = self.activation.generate_link();
        let account = Account::new(
            email,
            input.full_name.trim().to_string(),
            password_hash,
            input.avatar_url,
            link.clone(),
        );

        // A concurrent registration can still win the race past the check above
        let account = match self.accounts.create(&account).await {
            Ok(account) => account,
            Err(e) if is_unique_violation(&e) => return Err(account_exists(&account.email)),
            Err(e) => return Err(e.context("Failed to create account").into()),
        };
        tracing::info!("Registered account {} <{}>", account.id, account.email);

        if let Err(e) = self
            .activation
            .send_activation_email(&account.email, &link)
            .await
        {
            tracing::warn!("{:#}", e);
        }

        self.open_session(account).await
    }

    /// Check credentials and open a session, superseding any previous one.
    ///
    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, input: LoginInput) -> Result<AuthSession, AuthServiceError> {
        let email = normalize_email(&input.email);

        let account = match self
            .accounts
            .get_by_email(&email)
            .await
            .context("Failed to look up account")?
        {
            Some(account) => account,
            None => {
                verify_against_dummy(&input.password);
                return Err(AuthServiceError::bad_credentials());
            }
        };

        if !verify_password(&input.password, &account.password_hash) {
            tracing::debug!("Wrong password for account {}", account.id);
            return Err(AuthServiceError::bad_credentials());
        }

        tracing::info!("Account {} logged in", account.id);
        self.open_session(account).await
    }

    /// Exchange a refresh token for a new pair; the presented token is spent.
    ///
    /// # Errors
    ///
    /// `AuthenticationError` when the token is missing, invalid or expired,
    /// superseded by a later login or refresh, or logged out.
    pub async fn refresh(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<AuthSession, AuthServiceError> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(AuthServiceError::not_authorized)?;

        let claims = self
            .tokens
            .verify_refresh_token(token)
            .ok_or_else(AuthServiceError::not_authorized)?;

        let record = self
            .tokens
            .find_token(token)
            .await
            .context("Failed to look up session")?;
        match record {
            Some(record) if record.account_id == claims.id => {}
            _ => {
                tracing::warn!("Refresh token for account {} is not on record", claims.id);
                return Err(AuthServiceError::not_authorized());
            }
        }

        let account = self
            .accounts
            .get_by_id(claims.id)
            .await
            .context("Failed to load account")?
            .ok_or_else(AuthServiceError::not_authorized)?;

        let tokens = self.tokens.generate_tokens(&TokenPayload::from(&account))?;
        let rotated = self
            .tokens
            .rotate_token(account.id, token, &tokens.refresh_token)
            .await
            .context("Failed to rotate session")?;
        if !rotated {
            tracing::warn!("Refresh token for account {} was spent concurrently", account.id);
            return Err(AuthServiceError::not_authorized());
        }

        Ok(AuthSession { account, tokens })
    }

    /// Close the session holding this refresh token. Always succeeds for unknown tokens.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthServiceError> {
        if refresh_token.is_empty() {
            return Ok(());
        }
        self.tokens
            .remove_token(refresh_token)
            .await
            .context("Failed to remove session")?;
        tracing::info!("Session closed");
        Ok(())
    }

    /// Follow an activation link
    pub async fn activate(&self, link: &str) -> Result<Account, AuthServiceError> {
        self.activation
            .activate(link)
            .await?
            .ok_or_else(|| AuthServiceError::NotFound("Incorrect activation link".to_string()))
    }

    /// The signed-in account
    pub async fn get_me(&self, account_id: i64) -> Result<Account, AuthServiceError> {
        self.accounts
            .get_by_id(account_id)
            .await
            .context("Failed to load account")?
            .ok_or_else(|| AuthServiceError::NotFound("Account not found".to_string()))
    }

    /// Verify an access token presented on a request
    pub fn verify_access_token(&self, token: &str) -> Option<TokenClaims> {
        self.tokens.verify_access_token(token)
    }

    /// Replace the password and open a new session.
    ///
    /// The new refresh token overwrites the stored one, so sessions on other
    /// devices can no longer refresh.
    pub async fn change_password(
        &self,
        account_id: i64,
        input: ChangePasswordInput,
    ) -> Result<AuthSession, AuthServiceError> {
        if input.new_password1 != input.new_password2 {
            return Err(AuthServiceError::ValidationError(
                "Passwords are not equal".to_string(),
            ));
        }
        validate_password(&input.new_password1).map_err(AuthServiceError::ValidationError)?;

        let account = self.get_me(account_id).await?;
        if !verify_password(&input.password, &account.password_hash) {
            return Err(AuthServiceError::bad_credentials());
        }

        let password_hash =
            hash_password(&input.new_password1).context("Failed to hash password")?;
        let stored = self
            .accounts
            .set_password_hash(account.id, &password_hash)
            .await
            .context("Failed to update password")?;
        if !stored {
            return Err(AuthServiceError::NotFound("Account not found".to_string()));
        }
        tracing::info!("Account {} changed password", account.id);

        // Fresh copy: an activation may have landed while hashing
        let account = self.get_me(account.id).await?;
        self.open_session(account).await
    }

    // ========================================================================
    // Private helper methods
    // ========================================================================

    fn validate_register_input(&self, input: &RegisterInput) -> Result<(), AuthServiceError> {
        validate_email(&input.email).map_err(AuthServiceError::ValidationError)?;
        validate_password(&input.password).map_err(AuthServiceError::ValidationError)?;
        validate_full_name(&input.full_name).map_err(AuthServiceError::ValidationError)?;
        if let Some(url) = &input.avatar_url {
            validate_avatar_url(url).map_err(AuthServiceError::ValidationError)?;
        }
        Ok(())
    }

    /// Mint a pair for the account and make its refresh token the stored one
    async fn open_session(&self, account: Account) -> Result<AuthSession, AuthServiceError> {
        let tokens = self.tokens.generate_tokens(&TokenPayload::from(&account))?;
        self.tokens
            .save_token(account.id, &tokens.refresh_token)
            .await
            .context("Failed to save session")?;

        Ok(AuthSession { account, tokens })
    }
}

fn account_exists(email: &str) -> AuthServiceError {
    AuthServiceError::AccountExists(format!("Account with email {} already exists", email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DatabaseDriver};
    use crate::db::repositories::{
        SessionRepository, SqlxAccountRepository, SqlxSessionRepository,
    };
    use crate::db::{create_pool, create_test_pool, migrations, DynDatabasePool};
    use crate::services::email::MailSender;
    use crate::services::token::TokenSettings;
    use crate::services::user::{UpdateProfileInput, UserService};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        fn last_link(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let (_, html) = sent.last()?;
            let start = html.find("/auth/activate/")? + "/auth/activate/".len();
            let end = html[start..].find('"')? + start;
            Some(html[start..end].to_string())
        }
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send_html(&self, to: &str, _subject: &str, html: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), html.to_string()));
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl MailSender for FailingMailer {
        async fn send_html(&self, _to: &str, _subject: &str, _html: &str) -> anyhow::Result<()> {
            anyhow::bail!("SMTP server unreachable")
        }
    }

    struct Fixture {
        service: AuthService,
        sessions: Arc<dyn SessionRepository>,
        mailer: Arc<RecordingMailer>,
    }

    fn test_settings() -> TokenSettings {
        TokenSettings {
            access_secret: "access-test-secret".to_string(),
            refresh_secret: "refresh-test-secret".to_string(),
            access_ttl: Duration::minutes(30),
            refresh_ttl: Duration::days(30),
        }
    }

    async fn build_service(mailer: Arc<dyn MailSender>) -> (AuthService, Arc<dyn SessionRepository>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        build_service_on(pool, mailer).await
    }

    async fn build_service_on(
        pool: DynDatabasePool,
        mailer: Arc<dyn MailSender>,
    ) -> (AuthService, Arc<dyn SessionRepository>) {
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let sessions = SqlxSessionRepository::boxed(pool);
        let tokens = Arc::new(TokenService::new(test_settings(), sessions.clone()));
        let activation = Arc::new(ActivationService::new(
            accounts.clone(),
            mailer,
            "http://api.test",
        ));
        (AuthService::new(accounts, tokens, activation), sessions)
    }

    async fn setup_test_service() -> Fixture {
        let mailer = Arc::new(RecordingMailer::default());
        let (service, sessions) = build_service(mailer.clone()).await;
        Fixture {
            service,
            sessions,
            mailer,
        }
    }

    /// Fixture over a SQLite file, so separate connections really run side by side
    async fn setup_file_backed_service(dir: &tempfile::TempDir) -> Fixture {
        let pool = create_pool(&DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: dir.path().join("agora.db").to_string_lossy().to_string(),
        })
        .await
        .expect("Failed to create file pool");
        let mailer = Arc::new(RecordingMailer::default());
        let (service, sessions) = build_service_on(pool, mailer.clone()).await;
        Fixture {
            service,
            sessions,
            mailer,
        }
    }

    fn alice() -> RegisterInput {
        RegisterInput::new("alice@x.com", "hunter2", "Alice A")
    }

    // ========================================================================
    // Registration tests
    // ========================================================================

    #[tokio::test]
    async fn test_register_opens_session_and_mails_link() {
        let fx = setup_test_service().await;

        let session = fx.service.register(alice()).await.expect("register");

        assert!(session.account.id > 0);
        assert_eq!(session.account.email, "alice@x.com");
        assert_eq!(session.account.full_name, "Alice A");
        assert!(!session.account.is_activated);
        assert!(!session.tokens.access_token.is_empty());
        assert_ne!(session.account.password_hash, "hunter2");

        let record = fx
            .sessions
            .find_by_account(session.account.id)
            .await
            .unwrap()
            .expect("session record");
        assert_eq!(record.refresh_token, session.tokens.refresh_token);

        let sent = fx.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice@x.com");
    }

    #[tokio::test]
    async fn test_register_token_payload_is_public_data() {
        let fx = setup_test_service().await;
        let session = fx.service.register(alice()).await.unwrap();

        let claims = fx
            .service
            .verify_access_token(&session.tokens.access_token)
            .expect("valid token");
        assert_eq!(claims.id, session.account.id);
        assert_eq!(claims.email, "alice@x.com");
        assert_eq!(claims.full_name, "Alice A");
        assert!(!claims.is_activated);
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let fx = setup_test_service().await;
        fx.service.register(alice()).await.unwrap();

        let result = fx
            .service
            .register(RegisterInput::new("  ALICE@x.com ", "other-pass", "Another Alice"))
            .await;
        assert!(matches!(result, Err(AuthServiceError::AccountExists(_))));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let fx = setup_test_service().await;

        let cases = [
            RegisterInput::new("not-an-email", "hunter2", "Alice A"),
            RegisterInput::new("alice@x.com", "1234", "Alice A"),
            RegisterInput::new("alice@x.com", "hunter2", "Al"),
            RegisterInput::new("alice@x.com", "hunter2", "Alice A").with_avatar_url("ftp://a/b.png"),
        ];
        for input in cases {
            let result = fx.service.register(input).await;
            assert!(matches!(result, Err(AuthServiceError::ValidationError(_))));
        }
    }

    #[tokio::test]
    async fn test_register_survives_mail_failure() {
        let (service, sessions) = build_service(Arc::new(FailingMailer)).await;

        let session = service.register(alice()).await.expect("register despite mail failure");
        assert!(sessions
            .find_by_account(session.account.id)
            .await
            .unwrap()
            .is_some());
    }

    // ========================================================================
    // Login tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_supersedes_previous_session() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        let logged_in = fx
            .service
            .login(LoginInput::new("Alice@X.com", "hunter2"))
            .await
            .expect("login");

        assert_eq!(logged_in.account.id, registered.account.id);
        assert_ne!(logged_in.tokens.refresh_token, registered.tokens.refresh_token);
        let record = fx
            .sessions
            .find_by_account(registered.account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.refresh_token, logged_in.tokens.refresh_token);

        // The registration refresh token is no longer usable
        let stale = fx.service.refresh(Some(&registered.tokens.refresh_token)).await;
        assert!(matches!(stale, Err(AuthServiceError::AuthenticationError(_))));
    }

    #[tokio::test]
    async fn test_login_errors_are_indistinguishable() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        let wrong_password = fx
            .service
            .login(LoginInput::new("alice@x.com", "wrongpass"))
            .await
            .unwrap_err();
        let unknown_email = fx
            .service
            .login(LoginInput::new("nobody@x.com", "hunter2"))
            .await
            .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(matches!(wrong_password, AuthServiceError::AuthenticationError(_)));

        // A failed login leaves the session alone
        let record = fx
            .sessions
            .find_by_account(registered.account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.refresh_token, registered.tokens.refresh_token);
    }

    // ========================================================================
    // Refresh / logout tests
    // ========================================================================

    #[tokio::test]
    async fn test_refresh_rotates_exactly_once() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();
        let first = registered.tokens.refresh_token.clone();

        let refreshed = fx.service.refresh(Some(&first)).await.expect("first refresh");
        assert_ne!(refreshed.tokens.refresh_token, first);
        assert_eq!(refreshed.account.id, registered.account.id);

        let reused = fx.service.refresh(Some(&first)).await;
        assert!(matches!(reused, Err(AuthServiceError::AuthenticationError(_))));

        // The rotated token works
        fx.service
            .refresh(Some(&refreshed.tokens.refresh_token))
            .await
            .expect("second refresh");
    }

    #[tokio::test]
    async fn test_refresh_rejects_missing_and_invalid_tokens() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        for token in [None, Some(""), Some("garbage"), Some(registered.tokens.access_token.as_str())] {
            let result = fx.service.refresh(token).await;
            assert!(matches!(result, Err(AuthServiceError::AuthenticationError(_))));
        }
    }

    #[tokio::test]
    async fn test_refresh_after_logout_fails() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();
        let token = registered.tokens.refresh_token;

        fx.service.logout(&token).await.expect("logout");
        assert!(fx
            .sessions
            .find_by_account(registered.account.id)
            .await
            .unwrap()
            .is_none());

        let result = fx.service.refresh(Some(&token)).await;
        assert!(matches!(result, Err(AuthServiceError::AuthenticationError(_))));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        fx.service.logout(&registered.tokens.refresh_token).await.unwrap();
        fx.service.logout(&registered.tokens.refresh_token).await.unwrap();
        fx.service.logout("never-issued").await.unwrap();
        fx.service.logout("").await.unwrap();
    }

    // ========================================================================
    // Activation / profile tests
    // ========================================================================

    #[tokio::test]
    async fn test_activate_with_emailed_link() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();
        let link = fx.mailer.last_link().expect("link in email");

        let unknown = fx.service.activate("not-a-link").await;
        assert!(matches!(unknown, Err(AuthServiceError::NotFound(_))));

        let activated = fx.service.activate(&link).await.expect("activate");
        assert!(activated.is_activated);

        let me = fx.service.get_me(registered.account.id).await.unwrap();
        assert!(me.is_activated);

        // Tokens minted after activation carry the flag
        let login = fx
            .service
            .login(LoginInput::new("alice@x.com", "hunter2"))
            .await
            .unwrap();
        let claims = fx.service.verify_access_token(&login.tokens.access_token).unwrap();
        assert!(claims.is_activated);
    }

    #[tokio::test]
    async fn test_activation_link_is_single_use() {
        let fx = setup_test_service().await;
        fx.service.register(alice()).await.unwrap();
        let link = fx.mailer.last_link().unwrap();

        fx.service.activate(&link).await.unwrap();
        let again = fx.service.activate(&link).await;
        assert!(matches!(again, Err(AuthServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_me_unknown_account() {
        let fx = setup_test_service().await;
        let result = fx.service.get_me(12345).await;
        assert!(matches!(result, Err(AuthServiceError::NotFound(_))));
    }

    // ========================================================================
    // Password change tests
    // ========================================================================

    fn change(old: &str, new1: &str, new2: &str) -> ChangePasswordInput {
        ChangePasswordInput {
            password: old.to_string(),
            new_password1: new1.to_string(),
            new_password2: new2.to_string(),
        }
    }

    #[tokio::test]
    async fn test_change_password_mismatch() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        let err = fx
            .service
            .change_password(registered.account.id, change("hunter2", "newpass1", "newpass2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthServiceError::ValidationError(ref m) if m == "Passwords are not equal"));
    }

    #[tokio::test]
    async fn test_change_password_wrong_current() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();

        let err = fx
            .service
            .change_password(registered.account.id, change("wrong", "newpass", "newpass"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthServiceError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn test_change_password_revokes_other_sessions() {
        let fx = setup_test_service().await;
        let registered = fx.service.register(alice()).await.unwrap();
        let id = registered.account.id;

        let changed = fx
            .service
            .change_password(id, change("hunter2", "correct-horse", "correct-horse"))
            .await
            .expect("change password");

        // Old refresh token is dead, the new one works
        let stale = fx.service.refresh(Some(&registered.tokens.refresh_token)).await;
        assert!(matches!(stale, Err(AuthServiceError::AuthenticationError(_))));
        fx.service
            .refresh(Some(&changed.tokens.refresh_token))
            .await
            .expect("refresh with new token");

        // Credentials follow the change
        assert!(fx.service.login(LoginInput::new("alice@x.com", "hunter2")).await.is_err());
        fx.service
            .login(LoginInput::new("alice@x.com", "correct-horse"))
            .await
            .expect("login with new password");
    }

    // ========================================================================
    // Concurrency tests
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_refreshes_with_one_token_succeed_once() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            service, sessions, ..
        } = setup_file_backed_service(&dir).await;
        let service = Arc::new(service);
        let registered = service.register(alice()).await.unwrap();
        let token = registered.tokens.refresh_token.clone();

        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let token = token.clone();
                tokio::spawn(async move { service.refresh(Some(&token)).await })
            })
            .collect();

        let mut winners = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(session) => winners.push(session),
                Err(e) => assert!(matches!(e, AuthServiceError::AuthenticationError(_))),
            }
        }
        assert_eq!(winners.len(), 1);

        let record = sessions
            .find_by_account(registered.account.id)
            .await
            .unwrap()
            .expect("session record");
        assert_eq!(record.refresh_token, winners[0].tokens.refresh_token);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_password_change_keeps_concurrent_activation() {
        let dir = tempfile::tempdir().unwrap();
        let Fixture {
            service, mailer, ..
        } = setup_file_backed_service(&dir).await;
        let service = Arc::new(service);
        let id = service.register(alice()).await.unwrap().account.id;
        let link = mailer.last_link().expect("link in email");

        let changer = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .change_password(id, change("hunter2", "correct-horse", "correct-horse"))
                    .await
            })
        };
        // Land the activation while the password change is still hashing
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.activate(&link).await.expect("activate");
        changer.await.unwrap().expect("change password");

        let me = service.get_me(id).await.unwrap();
        assert!(me.is_activated);
        assert!(me.activation_link.is_none());
        assert!(verify_password("correct-horse", &me.password_hash));

        let again = service.activate(&link).await;
        assert!(matches!(again, Err(AuthServiceError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_password_change_and_profile_update_both_stick() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: dir.path().join("agora.db").to_string_lossy().to_string(),
        })
        .await
        .unwrap();
        let (service, _sessions) =
            build_service_on(pool.clone(), Arc::new(RecordingMailer::default())).await;
        let users = Arc::new(UserService::new(SqlxAccountRepository::boxed(pool)));
        let service = Arc::new(service);
        let id = service.register(alice()).await.unwrap().account.id;

        let changer = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .change_password(id, change("hunter2", "correct-horse", "correct-horse"))
                    .await
            })
        };
        let updater = {
            let users = users.clone();
            tokio::spawn(async move {
                users
                    .update_profile(
                        id,
                        UpdateProfileInput {
                            about_me: Some("Trading stamps".to_string()),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };
        changer.await.unwrap().expect("change password");
        updater.await.unwrap().expect("update profile");

        let me = service.get_me(id).await.unwrap();
        assert_eq!(me.about_me, "Trading stamps");
        assert!(verify_password("correct-horse", &me.password_hash));
    }

    // ========================================================================
    // Concrete scenario
    // ========================================================================

    #[tokio::test]
    async fn test_alice_scenario() {
        let fx = setup_test_service().await;

        let registered = fx.service.register(alice()).await.unwrap();
        assert!(!registered.tokens.access_token.is_empty());
        let id = registered.account.id;
        assert_eq!(
            stored_token(&fx, id).await,
            registered.tokens.refresh_token
        );

        let bad = fx.service.login(LoginInput::new("alice@x.com", "wrongpass")).await;
        assert!(matches!(bad, Err(AuthServiceError::AuthenticationError(ref m)) if m == "Bad login or password"));
        assert_eq!(
            stored_token(&fx, id).await,
            registered.tokens.refresh_token
        );

        let good = fx
            .service
            .login(LoginInput::new("alice@x.com", "hunter2"))
            .await
            .unwrap();
        assert!(!good.tokens.access_token.is_empty());
        let stored = stored_token(&fx, id).await;
        assert_ne!(stored, registered.tokens.refresh_token);
        assert_eq!(stored, good.tokens.refresh_token);
    }

    async fn stored_token(fx: &Fixture, account_id: i64) -> String {
        fx.sessions
            .find_by_account(account_id)
            .await
            .unwrap()
            .expect("session record")
            .refresh_token
    }
}
