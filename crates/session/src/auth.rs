use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use invoice_desk_backend::{AuthBackend, BackendError, User};
use serde::{Deserialize, Serialize};
use snafu::{IntoError, ResultExt, Snafu, ensure};

use crate::error::{
    InvalidEmailSnafu, NameTooLongSnafu, NameTooShortSnafu, PasswordMismatchSnafu,
    PasswordTooLongSnafu, PasswordTooShortSnafu, RequiredFieldSnafu, ValidationError,
    ValidationResult,
};

pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 50;

/// Password length policy, applied identically on every form that sets a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_len: 6,
            max_len: 50,
        }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> ValidationResult<()> {
        let len = password.chars().count();
        ensure!(
            len >= self.min_len,
            PasswordTooShortSnafu {
                stage: "check-password",
                min_len: self.min_len,
            }
        );
        ensure!(
            len <= self.max_len,
            PasswordTooLongSnafu {
                stage: "check-password",
                max_len: self.max_len,
            }
        );
        Ok(())
    }

    /// Keeps the policy usable when settings carry nonsense bounds.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.min_len == 0 {
            self.min_len = defaults.min_len;
        }
        if self.max_len < self.min_len {
            self.max_len = defaults.max_len.max(self.min_len);
        }
        self
    }
}

/// `local@domain.tld`: no whitespace, one `@`, and a dot inside the domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}

pub fn validate_email(email: &str) -> ValidationResult<()> {
    ensure!(
        is_valid_email(email.trim()),
        InvalidEmailSnafu {
            stage: "validate-email",
            email: email.trim().to_string(),
        }
    );
    Ok(())
}

pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();
    ensure!(
        !name.is_empty(),
        RequiredFieldSnafu {
            stage: "validate-name",
            field: "name",
        }
    );
    let len = name.chars().count();
    ensure!(
        len >= NAME_MIN_LEN,
        NameTooShortSnafu {
            stage: "validate-name",
            min_len: NAME_MIN_LEN,
        }
    );
    ensure!(
        len <= NAME_MAX_LEN,
        NameTooLongSnafu {
            stage: "validate-name",
            max_len: NAME_MAX_LEN,
        }
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> ValidationResult<()> {
        ensure!(
            !self.email.trim().is_empty(),
            RequiredFieldSnafu {
                stage: "validate-login",
                field: "email",
            }
        );
        ensure!(
            !self.password.is_empty(),
            RequiredFieldSnafu {
                stage: "validate-login",
                field: "password",
            }
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupForm {
    pub fn validate(&self, policy: &PasswordPolicy) -> ValidationResult<()> {
        validate_name(&self.name)?;
        validate_email(&self.email)?;
        ensure!(
            self.password == self.confirm_password,
            PasswordMismatchSnafu {
                stage: "validate-signup"
            }
        );
        policy.check(&self.password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PasswordChangeForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl PasswordChangeForm {
    pub fn validate(&self, policy: &PasswordPolicy) -> ValidationResult<()> {
        ensure!(
            !self.current_password.is_empty(),
            RequiredFieldSnafu {
                stage: "validate-password-change",
                field: "current password",
            }
        );
        ensure!(
            self.new_password == self.confirm_password,
            PasswordMismatchSnafu {
                stage: "validate-password-change"
            }
        );
        policy.check(&self.new_password)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("{source}"))]
    InvalidForm {
        stage: &'static str,
        source: ValidationError,
    },
    #[snafu(display("Invalid credentials"))]
    InvalidCredentials { stage: &'static str },
    #[snafu(display("Registration failed"))]
    RegistrationRefused { stage: &'static str },
    #[snafu(display("Current password is incorrect"))]
    WrongPassword { stage: &'static str },
    #[snafu(display("{source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Default)]
struct AuthState {
    current_user: Option<User>,
    is_loading: bool,
    last_error: Option<String>,
}

/// Signed-in user plus the loading/error flags the auth screens render.
#[derive(Clone)]
pub struct AuthSession {
    state: Arc<Mutex<AuthState>>,
    backend: Arc<dyn AuthBackend>,
    policy: PasswordPolicy,
}

impl AuthSession {
    pub fn new(backend: Arc<dyn AuthBackend>, policy: PasswordPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(AuthState::default())),
            backend,
            policy: policy.normalized(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock().current_user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().current_user.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn begin(&self) {
        let mut state = self.lock();
        state.is_loading = true;
        state.last_error = None;
    }

    fn finish(&self, result: AuthResult<User>) -> AuthResult<User> {
        let mut state = self.lock();
        state.is_loading = false;
        match &result {
            Ok(user) => state.current_user = Some(user.clone()),
            Err(error) => state.last_error = Some(error.to_string()),
        }
        result
    }

    fn reject<T>(&self, source: ValidationError, stage: &'static str) -> AuthResult<T> {
        let error = InvalidFormSnafu { stage }.into_error(source);
        self.lock().last_error = Some(error.to_string());
        Err(error)
    }

    pub async fn login(&self, form: LoginForm) -> AuthResult<User> {
        if let Err(source) = form.validate() {
            return self.reject(source, "login-validate");
        }

        self.begin();
        let result = match self.backend.login(form.email.trim(), &form.password).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => InvalidCredentialsSnafu { stage: "login" }.fail(),
            Err(source) => Err(source).context(BackendSnafu { stage: "login" }),
        };
        self.finish(result)
    }

    pub async fn register(&self, form: SignupForm) -> AuthResult<User> {
        if let Err(source) = form.validate(&self.policy) {
            return self.reject(source, "register-validate");
        }

        self.begin();
        let result = match self
            .backend
            .register(form.email.trim(), &form.password, form.name.trim())
            .await
        {
            Ok(Some(user)) => Ok(user),
            Ok(None) => RegistrationRefusedSnafu { stage: "register" }.fail(),
            Err(source) => Err(source).context(BackendSnafu { stage: "register" }),
        };
        self.finish(result)
    }

    pub async fn update_profile(&self, name: &str, email: &str) -> AuthResult<User> {
        if let Err(source) = validate_name(name).and_then(|()| validate_email(email)) {
            return self.reject(source, "update-profile-validate");
        }

        self.begin();
        let result = self
            .backend
            .update_profile(name.trim(), email.trim())
            .await
            .context(BackendSnafu {
                stage: "update-profile",
            });
        self.finish(result)
    }

    /// Same policy as signup; the current password is checked by the account service.
    pub async fn change_password(&self, form: PasswordChangeForm) -> AuthResult<()> {
        if let Err(source) = form.validate(&self.policy) {
            return self.reject(source, "change-password-validate");
        }

        self.begin();
        let result = match self
            .backend
            .change_password(&form.current_password, &form.new_password)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => WrongPasswordSnafu {
                stage: "change-password",
            }
            .fail(),
            Err(source) => Err(source).context(BackendSnafu {
                stage: "change-password",
            }),
        };

        let mut state = self.lock();
        state.is_loading = false;
        if let Err(error) = &result {
            state.last_error = Some(error.to_string());
        }
        result
    }

    pub fn logout(&self) {
        self.backend.logout();
        let mut state = self.lock();
        if let Some(user) = state.current_user.take() {
            tracing::info!(email = %user.email, "signed out");
        }
        state.last_error = None;
    }
}
