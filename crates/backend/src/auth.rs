use tokio::sync::RwLock;

use super::provider::{
    AccountMissingSnafu, AuthBackend, BackendResult, BoxFuture, EmailInUseSnafu,
    NotSignedInSnafu, User, UserRole,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Account {
    user: User,
    password: String,
}

impl Account {
    fn new(email: &str, password: &str, name: &str, role: UserRole) -> Self {
        Self {
            user: User {
                email: email.to_string(),
                name: name.to_string(),
                role,
            },
            password: password.to_string(),
        }
    }
}

/// Development accounts available before anyone registers.
pub fn development_accounts() -> Vec<(User, String)> {
    seeded_accounts()
        .into_iter()
        .map(|account| (account.user, account.password))
        .collect()
}

fn seeded_accounts() -> Vec<Account> {
    vec![
        Account::new("admin@invoice.com", "admin123", "Admin", UserRole::Admin),
        Account::new("user@invoice.com", "user123", "Nguyễn Văn A", UserRole::User),
    ]
}

/// In-memory account directory used when no account service is deployed.
pub struct MockAuthBackend {
    accounts: RwLock<Vec<Account>>,
    signed_in: RwLock<Option<String>>,
}

impl MockAuthBackend {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(seeded_accounts()),
            signed_in: RwLock::new(None),
        }
    }

    pub async fn signed_in_email(&self) -> Option<String> {
        self.signed_in.read().await.clone()
    }

    async fn login_inner(&self, email: &str, password: &str) -> BackendResult<Option<User>> {
        let accounts = self.accounts.read().await;
        let found = accounts
            .iter()
            .find(|account| account.user.email.eq_ignore_ascii_case(email.trim()))
            .filter(|account| account.password == password)
            .map(|account| account.user.clone());

        match &found {
            Some(user) => {
                *self.signed_in.write().await = Some(user.email.clone());
                tracing::info!(email = %user.email, role = ?user.role, "account signed in");
            }
            None => tracing::info!(email = %email.trim(), "login refused"),
        }
        Ok(found)
    }

    async fn register_inner(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> BackendResult<Option<User>> {
        let mut accounts = self.accounts.write().await;
        let email = email.trim();
        if accounts
            .iter()
            .any(|account| account.user.email.eq_ignore_ascii_case(email))
        {
            tracing::info!(email = %email, "registration refused for existing email");
            return Ok(None);
        }

        let account = Account::new(email, password, name.trim(), UserRole::User);
        let user = account.user.clone();
        accounts.push(account);
        *self.signed_in.write().await = Some(user.email.clone());
        tracing::info!(email = %user.email, "account registered");
        Ok(Some(user))
    }

    async fn update_profile_inner(&self, name: &str, email: &str) -> BackendResult<User> {
        let Some(current_email) = self.signed_in.read().await.clone() else {
            return NotSignedInSnafu {
                stage: "update-profile",
            }
            .fail();
        };

        let mut accounts = self.accounts.write().await;
        let email = email.trim();
        if accounts.iter().any(|account| {
            account.user.email.eq_ignore_ascii_case(email)
                && !account.user.email.eq_ignore_ascii_case(&current_email)
        }) {
            return EmailInUseSnafu {
                stage: "update-profile",
                email: email.to_string(),
            }
            .fail();
        }

        let Some(account) = accounts
            .iter_mut()
            .find(|account| account.user.email.eq_ignore_ascii_case(&current_email))
        else {
            return AccountMissingSnafu {
                stage: "update-profile",
                email: current_email,
            }
            .fail();
        };

        account.user.name = name.trim().to_string();
        account.user.email = email.to_string();
        let updated = account.user.clone();
        *self.signed_in.write().await = Some(updated.email.clone());
        tracing::info!(email = %updated.email, "profile updated");
        Ok(updated)
    }

    async fn change_password_inner(&self, current: &str, new: &str) -> BackendResult<bool> {
        let Some(email) = self.signed_in.read().await.clone() else {
            return NotSignedInSnafu {
                stage: "change-password",
            }
            .fail();
        };

        let mut accounts = self.accounts.write().await;
        let Some(account) = accounts
            .iter_mut()
            .find(|account| account.user.email.eq_ignore_ascii_case(&email))
        else {
            return AccountMissingSnafu {
                stage: "change-password",
                email,
            }
            .fail();
        };

        if account.password != current {
            tracing::info!(email = %email, "password change refused");
            return Ok(false);
        }
        account.password = new.to_string();
        tracing::info!(email = %email, "password changed");
        Ok(true)
    }
}

impl Default for MockAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthBackend for MockAuthBackend {
    fn login<'a>(&'a self, email: &'a str, password: &'a str) -> BoxFuture<'a, BackendResult<Option<User>>> {
        Box::pin(self.login_inner(email, password))
    }

    fn register<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<Option<User>>> {
        Box::pin(self.register_inner(email, password, name))
    }

    fn update_profile<'a>(&'a self, name: &'a str, email: &'a str) -> BoxFuture<'a, BackendResult<User>> {
        Box::pin(self.update_profile_inner(name, email))
    }

    fn change_password<'a>(&'a self, current: &'a str, new: &'a str) -> BoxFuture<'a, BackendResult<bool>> {
        Box::pin(self.change_password_inner(current, new))
    }

    fn logout(&self) {
        match self.signed_in.try_write() {
            Ok(mut signed_in) => *signed_in = None,
            Err(_) => tracing::warn!("logout raced an in-flight account request"),
        }
    }
}
