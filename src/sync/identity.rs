//! Mattermost account matching a directory user.

use crate::ldap::UserData;
use crate::mattermost::{Platform, User};

/// What happened to the remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOutcome {
    Created,
    Updated,
    Failed,
}

impl IdentityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityOutcome::Created => "created",
            IdentityOutcome::Updated => "updated",
            IdentityOutcome::Failed => "failed",
        }
    }
}

/// Split a display name on its first space.
///
/// Everything after the first space is kept as last name.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(' ') {
        Some((first, last)) => (first, Some(last)),
        None => (name, None),
    }
}

/// Create the account of `user` or bring it up to date.
///
/// Failures are logged and never abort the rest of the sync.
pub async fn reconcile_identity(
    platform: &dyn Platform,
    auth_service: &str,
    user: &UserData,
) -> IdentityOutcome {
    let auth_data = user.id.to_string();

    let mut account = match platform.get_user_by_email(&user.email).await {
        Ok(account) => account,
        Err(err) if err.is_not_found() => {
            let account = User {
                username: user.username.clone(),
                email: user.email.clone(),
                email_verified: true,
                first_name: user.name.clone(),
                auth_service: auth_service.to_owned(),
                auth_data: Some(auth_data),
                ..Default::default()
            };

            return match platform.create_user(&account).await {
                Ok(created) => {
                    tracing::info!(
                        email = %user.email,
                        user_id = %created.id,
                        "mattermost user created"
                    );
                    IdentityOutcome::Created
                },
                Err(err) => {
                    tracing::error!(
                        email = %user.email,
                        error = %err,
                        "could not create mattermost user"
                    );
                    IdentityOutcome::Failed
                },
            };
        },
        Err(err) => {
            tracing::error!(
                email = %user.email,
                error = %err,
                "could not fetch mattermost user"
            );
            return IdentityOutcome::Failed;
        },
    };

    account.username = user.username.clone();
    account.email = user.email.clone();

    let (first_name, last_name) = split_name(&user.name);
    account.first_name = first_name.to_owned();
    if let Some(last_name) = last_name {
        account.last_name = last_name.to_owned();
    }

    // an account moved to another authority on purpose keeps it.
    if account.auth_service != auth_service {
        account.auth_service = auth_service.to_owned();
        account.auth_data = Some(auth_data);
    }

    match platform.update_user(&account).await {
        Ok(_) => {
            tracing::debug!(
                email = %user.email,
                user_id = %account.id,
                "mattermost user updated"
            );
            IdentityOutcome::Updated
        },
        Err(err) => {
            tracing::error!(
                email = %user.email,
                error = %err,
                "could not update mattermost user"
            );
            IdentityOutcome::Failed
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fake::FakePlatform;

    const AUTH_SERVICE: &str = "gitlab";

    fn ada() -> UserData {
        UserData {
            id: 1815,
            username: "ada".into(),
            name: "Ada Lovelace".into(),
            email: "ada@sog.example".into(),
        }
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("Ada Lovelace"), ("Ada", Some("Lovelace")));
        assert_eq!(split_name("Ada"), ("Ada", None));
        assert_eq!(
            split_name("Ada King Lovelace"),
            ("Ada", Some("King Lovelace"))
        );
    }

    #[tokio::test]
    async fn test_create_missing_account() {
        let platform = FakePlatform::default();

        let outcome = reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        assert_eq!(outcome, IdentityOutcome::Created);

        let users = platform.users();
        assert_eq!(users.len(), 1);
        let user = &users[0];
        assert_eq!(user.username, "ada");
        assert_eq!(user.email, "ada@sog.example");
        assert!(user.email_verified);
        assert_eq!(user.first_name, "Ada Lovelace");
        assert_eq!(user.last_name, "");
        assert_eq!(user.auth_service, AUTH_SERVICE);
        assert_eq!(user.auth_data.as_deref(), Some("1815"));
    }

    #[tokio::test]
    async fn test_second_sync_updates() {
        let platform = FakePlatform::default();

        reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        let outcome = reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        assert_eq!(outcome, IdentityOutcome::Updated);

        let users = platform.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].first_name, "Ada");
        assert_eq!(users[0].last_name, "Lovelace");
    }

    #[tokio::test]
    async fn test_update_overrides_foreign_authority() {
        let platform = FakePlatform::default().with_user(User {
            username: "old".into(),
            email: "ada@sog.example".into(),
            auth_service: "saml".into(),
            auth_data: Some("ada-saml".into()),
            ..Default::default()
        });

        let outcome = reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        assert_eq!(outcome, IdentityOutcome::Updated);

        let user = &platform.users()[0];
        assert_eq!(user.username, "ada");
        assert_eq!(user.auth_service, AUTH_SERVICE);
        assert_eq!(user.auth_data.as_deref(), Some("1815"));
    }

    #[tokio::test]
    async fn test_update_keeps_matching_authority() {
        let platform = FakePlatform::default().with_user(User {
            username: "ada".into(),
            email: "ada@sog.example".into(),
            last_name: "Byron".into(),
            auth_service: AUTH_SERVICE.into(),
            auth_data: Some("42".into()),
            ..Default::default()
        });

        let user = UserData {
            name: "Ada".into(),
            ..ada()
        };
        reconcile_identity(&platform, AUTH_SERVICE, &user).await;

        let user = &platform.users()[0];
        assert_eq!(user.auth_data.as_deref(), Some("42"));
        assert_eq!(user.first_name, "Ada");
        // no space, last name untouched.
        assert_eq!(user.last_name, "Byron");
    }

    #[tokio::test]
    async fn test_lookup_error() {
        let platform = FakePlatform::default().failing_user_lookup();

        let outcome = reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        assert_eq!(outcome, IdentityOutcome::Failed);
        assert!(platform.users().is_empty());
    }

    #[tokio::test]
    async fn test_creation_error() {
        let platform = FakePlatform::default().failing_user_creation();

        let outcome = reconcile_identity(&platform, AUTH_SERVICE, &ada()).await;
        assert_eq!(outcome, IdentityOutcome::Failed);
        assert!(platform.users().is_empty());
    }
}
