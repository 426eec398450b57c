//! Mirror directory users and groups into Mattermost after a login.

#[cfg(test)]
pub(crate) mod fake;
pub mod group;
pub mod identity;
pub mod membership;

use std::sync::Arc;

use crate::ldap::Directory;
use crate::mattermost::{Platform, PlatformError};
use crate::sync::group::{Group, fetch_groups};
use crate::sync::identity::{IdentityOutcome, reconcile_identity};
use crate::sync::membership::{MembershipOutcome, reconcile_membership};

/// Failure of a single group reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("could not fetch team {team}: {source}")]
    FetchTeam { team: String, source: PlatformError },

    #[error("could not create team {team}: {source}")]
    CreateTeam { team: String, source: PlatformError },

    #[error("could not fetch user {email}: {source}")]
    FetchAccount { email: String, source: PlatformError },

    #[error("could not add {email} to team {team}: {source}")]
    AddMember {
        team: String,
        email: String,
        source: PlatformError,
    },
}

/// Directory locations and platform marker used by a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Subtree of users, used to build `member` values.
    pub users_dn: String,
    /// Search base for groups.
    pub groups_dn: String,
    /// `auth_service` of synced accounts.
    pub auth_service: String,
}

/// Summary of one sync pass.
#[derive(Debug)]
pub struct SyncReport {
    pub identity: IdentityOutcome,
    pub groups: Vec<(Group, Result<MembershipOutcome, SyncError>)>,
}

impl SyncReport {
    /// Number of groups that could not be reconciled.
    pub fn failures(&self) -> usize {
        self.groups.iter().filter(|(_, res)| res.is_err()).count()
    }
}

/// Runs a sync pass with explicitly owned handles.
pub struct Synchronizer {
    directory: Arc<dyn Directory>,
    platform: Arc<dyn Platform>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        directory: Arc<dyn Directory>,
        platform: Arc<dyn Platform>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            directory,
            platform,
            settings,
        }
    }

    /// Sync the user `uid`.
    ///
    /// Returns `None` when the user cannot be read from the directory.
    #[tracing::instrument(skip(self))]
    pub async fn sync_user(&self, uid: &str) -> Option<SyncReport> {
        let user = match self.directory.get_user_by_id(uid).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(error = %err, "could not read directory user");
                metrics::counter!("ldapsync_syncs_total", "result" => "aborted")
                    .increment(1);
                return None;
            },
        };

        let identity = reconcile_identity(
            self.platform.as_ref(),
            &self.settings.auth_service,
            &user,
        )
        .await;
        metrics::counter!("ldapsync_accounts_total", "action" => identity.as_str())
            .increment(1);

        let groups = fetch_groups(
            self.directory.as_ref(),
            uid,
            &self.settings.users_dn,
            &self.settings.groups_dn,
        )
        .await;

        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            let result =
                reconcile_membership(self.platform.as_ref(), &group, &user.email)
                    .await;

            match &result {
                Ok(outcome) => {
                    if outcome.team_created {
                        metrics::counter!("ldapsync_teams_total", "action" => "created")
                            .increment(1);
                    }
                    metrics::counter!("ldapsync_memberships_total", "result" => "ok")
                        .increment(1);
                },
                Err(err) => {
                    tracing::error!(
                        team = %group.team_name(),
                        error = %err,
                        "group not synced"
                    );
                    metrics::counter!("ldapsync_memberships_total", "result" => "failed")
                        .increment(1);
                },
            }

            results.push((group, result));
        }

        let report = SyncReport {
            identity,
            groups: results,
        };

        tracing::info!(
            email = %user.email,
            identity = identity.as_str(),
            groups = report.groups.len(),
            failures = report.failures(),
            "sync done"
        );
        metrics::counter!("ldapsync_syncs_total", "result" => "done").increment(1);

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::UserData;
    use crate::sync::fake::{FakeDirectory, FakePlatform};

    fn ada() -> UserData {
        UserData {
            id: 1815,
            username: "ada".into(),
            name: "Ada Lovelace".into(),
            email: "ada@sog.example".into(),
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            users_dn: "ou=people,dc=sog".into(),
            groups_dn: "dc=sog".into(),
            auth_service: "gitlab".into(),
        }
    }

    fn synchronizer(
        directory: FakeDirectory,
        platform: Arc<FakePlatform>,
    ) -> Synchronizer {
        Synchronizer::new(Arc::new(directory), platform, settings())
    }

    #[tokio::test]
    async fn test_full_sync() {
        let directory = FakeDirectory::default()
            .with_user("ada", ada())
            .with_group("ada", "team_blue", "Team Blue")
            .with_group("ada", "research", "Research");
        let platform = Arc::new(FakePlatform::default());

        let report = synchronizer(directory, Arc::clone(&platform))
            .sync_user("ada")
            .await
            .unwrap();

        assert_eq!(report.identity, IdentityOutcome::Created);
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.failures(), 0);
        assert_eq!(platform.users().len(), 1);
        assert_eq!(platform.teams().len(), 2);
        assert_eq!(platform.members().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_stops() {
        let directory = FakeDirectory::default()
            .with_group("ada", "team_blue", "Team Blue");
        let platform = Arc::new(FakePlatform::default());

        let report = synchronizer(directory, Arc::clone(&platform))
            .sync_user("ada")
            .await;

        assert!(report.is_none());
        assert!(platform.users().is_empty());
        assert!(platform.teams().is_empty());
    }

    #[tokio::test]
    async fn test_no_groups() {
        let directory = FakeDirectory::default().with_user("ada", ada());
        let platform = Arc::new(FakePlatform::default());

        let report = synchronizer(directory, Arc::clone(&platform))
            .sync_user("ada")
            .await
            .unwrap();

        assert!(report.groups.is_empty());
        assert!(platform.teams().is_empty());
        assert_eq!(platform.team_lookups(), 0);
    }

    #[tokio::test]
    async fn test_failed_group_is_isolated() {
        let directory = FakeDirectory::default()
            .with_user("ada", ada())
            .with_group("ada", "red", "Red")
            .with_group("ada", "team_blue", "Team Blue")
            .with_group("ada", "green", "Green");
        let platform =
            Arc::new(FakePlatform::default().failing_team_creation("team-blue"));

        let report = synchronizer(directory, Arc::clone(&platform))
            .sync_user("ada")
            .await
            .unwrap();

        assert_eq!(report.groups.len(), 3);
        assert_eq!(report.failures(), 1);
        assert!(report.groups[1].1.is_err());

        let teams: Vec<_> =
            platform.teams().into_iter().map(|team| team.name).collect();
        assert_eq!(teams, vec!["red", "green"]);
        assert_eq!(platform.members().len(), 2);
    }

    #[tokio::test]
    async fn test_identity_failure_does_not_stop_groups() {
        let directory = FakeDirectory::default()
            .with_user("ada", ada())
            .with_group("ada", "research", "Research");
        let platform = Arc::new(
            FakePlatform::default()
                .with_user(crate::mattermost::User {
                    username: "ada".into(),
                    email: "ada@sog.example".into(),
                    ..Default::default()
                })
                .failing_user_lookups(1),
        );

        let report = synchronizer(directory, Arc::clone(&platform))
            .sync_user("ada")
            .await
            .unwrap();

        assert_eq!(report.identity, IdentityOutcome::Failed);
        assert_eq!(report.failures(), 0);
        assert_eq!(platform.members().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_sync() {
        let directory = FakeDirectory::default()
            .with_user("ada", ada())
            .with_group("ada", "team_blue", "Team Blue");
        let platform = Arc::new(FakePlatform::default());
        let synchronizer = synchronizer(directory, Arc::clone(&platform));

        synchronizer.sync_user("ada").await.unwrap();
        let report = synchronizer.sync_user("ada").await.unwrap();

        assert_eq!(report.identity, IdentityOutcome::Updated);
        assert_eq!(report.failures(), 0);
        assert_eq!(platform.users().len(), 1);
        assert_eq!(platform.teams().len(), 1);
        assert_eq!(platform.members().len(), 1);
    }
}
