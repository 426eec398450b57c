//! Team and team membership matching a directory group.

use crate::mattermost::{Platform, TEAM_TYPE_INVITE, Team};
use crate::sync::SyncError;
use crate::sync::group::Group;

/// Result of a successful group reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipOutcome {
    pub team: String,
    pub team_created: bool,
}

/// Ensure the team of `group` exists and the account of `email` is in it.
///
/// Any failure stops this group only.
pub async fn reconcile_membership(
    platform: &dyn Platform,
    group: &Group,
    email: &str,
) -> Result<MembershipOutcome, SyncError> {
    let name = group.team_name();

    let (team, team_created) = match platform.get_team_by_name(&name).await {
        Ok(team) => (team, false),
        Err(err) if err.is_not_found() => {
            let team = Team {
                name: name.clone(),
                display_name: group.name.clone(),
                type_: TEAM_TYPE_INVITE.to_owned(),
                ..Default::default()
            };

            let team = platform
                .create_team(&team)
                .await
                .map_err(|source| SyncError::CreateTeam {
                    team: name.clone(),
                    source,
                })?;

            tracing::info!(
                team = %team.name,
                display_name = %team.display_name,
                "mattermost team created"
            );
            (team, true)
        },
        Err(source) => {
            return Err(SyncError::FetchTeam { team: name, source });
        },
    };

    // fetched again to get the id assigned on creation.
    let account = platform.get_user_by_email(email).await.map_err(|source| {
        SyncError::FetchAccount {
            email: email.to_owned(),
            source,
        }
    })?;

    platform
        .add_team_member(&team.id, &account.id)
        .await
        .map_err(|source| SyncError::AddMember {
            team: name.clone(),
            email: email.to_owned(),
            source,
        })?;

    tracing::info!(%email, team = %team.display_name, "user added to team");

    Ok(MembershipOutcome {
        team: name,
        team_created,
    })
}
