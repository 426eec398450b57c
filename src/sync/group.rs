//! Directory groups a user belongs to.

use crate::ldap::{Directory, escape_ldap, first_value};

const ATTRIBUTES: [&str; 3] = ["dn", "cn", "ou"];

/// A directory group, mirrored as a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Organizational unit, source of the team name.
    pub unit: String,
    /// Common name, used as team display name.
    pub name: String,
}

impl Group {
    pub fn new(unit: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            name: name.into(),
        }
    }

    /// Team name accepted by Mattermost, which rejects underscores.
    pub fn team_name(&self) -> String {
        self.unit.replace('_', "-")
    }
}

/// Filter matching entries listing `uid` as `member`.
pub fn member_filter(uid: &str, users_dn: &str) -> String {
    format!(
        "(&(objectClass=*)(member=uid={},{}))",
        escape_ldap(uid),
        users_dn
    )
}

/// Groups whose `member` is `uid=<uid>,<users_dn>`.
///
/// A failed search is logged and treated as no group at all.
pub async fn fetch_groups(
    directory: &dyn Directory,
    uid: &str,
    users_dn: &str,
    groups_dn: &str,
) -> Vec<Group> {
    let filter = member_filter(uid, users_dn);

    let entries = match directory.search(groups_dn, &filter, &ATTRIBUTES).await
    {
        Ok(entries) => entries,
        Err(err) => {
            tracing::error!(%uid, %filter, error = %err, "group search failed");
            return Vec::new();
        },
    };

    entries
        .iter()
        .filter_map(|entry| match first_value(entry, "ou") {
            Ok(unit) => Some(Group::new(
                unit,
                first_value(entry, "cn").unwrap_or(unit),
            )),
            Err(err) => {
                tracing::warn!(dn = %entry.dn, error = %err, "group skipped");
                None
            },
        })
        .collect()
}
