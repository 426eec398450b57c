//! LDAP support.

use async_trait::async_trait;
use ldap3::{
    DerefAliases, Ldap as Ldap3, LdapConnAsync, LdapError, Scope,
    SearchEntry, SearchOptions,
};

use crate::config::Attributes;

/// LDAP result code for a failed bind.
const INVALID_CREDENTIALS: u32 = 49;
const DEFAULT_USERS_FILTER: &str = "(uid={uid})";

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors returned by the directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Ldap(#[from] LdapError),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("entry {dn} is missing `{attribute}`")]
    InvalidEntry { dn: String, attribute: String },

    #[error("users filter must contain `{{uid}}`")]
    InvalidTemplate,

    #[error("no password given to bind as {0}")]
    MissingBindPassword(String),
}

/// User record read from the directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
}

/// Operations the synchronization needs from a directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Check credentials and return the user identifier.
    async fn authenticate(&self, username: &str, password: &str)
    -> Result<String>;

    /// Read a user record by identifier.
    async fn get_user_by_id(&self, uid: &str) -> Result<UserData>;

    /// Search the whole subtree under `base_dn` without dereferencing
    /// aliases.
    async fn search(
        &self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub addr: String,
    pub users_dn: String,
    pub users_filter: String,
    pub attributes: Attributes,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(
        addr: impl Into<String>,
        users_dn: impl Into<String>,
        users_filter: Option<String>,
        attributes: Attributes,
    ) -> Result<Self> {
        let filter =
            users_filter.unwrap_or_else(|| DEFAULT_USERS_FILTER.to_owned());

        if !filter.contains("{uid}") {
            return Err(DirectoryError::InvalidTemplate);
        }

        Ok(Self {
            addr: addr.into(),
            users_dn: users_dn.into(),
            users_filter: filter,
            attributes,
        })
    }

    /// Configure LDAP filter for user identifier.
    pub fn user_filter(&self, uid: &str) -> String {
        self.users_filter.replace("{uid}", &escape_ldap(uid))
    }

    fn user_attributes(&self) -> Vec<&str> {
        vec![
            self.attributes.id.as_str(),
            self.attributes.username.as_str(),
            self.attributes.name.as_str(),
            self.attributes.email.as_str(),
        ]
    }

    /// Build [`UserData`] from a search entry.
    pub fn parse_user(&self, entry: &SearchEntry) -> Result<UserData> {
        let id = first_value(entry, &self.attributes.id)?;
        let id = id.parse::<i64>().map_err(|_| DirectoryError::InvalidEntry {
            dn: entry.dn.clone(),
            attribute: self.attributes.id.clone(),
        })?;

        Ok(UserData {
            id,
            username: first_value(entry, &self.attributes.username)?.into(),
            name: first_value(entry, &self.attributes.name)?.into(),
            email: first_value(entry, &self.attributes.email)?.into(),
        })
    }
}

/// LDAP manager holding the service connection.
#[derive(Clone, Debug)]
pub struct Ldap {
    conn: Ldap3,
    config: LdapConfig,
}

impl Ldap {
    /// Create a new [`Ldap3`] connection.
    pub async fn connect(
        config: LdapConfig,
        bind_dn: Option<&str>,
        bind_password: Option<&str>,
    ) -> Result<Self> {
        let credentials = match (bind_dn, bind_password) {
            (Some(dn), Some(password)) => Some((dn, password)),
            (Some(dn), None) => {
                return Err(DirectoryError::MissingBindPassword(dn.to_owned()));
            },
            (None, _) => None,
        };

        let (handle, mut conn) = LdapConnAsync::new(&config.addr).await?;
        ldap3::drive!(handle);

        if let Some((dn, password)) = credentials {
            conn.simple_bind(dn, password).await?.success()?;
        }

        tracing::info!(addr = %config.addr, "ldap connected");

        Ok(Self { conn, config })
    }

    async fn find_user(&self, uid: &str) -> Result<SearchEntry> {
        let mut entries = self
            .search(
                &self.config.users_dn,
                &self.config.user_filter(uid),
                &self.config.user_attributes(),
            )
            .await?;

        if entries.len() != 1 {
            return Err(DirectoryError::UserNotFound(uid.to_owned()));
        }

        Ok(entries.remove(0))
    }

    /// Bind as `dn` on a dedicated connection.
    async fn bind(&self, dn: &str, password: &str) -> Result<()> {
        let (handle, mut conn) = LdapConnAsync::new(&self.config.addr).await?;
        ldap3::drive!(handle);

        let result = conn.simple_bind(dn, password).await;
        // always release the user connection.
        if let Err(err) = conn.unbind().await {
            tracing::debug!(error = %err, "ldap unbind failed");
        }

        match result?.success() {
            Ok(_) => Ok(()),
            Err(LdapError::LdapResult { result })
                if result.rc == INVALID_CREDENTIALS =>
            {
                Err(DirectoryError::InvalidCredentials)
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Directory for Ldap {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String> {
        // an empty password is an anonymous bind on most servers.
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }

        let entry = match self.find_user(username).await {
            Ok(entry) => entry,
            Err(DirectoryError::UserNotFound(_)) => {
                return Err(DirectoryError::InvalidCredentials);
            },
            Err(err) => return Err(err),
        };

        self.bind(&entry.dn, password).await?;

        Ok(first_value(&entry, &self.config.attributes.username)?.to_owned())
    }

    async fn get_user_by_id(&self, uid: &str) -> Result<UserData> {
        let entry = self.find_user(uid).await?;
        self.config.parse_user(&entry)
    }

    async fn search(
        &self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>> {
        let mut conn = self.conn.clone();
        let (entries, _) = conn
            .with_search_options(
                SearchOptions::new().deref(DerefAliases::Never),
            )
            .search(base_dn, Scope::Subtree, filter, attributes.to_vec())
            .await?
            .success()?;

        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    async fn close(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.unbind().await?;
        tracing::info!(addr = %self.config.addr, "ldap connection closed");
        Ok(())
    }
}

/// First value of `attribute` on `entry`.
pub fn first_value<'a>(
    entry: &'a SearchEntry,
    attribute: &str,
) -> Result<&'a str> {
    entry
        .attrs
        .get(attribute)
        .and_then(|values| values.first())
        .map(String::as_str)
        .ok_or_else(|| DirectoryError::InvalidEntry {
            dn: entry.dn.clone(),
            attribute: attribute.to_owned(),
        })
}

/// Escape a value before inserting it in a search filter.
pub fn escape_ldap(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
