//! In-memory directory and platform.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ldap3::SearchEntry;
use reqwest::StatusCode;

use crate::ldap::{self, Directory, DirectoryError, UserData};
use crate::mattermost::{self, Platform, PlatformError, Team, User};

fn server_error() -> PlatformError {
    PlatformError::Status {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "boom".into(),
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    passwords: HashMap<String, String>,
    users: HashMap<String, UserData>,
    entries: Vec<(String, SearchEntry)>,
    failing_search: bool,
    searches: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl FakeDirectory {
    pub fn with_user(mut self, uid: &str, user: UserData) -> Self {
        self.users.insert(uid.to_owned(), user);
        self
    }

    pub fn with_password(mut self, uid: &str, password: &str) -> Self {
        self.passwords.insert(uid.to_owned(), password.to_owned());
        self
    }

    /// Group entry listing `uid` as member.
    pub fn with_group(self, uid: &str, unit: &str, name: &str) -> Self {
        let dn = format!("cn={name},ou={unit},dc=sog");
        self.with_entry(uid, &dn, &[("ou", unit), ("cn", name)])
    }

    pub fn with_entry(
        mut self,
        uid: &str,
        dn: &str,
        attrs: &[(&str, &str)],
    ) -> Self {
        let entry = SearchEntry {
            dn: dn.to_owned(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
                .collect(),
            bin_attrs: HashMap::new(),
        };
        self.entries.push((uid.to_owned(), entry));
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.failing_search = true;
        self
    }

    /// `(base_dn, filter)` of every search.
    pub fn searches(&self) -> Vec<(String, String)> {
        self.searches.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> ldap::Result<String> {
        match self.passwords.get(username) {
            Some(expected) if expected == password => Ok(username.to_owned()),
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }

    async fn get_user_by_id(&self, uid: &str) -> ldap::Result<UserData> {
        self.users
            .get(uid)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound(uid.to_owned()))
    }

    async fn search(
        &self,
        base_dn: &str,
        filter: &str,
        _attributes: &[&str],
    ) -> ldap::Result<Vec<SearchEntry>> {
        self.searches
            .lock()
            .unwrap()
            .push((base_dn.to_owned(), filter.to_owned()));

        if self.failing_search {
            let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
            return Err(ldap3::LdapError::from(err).into());
        }

        Ok(self
            .entries
            .iter()
            .filter(|(uid, _)| filter.contains(&format!("member=uid={uid},")))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn close(&self) -> ldap::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct State {
    users: Vec<User>,
    teams: Vec<Team>,
    members: Vec<(String, String)>,
    next_id: usize,
    team_lookups: usize,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
    lookup_failures: Mutex<usize>,
    creation_fails: bool,
    failing_teams: Vec<String>,
}

impl FakePlatform {
    pub fn with_user(self, mut user: User) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            user.id = state.id("user");
            state.users.push(user);
        }
        self
    }

    /// Every account lookup fails.
    pub fn failing_user_lookup(self) -> Self {
        self.failing_user_lookups(usize::MAX)
    }

    /// The next `count` account lookups fail.
    pub fn failing_user_lookups(self, count: usize) -> Self {
        *self.lookup_failures.lock().unwrap() = count;
        self
    }

    pub fn failing_user_creation(mut self) -> Self {
        self.creation_fails = true;
        self
    }

    pub fn failing_team_creation(mut self, name: &str) -> Self {
        self.failing_teams.push(name.to_owned());
        self
    }

    pub fn users(&self) -> Vec<User> {
        self.state.lock().unwrap().users.clone()
    }

    pub fn teams(&self) -> Vec<Team> {
        self.state.lock().unwrap().teams.clone()
    }

    /// `(team_id, user_id)` pairs.
    pub fn members(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().members.clone()
    }

    pub fn team_lookups(&self) -> usize {
        self.state.lock().unwrap().team_lookups
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn get_user_by_email(&self, email: &str) -> mattermost::Result<User> {
        {
            let mut failures = self.lookup_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(server_error());
            }
        }

        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    async fn create_user(&self, user: &User) -> mattermost::Result<User> {
        if self.creation_fails {
            return Err(server_error());
        }

        let mut state = self.state.lock().unwrap();
        let mut user = user.clone();
        user.id = state.id("user");
        state.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> mattermost::Result<User> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .users
            .iter_mut()
            .find(|stored| stored.id == user.id)
            .ok_or(PlatformError::NotFound)?;
        *stored = user.clone();
        Ok(user.clone())
    }

    async fn get_team_by_name(&self, name: &str) -> mattermost::Result<Team> {
        let mut state = self.state.lock().unwrap();
        state.team_lookups += 1;
        state
            .teams
            .iter()
            .find(|team| team.name == name)
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    async fn create_team(&self, team: &Team) -> mattermost::Result<Team> {
        if self.failing_teams.contains(&team.name) {
            return Err(server_error());
        }

        let mut state = self.state.lock().unwrap();
        let mut team = team.clone();
        team.id = state.id("team");
        state.teams.push(team.clone());
        Ok(team)
    }

    async fn add_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> mattermost::Result<()> {
        let mut state = self.state.lock().unwrap();
        let member = (team_id.to_owned(), user_id.to_owned());
        if !state.members.contains(&member) {
            state.members.push(member);
        }
        Ok(())
    }
}
