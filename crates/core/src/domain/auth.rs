// Caller identity and request context

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Support,
    Manager,
    Api,
    User,
}

/// Roles allowed to see other users' jobs without restriction
pub const ELEVATED_ROLES: [Role; 4] = [Role::Admin, Role::Support, Role::Manager, Role::Api];

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub projects: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            username: username.into(),
            name: String::new(),
            roles,
            projects: Vec::new(),
        }
    }

    pub fn with_projects(mut self, projects: Vec<String>) -> Self {
        self.projects = projects;
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    pub fn is_elevated(&self) -> bool {
        self.has_any_role(&ELEVATED_ROLES)
    }
}

/// Per-request context handed in by the calling (API) layer.
///
/// `requested_fields` lists the output fields the caller asked for, so that
/// expensive parts of a result (histograms) are only computed on demand.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<User>,
    pub requested_fields: HashSet<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: User) -> Self {
        Self {
            user: Some(user),
            requested_fields: HashSet::new(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn wants_field(&self, name: &str) -> bool {
        self.requested_fields.contains(name)
    }
}
