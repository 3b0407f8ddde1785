// Security Check
// Restricts job queries to what the caller may see.

use crate::query_builder::{placeholders, SelectBuilder};
use crate::statement_cache::Bind;
use jobstore_core::domain::{Role, User};
use jobstore_core::error::{AppError, Result};
use jobstore_core::port::ColumnLookup;
use tracing::info;

/// Apply the role check to `query`. Must run before any filter is added so
/// the restriction is the first WHERE condition.
///
/// - elevated roles: unrestricted
/// - `user` role: own jobs plus jobs of own projects
/// - anonymous or role-less: `Forbidden`
pub fn security_check(user: Option<&User>, query: &mut SelectBuilder) -> Result<()> {
    let user = user.ok_or_else(|| AppError::Forbidden("anonymous access to job data".into()))?;

    if user.is_elevated() {
        return Ok(());
    }

    if !user.has_role(Role::User) {
        info!(username = %user.username, "User without job access role");
        return Err(AppError::Forbidden(format!(
            "user {} has no role with job access",
            user.username
        )));
    }

    if user.projects.is_empty() {
        query.and_where("job.user = ?", [Bind::from(user.username.as_str())]);
    } else {
        let mut binds = Vec::with_capacity(user.projects.len() + 1);
        binds.push(Bind::from(user.username.as_str()));
        binds.extend(user.projects.iter().map(|p| Bind::from(p.as_str())));
        query.and_where(
            format!(
                "(job.user = ? OR job.project IN ({}))",
                placeholders(user.projects.len())
            ),
            binds,
        );
    }
    Ok(())
}

/// Only elevated callers may run the generic column lookups
pub fn require_elevated(user: Option<&User>, lookup: ColumnLookup, term: &str) -> Result<()> {
    match user {
        Some(user) if user.is_elevated() => Ok(()),
        Some(user) => {
            info!(
                username = %user.username,
                lookup = ?lookup,
                term = %term,
                "Non-elevated column lookup forbidden"
            );
            Err(AppError::Forbidden(format!(
                "user {} may not look up {:?}",
                user.username, lookup
            )))
        }
        None => Err(AppError::Forbidden(format!(
            "anonymous caller may not look up {:?}",
            lookup
        ))),
    }
}

/// (table, select column, where column) of an allowlisted lookup
pub fn lookup_columns(lookup: ColumnLookup) -> (&'static str, &'static str, &'static str) {
    match lookup {
        ColumnLookup::JobUser => ("job", "job.user", "job.user"),
        ColumnLookup::JobProject => ("job", "job.project", "job.project"),
        ColumnLookup::UsernameByName => ("user", "user.username", "user.name"),
        ColumnLookup::NameByUsername => ("user", "user.name", "user.username"),
    }
}
