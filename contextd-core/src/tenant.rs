//! Tenant context: the call-local identity that scopes every operation.

use crate::error::{Error, Result};
use std::sync::LazyLock;

/// `[a-z0-9][a-z0-9_]{0,62}[a-z0-9]?`, compiled once.
static TENANT_TOKEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_]{0,62}[a-z0-9]?$").unwrap());

/// Call-local identity attached to every request (spec §3.8).
///
/// Absent or empty `tenant_id` is an error (fail-closed) everywhere this
/// type is constructed via [`TenantContext::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: String,
    team_id: Option<String>,
    project_id: Option<String>,
}

impl TenantContext {
    /// Build a tenant context, validating and sanitising every component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingTenant`] if `tenant_id` is empty, or
    /// [`Error::InvalidTenant`] if any id fails the sanitisation pattern or
    /// contains path-traversal characters.
    pub fn new(
        tenant_id: impl Into<String>,
        team_id: Option<String>,
        project_id: Option<String>,
    ) -> Result<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(Error::MissingTenant);
        }
        validate_id(&tenant_id)?;
        if let Some(team) = &team_id {
            validate_id(team)?;
        }
        if let Some(project) = &project_id {
            validate_id(project)?;
        }
        Ok(Self {
            tenant_id,
            team_id,
            project_id,
        })
    }

    /// The tenant id.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The optional team id.
    #[must_use]
    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// The optional project id.
    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// The set of payload keys this context stamps and reserves
    /// (`tenant_id`, and `team_id`/`project_id` when present).
    #[must_use]
    pub fn reserved_keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["tenant_id"];
        if self.team_id.is_some() {
            keys.push("team_id");
        }
        if self.project_id.is_some() {
            keys.push("project_id");
        }
        keys
    }
}

/// Reject path-traversal characters and enforce the sanitisation pattern
/// from spec §3.8.
fn validate_id(id: &str) -> Result<()> {
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(Error::InvalidTenant(id.to_string()));
    }
    if !TENANT_TOKEN_RE.is_match(id) {
        return Err(Error::InvalidTenant(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_tenant() {
        assert!(matches!(
            TenantContext::new("", None, None),
            Err(Error::MissingTenant)
        ));
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(TenantContext::new("../etc", None, None).is_err());
        assert!(TenantContext::new("a/b", None, None).is_err());
    }

    #[test]
    fn rejects_uppercase_and_bad_chars() {
        assert!(TenantContext::new("Acme", None, None).is_err());
        assert!(TenantContext::new("acme!", None, None).is_err());
    }

    #[test]
    fn accepts_valid_ids() {
        let ctx = TenantContext::new("acme", Some("team_a".to_string()), None).unwrap();
        assert_eq!(ctx.tenant_id(), "acme");
        assert_eq!(ctx.team_id(), Some("team_a"));
        assert_eq!(ctx.reserved_keys(), vec!["tenant_id", "team_id"]);
    }

    #[test]
    fn single_char_ids_are_valid() {
        assert!(TenantContext::new("a", None, None).is_ok());
    }
}
