//! Tenant filter composition and reserved-key enforcement (spec §4.3).

use contextd_core::{Error, Filter, Payload, Result, TenantContext};

/// Build the filter expression that scopes results to `tenant`
/// (`tenant_id` and, when present, `team_id`/`project_id`).
#[must_use]
pub fn tenant_filter(tenant: &TenantContext) -> Filter {
    let mut f = Filter::Eq("tenant_id".to_string(), tenant.tenant_id().into());
    if let Some(team) = tenant.team_id() {
        f = f.and(Filter::Eq("team_id".to_string(), team.into()));
    }
    if let Some(project) = tenant.project_id() {
        f = f.and(Filter::Eq("project_id".to_string(), project.into()));
    }
    f
}

/// Reject a caller-supplied filter that references any reserved scope
/// key (spec §4.3 step 3).
///
/// # Errors
///
/// Returns [`Error::TenantFilterInjection`] naming the offending key.
pub fn reject_filter_injection(filter: &Filter, tenant: &TenantContext) -> Result<()> {
    let reserved = tenant.reserved_keys();
    for key in filter.referenced_keys() {
        if reserved.contains(&key) {
            return Err(Error::TenantFilterInjection(key.to_string()));
        }
    }
    Ok(())
}

/// Compose the effective filter `AND(user_filter, tenant_filter)` (spec
/// §4.3 step 2), after rejecting injection attempts in `user_filter`.
///
/// # Errors
///
/// Returns [`Error::TenantFilterInjection`] if `user_filter` references a
/// reserved scope key.
pub fn compose(user_filter: Option<&Filter>, tenant: &TenantContext) -> Result<Filter> {
    if let Some(f) = user_filter {
        reject_filter_injection(f, tenant)?;
    }
    let scope = tenant_filter(tenant);
    Ok(match user_filter {
        Some(f) => scope.and(f.clone()),
        None => scope,
    })
}

/// Stamp tenant-scope fields into a payload, overwriting any
/// caller-supplied values (spec §4.3 step 4: "Stamped fields are
/// authoritative — callers cannot override.").
pub fn stamp_payload(payload: &mut Payload, tenant: &TenantContext) {
    payload.insert("tenant_id".to_string(), tenant.tenant_id().into());
    if let Some(team) = tenant.team_id() {
        payload.insert("team_id".to_string(), team.into());
    }
    if let Some(project) = tenant.project_id() {
        payload.insert("project_id".to_string(), project.into());
    }
}

/// Strip any reserved scope keys a patch tried to set or unset, so a
/// partial update can never override the stamped tenant fields.
pub fn scrub_patch_reserved_keys(
    payload_set: &mut Payload,
    payload_unset: &mut Vec<String>,
    tenant: &TenantContext,
) {
    let reserved = tenant.reserved_keys();
    payload_set.retain(|k, _| !reserved.contains(&k.as_str()));
    payload_unset.retain(|k| !reserved.contains(&k.as_str()));
}

/// Whether a document's stamped `tenant_id` (and, if set, `team_id` /
/// `project_id`) matches the given tenant context.
#[must_use]
pub fn owned_by(payload: &Payload, tenant: &TenantContext) -> bool {
    if payload.get("tenant_id").and_then(|v| v.as_str()) != Some(tenant.tenant_id()) {
        return false;
    }
    if let Some(team) = tenant.team_id() {
        if payload.get("team_id").and_then(|v| v.as_str()) != Some(team) {
            return false;
        }
    }
    if let Some(project) = tenant.project_id() {
        if payload.get("project_id").and_then(|v| v.as_str()) != Some(project) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantContext {
        TenantContext::new("acme", Some("team_a".to_string()), None).unwrap()
    }

    #[test]
    fn rejects_filter_referencing_tenant_id() {
        let f = Filter::Eq("tenant_id".to_string(), "other".into());
        assert!(reject_filter_injection(&f, &tenant()).is_err());
    }

    #[test]
    fn allows_filter_on_non_reserved_keys() {
        let f = Filter::Eq("title".to_string(), "foo".into());
        assert!(reject_filter_injection(&f, &tenant()).is_ok());
    }

    #[test]
    fn stamped_fields_overwrite_caller_values() {
        let mut payload = Payload::new();
        payload.insert("tenant_id".to_string(), "attacker".into());
        stamp_payload(&mut payload, &tenant());
        assert_eq!(payload.get("tenant_id").and_then(|v| v.as_str()), Some("acme"));
    }

    #[test]
    fn owned_by_checks_every_scope_level() {
        let mut payload = Payload::new();
        payload.insert("tenant_id".to_string(), "acme".into());
        payload.insert("team_id".to_string(), "team_a".into());
        assert!(owned_by(&payload, &tenant()));

        payload.insert("team_id".to_string(), "team_b".into());
        assert!(!owned_by(&payload, &tenant()));
    }
}
