//! Row-level access resolution.
//!
//! A row's visibility decides which grant scopes count; the grants decide
//! who matches and with which extra capabilities. The creator always has
//! full access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::models::{Actor, GrantScope, Row, RowPermission, Visibility};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_read: bool,
    pub can_comment: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        can_read: false,
        can_comment: false,
        can_update: false,
        can_delete: false,
    };

    pub const FULL: Capabilities = Capabilities {
        can_read: true,
        can_comment: true,
        can_update: true,
        can_delete: true,
    };
}

/// Capability flags attached to every grant of a sharing change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrantFlags {
    #[serde(default)]
    pub can_comment: bool,
    #[serde(default)]
    pub can_update: bool,
    #[serde(default)]
    pub can_delete: bool,
}

/// Requested sharing state of a row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShareSettings {
    pub visibility: Visibility,
    /// Tenant, role, group or user ids depending on `visibility`.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub flags: GrantFlags,
}

fn scope_counts_for(visibility: Visibility, scope: &GrantScope) -> bool {
    match visibility {
        Visibility::Private => false,
        Visibility::Public => true,
        Visibility::Tenant => matches!(scope, GrantScope::Tenant(_)),
        Visibility::Roles => matches!(scope, GrantScope::Role(_)),
        Visibility::Groups => matches!(scope, GrantScope::Group(_)),
        Visibility::Users => matches!(scope, GrantScope::User(_)),
    }
}

/// Role and group ids are only meaningful inside the row's own tenant.
fn actor_matches(actor: &Actor, row: &Row, scope: &GrantScope) -> bool {
    let same_tenant = row.tenant_id.is_some() && actor.tenant_id == row.tenant_id;
    match scope {
        GrantScope::Tenant(id) => actor.tenant_id.as_deref() == Some(id.as_str()),
        GrantScope::Role(id) => same_tenant && actor.role_ids.contains(id),
        GrantScope::Group(id) => same_tenant && actor.group_ids.contains(id),
        GrantScope::User(id) => actor.user_id == *id,
    }
}

/// Resolve what `actor` may do with `row`. `None` is an anonymous caller.
pub fn resolve(row: &Row, grants: &[RowPermission], actor: Option<&Actor>) -> Capabilities {
    if actor.is_some_and(|a| a.user_id == row.created_by) {
        return Capabilities::FULL;
    }

    let mut caps = Capabilities::NONE;
    if row.visibility == Visibility::Public {
        caps.can_read = true;
    }

    let Some(actor) = actor else {
        return caps;
    };

    for grant in grants
        .iter()
        .filter(|g| g.row_id == row.id && scope_counts_for(row.visibility, &g.scope))
        .filter(|g| actor_matches(actor, row, &g.scope))
    {
        caps.can_read = true;
        caps.can_comment |= grant.can_comment;
        caps.can_update |= grant.can_update;
        caps.can_delete |= grant.can_delete;
    }
    caps
}

/// Build the complete grant set for a sharing change.
///
/// `private` and `public` produce no grants. `tenant` falls back to the row's
/// own tenant when no target is given. Targets are de-duplicated and grant ids
/// derive from (row, scope), so the same settings always produce the same set.
pub fn grants_for(row: &Row, settings: &ShareSettings) -> Result<Vec<RowPermission>> {
    let targets: BTreeSet<String> = settings
        .targets
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let scopes: Vec<GrantScope> = match settings.visibility {
        Visibility::Private | Visibility::Public => Vec::new(),
        Visibility::Tenant => {
            if targets.is_empty() {
                let tenant = row.tenant_id.clone().ok_or_else(|| {
                    Error::validation("a global row needs an explicit tenant to share with")
                })?;
                vec![GrantScope::Tenant(tenant)]
            } else {
                targets.into_iter().map(GrantScope::Tenant).collect()
            }
        }
        Visibility::Roles | Visibility::Groups if row.tenant_id.is_none() => {
            return Err(Error::validation(format!(
                "a global row cannot be shared by {}",
                settings.visibility
            )));
        }
        other => {
            if targets.is_empty() {
                return Err(Error::validation(format!(
                    "visibility '{}' needs at least one target",
                    other
                )));
            }
            targets
                .into_iter()
                .map(|t| match other {
                    Visibility::Roles => GrantScope::Role(t),
                    Visibility::Groups => GrantScope::Group(t),
                    _ => GrantScope::User(t),
                })
                .collect()
        }
    };

    Ok(scopes
        .into_iter()
        .map(|scope| RowPermission {
            id: format!("{}:{}", row.id, scope.key()),
            row_id: row.id.clone(),
            scope,
            can_comment: settings.flags.can_comment,
            can_update: settings.flags.can_update,
            can_delete: settings.flags.can_delete,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(visibility: Visibility) -> Row {
        Row {
            id: "r1".to_string(),
            entity_id: "e1".to_string(),
            tenant_id: Some("t1".to_string()),
            folio: 1,
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            visibility,
            columns: Default::default(),
            values: vec![],
            tags: vec![],
        }
    }

    fn actor(user: &str, tenant: Option<&str>, roles: &[&str], groups: &[&str]) -> Actor {
        Actor {
            user_id: user.to_string(),
            tenant_id: tenant.map(str::to_string),
            role_ids: roles.iter().map(|s| s.to_string()).collect(),
            group_ids: groups.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn share(visibility: Visibility, targets: &[&str], flags: GrantFlags) -> ShareSettings {
        ShareSettings {
            visibility,
            targets: targets.iter().map(|s| s.to_string()).collect(),
            flags,
        }
    }

    #[test]
    fn test_private_row_only_creator_reads() {
        let r = row(Visibility::Private);
        // stale grants must not leak through a private row
        let stale = grants_for(&row(Visibility::Tenant), &share(Visibility::Tenant, &[], GrantFlags::default())).unwrap();

        assert_eq!(resolve(&r, &stale, Some(&actor("alice", None, &[], &[]))), Capabilities::FULL);
        assert_eq!(resolve(&r, &stale, Some(&actor("bob", Some("t1"), &[], &[]))), Capabilities::NONE);
        assert_eq!(resolve(&r, &stale, None), Capabilities::NONE);
    }

    #[test]
    fn test_public_row_readable_by_anyone() {
        let r = row(Visibility::Public);
        assert!(resolve(&r, &[], None).can_read);
        assert!(resolve(&r, &[], Some(&actor("mallory", Some("t9"), &[], &[]))).can_read);
        assert!(!resolve(&r, &[], None).can_update);
    }

    #[test]
    fn test_tenant_grant_flags() {
        let r = row(Visibility::Tenant);
        let flags = GrantFlags { can_comment: true, can_update: false, can_delete: false };
        let grants = grants_for(&r, &share(Visibility::Tenant, &[], flags)).unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].scope, GrantScope::Tenant("t1".to_string()));

        let member = resolve(&r, &grants, Some(&actor("bob", Some("t1"), &[], &[])));
        assert_eq!(
            member,
            Capabilities { can_read: true, can_comment: true, can_update: false, can_delete: false }
        );
        let outsider = resolve(&r, &grants, Some(&actor("carol", Some("t2"), &[], &[])));
        assert_eq!(outsider, Capabilities::NONE);
    }

    #[test]
    fn test_roles_groups_users_scopes() {
        let flags = GrantFlags { can_comment: false, can_update: true, can_delete: false };

        let r = row(Visibility::Roles);
        let grants = grants_for(&r, &share(Visibility::Roles, &["sales"], flags)).unwrap();
        assert!(resolve(&r, &grants, Some(&actor("bob", Some("t1"), &["sales"], &[]))).can_update);
        assert!(!resolve(&r, &grants, Some(&actor("bob", Some("t1"), &["support"], &[]))).can_read);

        let r = row(Visibility::Groups);
        let grants = grants_for(&r, &share(Visibility::Groups, &["emea"], flags)).unwrap();
        assert!(resolve(&r, &grants, Some(&actor("bob", Some("t1"), &[], &["emea"]))).can_read);
        assert!(!resolve(&r, &grants, Some(&actor("bob", Some("t1"), &["emea"], &[]))).can_read);

        let r = row(Visibility::Users);
        let grants = grants_for(&r, &share(Visibility::Users, &["u1", "u2"], flags)).unwrap();
        assert!(resolve(&r, &grants, Some(&actor("u2", None, &[], &[]))).can_read);
        assert!(!resolve(&r, &grants, Some(&actor("u3", Some("t1"), &[], &[]))).can_read);
    }

    #[test]
    fn test_grants_outside_visibility_are_ignored() {
        let r = row(Visibility::Users);
        let tenant_grants = grants_for(&r, &share(Visibility::Tenant, &[], GrantFlags::default())).unwrap();
        assert_eq!(
            resolve(&r, &tenant_grants, Some(&actor("bob", Some("t1"), &[], &[]))),
            Capabilities::NONE
        );
    }

    #[test]
    fn test_grants_for_is_deterministic() {
        let r = row(Visibility::Users);
        let settings = share(Visibility::Users, &["u2", "u1", "u2", " "], GrantFlags::default());
        let first = grants_for(&r, &settings).unwrap();
        let second = grants_for(&r, &settings).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "r1:user:u1");
    }

    #[test]
    fn test_grants_for_validation() {
        let r = row(Visibility::Private);
        assert!(grants_for(&r, &share(Visibility::Roles, &[], GrantFlags::default())).is_err());
        assert!(grants_for(&r, &share(Visibility::Public, &[], GrantFlags::default())).unwrap().is_empty());

        let mut global = row(Visibility::Private);
        global.tenant_id = None;
        assert!(grants_for(&global, &share(Visibility::Tenant, &[], GrantFlags::default())).is_err());
        assert!(grants_for(&global, &share(Visibility::Roles, &["owner"], GrantFlags::default())).is_err());
        assert!(grants_for(&global, &share(Visibility::Groups, &["emea"], GrantFlags::default())).is_err());
    }

    #[test]
    fn test_role_and_group_grants_stay_inside_the_row_tenant() {
        let flags = GrantFlags::default();
        let r = row(Visibility::Roles);
        let grants = grants_for(&r, &share(Visibility::Roles, &["owner"], flags)).unwrap();
        assert!(resolve(&r, &grants, Some(&actor("bob", Some("t1"), &["owner"], &[]))).can_read);
        assert!(!resolve(&r, &grants, Some(&actor("eve", Some("t2"), &["owner"], &[]))).can_read);
        assert!(!resolve(&r, &grants, Some(&actor("eve", None, &["owner"], &[]))).can_read);

        // role grants never match on a global row
        let mut global = r.clone();
        global.tenant_id = None;
        assert!(!resolve(&global, &grants, Some(&actor("bob", Some("t1"), &["owner"], &[]))).can_read);
    }
}
