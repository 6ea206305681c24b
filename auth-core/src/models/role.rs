//! Role model - named permission bundles scoped to a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

use super::permission::{Permission, PermissionSet};

pub const SUPERADMIN_ROLE: &str = "superadmin";

/// Role entity. `tenant_id` is `None` only for system roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub permissions: BTreeSet<Permission>,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(tenant_id: Uuid, name: String, permissions: BTreeSet<Permission>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: Some(tenant_id),
            name,
            permissions,
            created_utc: Utc::now(),
        }
    }

    /// The system role that bypasses tenant scoping.
    pub fn superadmin() -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: None,
            name: SUPERADMIN_ROLE.to_string(),
            permissions: BTreeSet::new(),
            created_utc: Utc::now(),
        }
    }

    pub fn is_superadmin(&self) -> bool {
        self.tenant_id.is_none() && self.name == SUPERADMIN_ROLE
    }

    pub fn applies_to(&self, tenant_id: Uuid) -> bool {
        self.tenant_id == Some(tenant_id)
    }
}

/// Union of the permissions of `roles` that apply in `tenant_id`.
pub fn effective_permissions(roles: &[Role], tenant_id: Uuid) -> PermissionSet {
    if roles.iter().any(Role::is_superadmin) {
        return PermissionSet::unrestricted();
    }

    let mut set = PermissionSet::default();
    for role in roles.iter().filter(|r| r.applies_to(tenant_id)) {
        set.extend(role.permissions.iter());
    }
    set
}

/// Role response for API.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub permissions: Vec<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(r: Role) -> Self {
        Self {
            role_id: r.role_id,
            tenant_id: r.tenant_id,
            name: r.name,
            permissions: r.permissions.iter().map(|p| p.to_string()).collect(),
            created_utc: r.created_utc,
        }
    }
}
