//! Tenant context attached to every ledger operation.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Role name pinned into the database session for row-level policies.
///
/// Roles are opaque strings at this layer; what a role may do is decided by
/// the caller's policy layer and by the database policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Role used together with [`TenantId::system`] on bootstrap paths.
    pub const SYSTEM: Role = Role(Cow::Borrowed("system"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant context for one operation.
///
/// Immutable once built and passed explicitly to every data-access call.
/// There is no ambient "current tenant" and no `Default`: the fallback tenant
/// is reachable only through [`TenantContext::bootstrap`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: TenantId,
    role: Role,
}

impl TenantContext {
    /// Build the context for an authenticated caller.
    ///
    /// The system fallback tenant is rejected here so that caller traffic can
    /// never be scoped to it.
    pub fn for_caller(tenant_id: TenantId, role: Role) -> DomainResult<Self> {
        if tenant_id.is_system() {
            return Err(DomainError::validation(
                "caller identity resolved to the system fallback tenant",
            ));
        }
        if role.as_str().trim().is_empty() {
            return Err(DomainError::validation("role cannot be empty"));
        }
        Ok(Self { tenant_id, role })
    }

    /// Context for bootstrap paths that run before any tenant is known.
    pub fn bootstrap() -> Self {
        Self {
            tenant_id: TenantId::system(),
            role: Role::SYSTEM,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_bootstrap(&self) -> bool {
        self.tenant_id.is_system()
    }
}
