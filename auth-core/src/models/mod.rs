pub mod api_key;
pub mod mfa;
pub mod permission;
pub mod principal;
pub mod role;
pub mod session;

pub use api_key::{ApiKey, ApiKeyInfo, API_KEY_PREFIX};
pub use mfa::MfaEnrollment;
pub use permission::{parse_permissions, Permission, PermissionSet};
pub use principal::{
    FailedLogin, LockoutPolicy, LoginGate, Principal, PrincipalResponse, PrincipalStatus,
};
pub use role::{effective_permissions, Role, RoleResponse, SUPERADMIN_ROLE};
pub use session::{Session, SessionInfo};
