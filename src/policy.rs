use crate::models::{AdminRole, Capability};

/// Permission Policy
///
/// The single source of truth for role-based access control: a pure mapping
/// from role to capability set, with no I/O and no failure mode. Each role's
/// set is enumerated independently: `super_admin` is *not* derived from the
/// other roles by inheritance, so adding a capability to one role never leaks
/// it to another.

/// The capability set implied by a role. Total: every role maps to a defined
/// (possibly overlapping) set.
pub fn capabilities(role: AdminRole) -> &'static [Capability] {
    match role {
        AdminRole::SuperAdmin => &[Capability::ViewUsers, Capability::ManagePayments],
        AdminRole::Admin => &[Capability::ViewUsers, Capability::ManagePayments],
        AdminRole::Moderator => &[Capability::ViewUsers],
    }
}

/// Whether `role` grants `capability`. Absence simply yields `false`.
pub fn allows(role: AdminRole, capability: Capability) -> bool {
    capabilities(role).contains(&capability)
}

/// String-named variant for callers holding an untyped capability name.
/// Names outside the closed vocabulary fail closed.
pub fn allows_name(role: AdminRole, capability: &str) -> bool {
    Capability::parse(capability).is_some_and(|c| allows(role, c))
}
