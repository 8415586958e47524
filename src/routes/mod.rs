/// Router Module Index
///
/// Organizes the application's routing logic into security-segregated
/// modules, enforcing a Defense-in-Depth strategy. Access control is applied
/// explicitly at the module level (via Axum layers), preventing accidental
/// exposure of privileged endpoints.

/// Routes accessible without an admin session: liveness, the credential
/// exchange, and the gateway's signed callback.
pub mod public;

/// Routes restricted to authenticated operators. Capability-level
/// authorization happens inside the workflow, after the authentication layer.
pub mod admin;
