//! Authorization policy evaluator.
//!
//! A pure function of identity, path and the route table: no shared state,
//! so it needs no synchronisation.

use bastion_core::{Identity, Role, RouteDescriptor, RouteTable};

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DenyReason {
    /// No route descriptor covers the path; unmapped paths are closed.
    #[error("no route for path")]
    NotFound,

    /// The caller holds none of the roles the route requires.
    #[error("requires one of the roles: {}", join_roles(.required))]
    MissingRole { required: Vec<Role> },
}

impl DenyReason {
    /// Stable label for counters and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "not_found",
            DenyReason::MissingRole { .. } => "forbidden",
        }
    }
}

fn join_roles(roles: &[Role]) -> String {
    roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
}

/// Outcome of [`authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<'a> {
    /// Proceed; carries the matched descriptor for the later stages.
    Allow(&'a RouteDescriptor),
    /// Stop the pipeline.
    Deny(DenyReason),
}

/// Decide whether `identity` may call `method path`.
///
/// Longest-prefix match selects the descriptor; an open descriptor admits
/// anyone, otherwise the caller's roles must intersect the required ones.
#[must_use]
pub fn authorize<'a>(identity: &Identity, table: &'a RouteTable, path: &str, method: &str) -> Decision<'a> {
    let Some(route) = table.longest_match(path) else {
        tracing::debug!(%path, %method, "no route descriptor; denying");
        return Decision::Deny(DenyReason::NotFound);
    };

    if route.is_open() {
        return Decision::Allow(route);
    }

    let held = identity.roles();
    if route.required_roles.iter().any(|r| held.contains(r)) {
        Decision::Allow(route)
    } else {
        tracing::debug!(
            %path,
            %method,
            subject = ?identity.subject(),
            "caller lacks required role"
        );
        Decision::Deny(DenyReason::MissingRole { required: route.required_roles.clone() })
    }
}

#[cfg(test)]
mod tests {
    use bastion_core::examples::example_route_table;
    use bastion_core::{Subject, TokenId, VerifiedClaims};
    use chrono::Utc;

    use super::*;

    fn caller(roles: &[&str]) -> Identity {
        let now = Utc::now();
        Identity::Authenticated(VerifiedClaims::new(
            Subject::new("u-1"),
            "iss".to_owned(),
            now,
            now + chrono::Duration::minutes(5),
            roles.iter().map(|r| Role::new(*r)).collect(),
            TokenId::new("t-1"),
        ))
    }

    #[test]
    fn open_route_allows_anonymous() {
        let table = example_route_table();
        let decision = authorize(&Identity::Anonymous, &table, "/api/v1/catalog/items", "GET");
        assert!(matches!(decision, Decision::Allow(r) if r.backend == "catalog"));
    }

    #[test]
    fn role_intersection_allows() {
        let table = example_route_table();
        let decision = authorize(&caller(&["viewer", "customer"]), &table, "/api/v1/orders/9", "POST");
        assert!(matches!(decision, Decision::Allow(r) if r.backend == "orders"));
    }

    #[test]
    fn missing_role_denies() {
        let table = example_route_table();
        let decision = authorize(&caller(&["customer"]), &table, "/api/v1/admin/users", "GET");
        match decision {
            Decision::Deny(DenyReason::MissingRole { required }) => {
                assert_eq!(required, vec![Role::new("admin")]);
            }
            other => panic!("expected MissingRole, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_never_satisfies_role_requirement() {
        let table = example_route_table();
        let decision = authorize(&Identity::Anonymous, &table, "/api/v1/orders", "GET");
        assert!(matches!(decision, Decision::Deny(DenyReason::MissingRole { .. })));
    }

    #[test]
    fn unmapped_path_is_not_found() {
        let table = example_route_table();
        let decision = authorize(&caller(&["admin"]), &table, "/internal/debug", "GET");
        assert_eq!(decision, Decision::Deny(DenyReason::NotFound));
    }

    #[test]
    fn deny_reason_message_lists_roles() {
        let reason = DenyReason::MissingRole { required: vec![Role::new("a"), Role::new("b")] };
        assert_eq!(reason.to_string(), "requires one of the roles: a, b");
        assert_eq!(reason.label(), "forbidden");
    }
}
