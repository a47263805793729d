//! Core types for the Bastion edge traffic-control gateway.
//!
//! Defines the shared domain vocabulary: caller identities and verified
//! claims, the route descriptor table, request identifiers, and the metrics
//! handle every pipeline stage reports into.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod examples;
pub mod id;
pub mod identity;
pub mod metrics;
pub mod route;

pub use error::CoreError;
pub use id::{ContentHash, RequestId, Subject, TokenId};
pub use identity::{Identity, Role, VerifiedClaims};
pub use metrics::GatewayMetrics;
pub use route::{is_safe_method, RouteClass, RouteDescriptor, RouteTable, PAYMENT_RETRY_CAP};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examples::example_route_table;

    fn claims_with_roles(roles: &[&str]) -> VerifiedClaims {
        let now = chrono::Utc::now();
        VerifiedClaims::new(
            Subject::new("user-1"),
            "https://issuer.test".to_owned(),
            now,
            now + chrono::Duration::minutes(5),
            roles.iter().map(|r| Role::new(*r)).collect(),
            TokenId::new("jti-1"),
        )
    }

    #[test]
    fn longest_prefix_wins() {
        let table = match RouteTable::new(vec![
            RouteDescriptor::new("/api", "generic"),
            RouteDescriptor::new("/api/v1/orders", "orders"),
            RouteDescriptor::new("/api/v1", "v1"),
        ]) {
            Ok(t) => t,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let hit = table.longest_match("/api/v1/orders/42").map(|r| r.backend.as_str());
        assert_eq!(hit, Some("orders"));
        let hit = table.longest_match("/api/v1/users").map(|r| r.backend.as_str());
        assert_eq!(hit, Some("v1"));
        let hit = table.longest_match("/api/other").map(|r| r.backend.as_str());
        assert_eq!(hit, Some("generic"));
    }

    #[test]
    fn prefix_match_respects_segment_boundary() {
        let route = RouteDescriptor::new("/api/orders", "orders");
        assert!(route.matches("/api/orders"));
        assert!(route.matches("/api/orders/7"));
        assert!(!route.matches("/api/ordersx"), "must not match across a segment");
        assert!(!route.matches("/api"));
    }

    #[test]
    fn root_prefix_matches_everything() {
        let route = RouteDescriptor::new("/", "default");
        assert!(route.matches("/"));
        assert!(route.matches("/anything/at/all"));
    }

    #[test]
    fn unmapped_path_has_no_match() {
        let table = example_route_table();
        assert!(table.longest_match("/metrics").is_none());
        assert!(table.longest_match("/api/v2/orders").is_none());
    }

    #[test]
    fn duplicate_prefix_rejected() {
        let result = RouteTable::new(vec![
            RouteDescriptor::new("/a", "one"),
            RouteDescriptor::new("/a", "two"),
        ]);
        assert!(matches!(result, Err(CoreError::DuplicateRoute { .. })));
    }

    #[test]
    fn relative_prefix_rejected() {
        let result = RouteTable::new(vec![RouteDescriptor::new("api", "one")]);
        assert!(matches!(result, Err(CoreError::InvalidRoute { .. })));
    }

    #[test]
    fn unknown_backend_is_reported() {
        let table = example_route_table();
        let known = ["auth", "catalog", "orders", "payments"];
        match table.check_backends(|b| known.contains(&b)) {
            Err(CoreError::UnknownBackend { backend, prefix }) => {
                assert_eq!(backend, "users");
                assert_eq!(prefix, "/api/v1/admin");
            }
            other => panic!("expected UnknownBackend, got {other:?}"),
        }
        assert!(table.check_backends(|_| true).is_ok());
    }

    #[test]
    fn route_table_deserializes_with_defaults() {
        let json = r#"[
            {"prefix": "/api/v1/catalog", "backend": "catalog", "retry_budget": 2},
            {"prefix": "/api/v1/payments", "backend": "payments", "class": "payment",
             "required_roles": ["customer"], "rate_ceiling": 5}
        ]"#;
        let table: RouteTable = match serde_json::from_str(json) {
            Ok(t) => t,
            Err(e) => panic!("invalid route json: {e}"),
        };
        assert_eq!(table.len(), 2);
        let payments = match table.longest_match("/api/v1/payments/charge") {
            Some(r) => r,
            None => panic!("payments route missing"),
        };
        assert_eq!(payments.class, RouteClass::Payment);
        assert_eq!(payments.rate_ceiling, Some(5));
        assert_eq!(payments.required_roles, vec![Role::new("customer")]);
        assert_eq!(payments.breaker_name(), "payments");
    }

    #[test]
    fn route_table_json_with_duplicates_fails() {
        let json = r#"[{"prefix": "/x", "backend": "a"}, {"prefix": "/x", "backend": "b"}]"#;
        assert!(serde_json::from_str::<RouteTable>(json).is_err());
    }

    #[test]
    fn retries_follow_method_and_class() {
        let catalog = RouteDescriptor::new("/c", "catalog").with_retry_budget(3);
        assert_eq!(catalog.retries_for("GET"), 3);
        assert_eq!(catalog.retries_for("head"), 3);
        assert_eq!(catalog.retries_for("POST"), 0, "mutations default to zero retries");

        let idempotent = RouteDescriptor::new("/i", "inventory").with_retry_budget(2).idempotent();
        assert_eq!(idempotent.retries_for("PUT"), 2);

        let payments = RouteDescriptor::new("/p", "payments")
            .with_class(RouteClass::Payment)
            .with_retry_budget(5)
            .idempotent();
        assert_eq!(payments.retries_for("GET"), PAYMENT_RETRY_CAP);
        assert_eq!(payments.retries_for("POST"), PAYMENT_RETRY_CAP);
    }

    #[test]
    fn breaker_name_defaults_to_backend() {
        let plain = RouteDescriptor::new("/a", "alpha");
        assert_eq!(plain.breaker_name(), "alpha");
        let shared = RouteDescriptor::new("/b", "beta").with_circuit_breaker("shared");
        assert_eq!(shared.breaker_name(), "shared");
    }

    #[test]
    fn identity_roles_and_subject() {
        let claims = claims_with_roles(&["admin"]);
        let id = Identity::Authenticated(claims.clone());
        assert_eq!(id.roles(), claims.roles.as_slice());
        assert_eq!(id.subject().map(Subject::as_str), Some("user-1"));
        assert!(Identity::Anonymous.roles().is_empty());
        assert!(Identity::Anonymous.subject().is_none());
        assert!(claims.has_role(&Role::new("admin")));
        assert!(!claims.has_role(&Role::new("customer")));
    }

    #[test]
    fn claims_expiry_is_inclusive() {
        let claims = claims_with_roles(&[]);
        assert!(!claims.is_expired_at(claims.issued_at));
        assert!(claims.is_expired_at(claims.expires_at));
    }

    #[test]
    fn content_hash_display_shows_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xde;
        bytes[1] = 0xad;
        bytes[31] = 0xff;
        let s = ContentHash::new(bytes).to_string();
        assert!(s.starts_with("dead"), "expected hex starting with 'dead', got {s}");
        assert!(s.ends_with("ff"));
        assert_eq!(s.len(), 64, "SHA-256 hex must be 64 chars");
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn metrics_count_per_label() {
        let metrics = match GatewayMetrics::new() {
            Ok(m) => m,
            Err(e) => panic!("metrics init failed: {e}"),
        };
        metrics.record_auth("success");
        metrics.record_auth("success");
        metrics.record_auth("expired");
        assert_eq!(metrics.auth_count("success"), 2);
        assert_eq!(metrics.auth_count("expired"), 1);
        assert_eq!(metrics.auth_count("revoked"), 0);
        metrics.record_transition("orders", "open");
        assert_eq!(metrics.transition_count("orders", "open"), 1);
    }

    #[test]
    fn example_table_shape() {
        let table = example_route_table();
        assert_eq!(table.len(), 5);
        let admin = match table.longest_match("/api/v1/admin/users") {
            Some(r) => r,
            None => panic!("admin route missing"),
        };
        assert_eq!(admin.required_roles, vec![Role::new("admin")]);
        assert!(table.longest_match("/api/v1/auth/login").is_some_and(RouteDescriptor::is_open));
    }

    proptest::proptest! {
        #[test]
        fn proptest_match_implies_prefix(
            prefix in "/[a-z]{1,6}(/[a-z]{1,6}){0,2}",
            path in "/[a-z]{0,6}(/[a-z]{0,6}){0,3}",
        ) {
            let route = RouteDescriptor::new(prefix.clone(), "b");
            if route.matches(&path) {
                proptest::prop_assert!(path.starts_with(&prefix));
                let rest = &path[prefix.len()..];
                proptest::prop_assert!(rest.is_empty() || rest.starts_with('/'));
            }
        }

        #[test]
        fn proptest_prefix_always_matches_its_children(
            prefix in "/[a-z]{1,6}(/[a-z]{1,6}){0,2}",
            child in "[a-z0-9]{0,8}",
        ) {
            let route = RouteDescriptor::new(prefix.clone(), "b");
            let child_path = format!("{prefix}/{child}");
            proptest::prop_assert!(route.matches(&prefix));
            proptest::prop_assert!(route.matches(&child_path));
        }
    }
}
