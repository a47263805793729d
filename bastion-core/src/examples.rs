//! Example route table demonstrating the descriptor schema.
//!
//! Five routes cover the interesting cases: an open public route, an open
//! read-heavy route with retries, a role-guarded route, a payment route with
//! a low path ceiling, and an admin-only route.

use crate::route::{RouteClass, RouteDescriptor, RouteTable};

/// Returns the canonical example route table.
///
/// # Panics
/// Never panics; the hard-coded prefixes are valid and distinct.
#[must_use]
pub fn example_route_table() -> RouteTable {
    let routes = vec![
        RouteDescriptor::new("/api/v1/auth", "auth").with_retry_budget(1),
        RouteDescriptor::new("/api/v1/catalog", "catalog").with_retry_budget(2),
        RouteDescriptor::new("/api/v1/orders", "orders")
            .with_roles(["customer", "admin"])
            .with_retry_budget(2),
        RouteDescriptor::new("/api/v1/payments", "payments")
            .with_roles(["customer", "admin"])
            .with_class(RouteClass::Payment)
            .with_retry_budget(3)
            .with_rate_ceiling(10),
        RouteDescriptor::new("/api/v1/admin", "users").with_roles(["admin"]),
    ];
    #[expect(clippy::expect_used, reason = "example prefixes are valid and distinct")]
    let table = RouteTable::new(routes).expect("example routes are valid");
    table
}
