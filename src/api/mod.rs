//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod middleware;
pub mod router;

pub use handlers::ApiDoc;
pub use middleware::{AuthenticatedAccount, bearer_auth_middleware, idempotency_middleware};
pub use router::create_router;
