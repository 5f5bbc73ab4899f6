//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Security headers (JSON API lockdown)
//! 5. Rate limiting (governor, per IP) on the API routes

pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use rate_limit::{ClientIdentity, api_rate_limiter, client_ip};
pub use request_id::request_id_middleware;
pub use security_headers::security_headers_middleware;
