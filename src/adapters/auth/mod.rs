//! Authentication adapters.
//!
//! Implementations of the `SessionValidator` port:
//!
//! - `jwt` - Local-key JWT verification (RS256 in production, HS256 in development)
//! - `mock` - Token map for tests that don't need real credentials

mod jwt;
mod mock;

pub use jwt::{AccessClaims, JwtSessionValidator};
pub use mock::MockSessionValidator;
