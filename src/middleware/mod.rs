//! Request-level guards: authentication, rate limiting and input validation

pub mod auth;
pub mod rate_limiter;
pub mod validator;

pub use auth::{AuthError, AuthMiddleware, CallerIdentity, ANONYMOUS_OWNER};
pub use rate_limiter::{RateLimitError, RateLimitStats, RateLimiter};
pub use validator::{InputValidator, ValidationError};
