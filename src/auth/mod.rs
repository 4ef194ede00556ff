//! Authentication and authorization
//!
//! Provides:
//! - JWT token generation and validation
//! - Password hashing with Argon2
//! - Closed role type with a capability table checked at the boundary

pub mod jwt;
pub mod password;
pub mod roles;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use password::{check_password_strength, hash_password, verify_password};
pub use roles::{role_allows, Action, Role};
