//! Authentication module for Murmur

pub mod authenticator;
pub mod internal_key;
pub mod jwt;

pub use authenticator::{
    extract_token, AuthError, ConnectionAuthenticator, DirectoryError, IdentityDirectory,
    OpenDirectory, StaticDirectory,
};
pub use internal_key::{require_internal_key, INTERNAL_KEY_HEADER};
pub use jwt::{Claims, JwtError, TokenType, TokenVerifier};
