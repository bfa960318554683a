//! RS256 token handling for chat services.

pub mod jwt;

#[cfg(any(test, feature = "test-keys"))]
pub mod testing;

pub use jwt::{ChannelKeys, Claims, IssuedToken, JwtError, JwtSigner, JwtVerifier, TokenKind};
