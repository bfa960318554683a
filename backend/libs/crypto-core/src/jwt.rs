/// JWT handling for chat services
///
/// Two token kinds share one claim layout:
///
/// - **access**: identity tokens minted by the session collaborator. Chat
///   services only validate them.
/// - **channel**: short-lived realtime credentials the chat service signs for
///   an already authenticated user.
///
/// ## Security Design
///
/// - **RS256 ONLY**: no symmetric algorithms, so no algorithm confusion
/// - **Typed tokens**: a token of one kind is rejected where the other is expected
/// - **No ambient keys**: keys live in the values that need them
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT algorithm - MUST be RS256
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    #[error("token expired")]
    Expired,

    #[error("token validation failed: {0}")]
    Invalid(String),

    #[error("expected {expected} token, found {found}")]
    WrongType { expected: &'static str, found: String },

    #[error("invalid subject in token: {0}")]
    InvalidSubject(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Channel,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Channel => "channel",
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Marketplace role, present on identity tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// "access" or "channel"
    pub token_type: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|e| JwtError::InvalidSubject(e.to_string()))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Private half: signs tokens.
#[derive(Clone)]
pub struct JwtSigner {
    key: EncodingKey,
}

impl JwtSigner {
    pub fn from_rsa_pem(private_key_pem: &str) -> Result<Self, JwtError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(format!("private key: {e}")))?;
        Ok(Self { key })
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        role: Option<&str>,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, JwtError> {
        let now = Utc::now();
        self.issue_at(user_id, role, kind, now, now + ttl)
    }

    /// Signs a token with explicit timestamps.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        role: Option<&str>,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, JwtError> {
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.map(str::to_string),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            token_type: kind.as_str().to_string(),
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.key)
            .map_err(|e| JwtError::Signing(e.to_string()))?;
        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }
}

/// Public half: validates tokens.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
}

impl JwtVerifier {
    pub fn from_rsa_pem(public_key_pem: &str) -> Result<Self, JwtError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| JwtError::InvalidKey(format!("public key: {e}")))?;
        Ok(Self { key })
    }

    /// Verifies signature, expiry and token kind.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            }
        })?;

        if data.claims.token_type != expected.as_str() {
            return Err(JwtError::WrongType {
                expected: expected.as_str(),
                found: data.claims.token_type,
            });
        }
        Ok(data.claims)
    }
}

/// Key pair and lifetime for realtime channel credentials.
#[derive(Clone)]
pub struct ChannelKeys {
    signer: JwtSigner,
    verifier: JwtVerifier,
    ttl: Duration,
}

impl ChannelKeys {
    pub fn from_rsa_pem(
        private_key_pem: &str,
        public_key_pem: &str,
        ttl: Duration,
    ) -> Result<Self, JwtError> {
        Ok(Self {
            signer: JwtSigner::from_rsa_pem(private_key_pem)?,
            verifier: JwtVerifier::from_rsa_pem(public_key_pem)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: Uuid) -> Result<IssuedToken, JwtError> {
        self.signer.issue(user_id, None, TokenKind::Channel, self.ttl)
    }

    /// Returns the user the credential was issued to.
    pub fn validate(&self, token: &str) -> Result<Uuid, JwtError> {
        self.verifier.validate(token, TokenKind::Channel)?.user_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};

    fn signer() -> JwtSigner {
        JwtSigner::from_rsa_pem(TEST_PRIVATE_KEY).expect("test private key")
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::from_rsa_pem(TEST_PUBLIC_KEY).expect("test public key")
    }

    #[test]
    fn test_access_token_round_trip() {
        let user_id = Uuid::new_v4();
        let issued = signer()
            .issue(user_id, Some("student"), TokenKind::Access, Duration::hours(1))
            .expect("Failed to generate token");
        assert_eq!(issued.token.matches('.').count(), 2);

        let claims = verifier()
            .validate(&issued.token, TokenKind::Access)
            .expect("valid token");
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.role.as_deref(), Some("student"));
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = verifier().validate("invalid.token.here", TokenKind::Access);
        assert!(matches!(result, Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let issued = signer()
            .issue(Uuid::new_v4(), None, TokenKind::Access, Duration::hours(1))
            .unwrap();
        let tampered = issued.token.replace('a', "b");
        assert!(verifier().validate(&tampered, TokenKind::Access).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let past = Utc::now() - Duration::hours(2);
        let issued = signer()
            .issue_at(
                Uuid::new_v4(),
                None,
                TokenKind::Channel,
                past,
                past + Duration::minutes(5),
            )
            .unwrap();
        let result = verifier().validate(&issued.token, TokenKind::Channel);
        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let user_id = Uuid::new_v4();
        let access = signer()
            .issue(user_id, Some("landlord"), TokenKind::Access, Duration::hours(1))
            .unwrap();
        let keys =
            ChannelKeys::from_rsa_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, Duration::minutes(10))
                .unwrap();

        assert!(matches!(
            keys.validate(&access.token),
            Err(JwtError::WrongType { .. })
        ));

        let channel = keys.issue(user_id).unwrap();
        assert!(verifier()
            .validate(&channel.token, TokenKind::Access)
            .is_err());
        assert_eq!(keys.validate(&channel.token).unwrap(), user_id);
    }

    #[test]
    fn test_channel_expiry_follows_ttl() {
        let keys =
            ChannelKeys::from_rsa_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, Duration::seconds(3600))
                .unwrap();
        let before = Utc::now();
        let issued = keys.issue(Uuid::new_v4()).unwrap();
        let lifetime = issued.expires_at - before;
        assert!(lifetime <= Duration::seconds(3601));
        assert!(lifetime >= Duration::seconds(3598));
    }

    #[test]
    fn test_bad_pem_rejected() {
        assert!(matches!(
            JwtVerifier::from_rsa_pem("not a key"),
            Err(JwtError::InvalidKey(_))
        ));
    }
}
