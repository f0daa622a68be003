//! Session tokens.
//!
//! Tokens are HS256 JWTs. [`TokenSigner::verify`] is the only place a token
//! is checked; every failure comes back as `Error::Unauthorized`.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Claims {
    /// Authenticated user.
    pub sub: Uuid,
    /// Issued at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        TokenSigner {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        self.issue_at(user_id, chrono::Utc::now().timestamp())
    }

    fn issue_at(&self, user_id: Uuid, now: i64) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Crypto(format!("Failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid token signature",
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        "unsupported token algorithm"
                    }
                    _ => "malformed token",
                };
                log::debug!("Token rejected: {}", e);
                Error::unauthorized(reason)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret", 3600)
    }

    fn encode_segment<T: Serialize>(value: &T) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let user = Uuid::new_v4();
        let now = chrono::Utc::now().timestamp();
        let token = signer.issue_at(user, now).unwrap();

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + 3600);
        assert_eq!(token.matches('.').count(), 2);
    }

    #[test]
    fn test_expired_token() {
        let signer = signer();
        let issued = chrono::Utc::now().timestamp() - 7200;
        let token = signer.issue_at(Uuid::new_v4(), issued).unwrap();
        let err = signer.verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: token expired");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = signer().issue(Uuid::new_v4()).unwrap();
        let other = TokenSigner::new(b"another-secret", 3600);
        let err = other.verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: invalid token signature");
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let signer = signer();
        let token = signer.issue(Uuid::new_v4()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = Claims {
            sub: Uuid::new_v4(),
            iat: 0,
            exp: i64::MAX / 2,
        };
        let forged = format!("{}.{}.{}", parts[0], encode_segment(&forged_claims), parts[2]);
        assert!(matches!(signer.verify(&forged), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = signer();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.##"] {
            assert!(
                matches!(signer.verify(token), Err(Error::Unauthorized(_))),
                "accepted {:?}",
                token
            );
        }
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let signer = signer();
        let header = serde_json::json!({ "alg": "none", "typ": "JWT" });
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: 0,
            exp: i64::MAX / 2,
        };
        let token = format!("{}.{}.", encode_segment(&header), encode_segment(&claims));
        assert!(matches!(signer.verify(&token), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_other_hmac_algorithm_rejected() {
        let signer = signer();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            iat: now,
            exp: now + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        let err = signer.verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: unsupported token algorithm");
    }
}
