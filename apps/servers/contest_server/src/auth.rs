use contest_core::{AuthClaims, AuthError, Role, TokenVerifier};
use contest_events::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
	sub: String,
	#[serde(default)]
	role: Option<String>,
	exp: usize,
}

/// HS256 bearer-token verifier for the authenticated channel.
pub struct JwtVerifier {
	decoding: DecodingKey,
	validation: Validation,
}

impl JwtVerifier {
	pub fn new(secret: &str) -> Self {
		Self {
			decoding: DecodingKey::from_secret(secret.as_bytes()),
			validation: Validation::new(Algorithm::HS256),
		}
	}
}

impl TokenVerifier for JwtVerifier {
	fn verify(&self, token: &str) -> Result<AuthClaims, AuthError> {
		let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|err| match err.kind() {
			jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
			_ => AuthError::Invalid,
		})?;

		if data.claims.sub.is_empty() {
			return Err(AuthError::Invalid);
		}

		let role = match data.claims.role.as_deref() {
			Some("admin") => Role::Admin,
			_ => Role::Participant,
		};

		Ok(AuthClaims {
			user_id: UserId::new(data.claims.sub),
			role,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use jsonwebtoken::{encode, EncodingKey, Header};

	fn token(secret: &str, sub: &str, role: Option<&str>, exp_offset: i64) -> String {
		let claims = Claims {
			sub: sub.to_string(),
			role: role.map(String::from),
			exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
		};
		encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
	}

	#[test]
	fn valid_token_yields_claims() {
		let verifier = JwtVerifier::new("secret");
		let claims = verifier.verify(&token("secret", "u1", None, 3600)).unwrap();
		assert_eq!(claims.user_id, UserId::new("u1"));
		assert_eq!(claims.role, Role::Participant);
	}

	#[test]
	fn admin_role_is_recognized() {
		let verifier = JwtVerifier::new("secret");
		let claims = verifier.verify(&token("secret", "boss", Some("admin"), 3600)).unwrap();
		assert_eq!(claims.role, Role::Admin);
	}

	#[test]
	fn wrong_key_is_invalid() {
		let verifier = JwtVerifier::new("secret");
		let err = verifier.verify(&token("other-secret", "u1", None, 3600)).unwrap_err();
		assert!(matches!(err, AuthError::Invalid));
	}

	#[test]
	fn expired_token_is_rejected() {
		let verifier = JwtVerifier::new("secret");
		let err = verifier.verify(&token("secret", "u1", None, -3600)).unwrap_err();
		assert!(matches!(err, AuthError::Expired));
	}
}
