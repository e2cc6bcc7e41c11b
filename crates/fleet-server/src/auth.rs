//! The pluggable authentication/authorization collaborator.
//!
//! Credential storage and the authentication scheme are treated as an
//! external collaborator contract (`authenticate(token) -> Principal`,
//! `authorize(principal, action) -> bool`) rather than baked into callers.
//! The default implementation here uses `jsonwebtoken` for admin tokens,
//! plus a single bootstrap admin credential from
//! `ADMIN_USERNAME`/`ADMIN_PASSWORD`.

use fleet_core::{ErrorCode, FleetError};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
}

/// The action being authorized, coarse enough to gate at the route/tool
/// boundary without re-deriving the full `Intent` taxonomy here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    FlightControl,
    Admin,
}

impl Role {
    fn permits(self, action: Action) -> bool {
        match (self, action) {
            (Role::Admin, _) => true,
            (Role::Operator, Action::Read | Action::FlightControl) => true,
            (Role::Operator, Action::Admin) => false,
            (Role::Viewer, Action::Read) => true,
            (Role::Viewer, _) => false,
        }
    }
}

/// The collaborator contract. Kept trait-object-safe so REST, WS, and MCP
/// surfaces can share one instance without generic plumbing.
pub trait AuthService: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, FleetError>;
    fn authorize(&self, principal: &Principal, action: Action) -> bool {
        principal.role.permits(action)
    }

    /// Exchanges a username/password pair for a bearer token, backing the
    /// REST `/auth/login` route. Implementations with no notion of issuing
    /// tokens (test fakes) reject every call.
    fn issue_token(&self, _username: &str, _password: &str) -> Result<String, FleetError> {
        Err(FleetError::new(
            ErrorCode::Internal,
            "this auth service does not support issuing tokens",
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: usize,
}

/// JWT-backed default. With no `JWT_SECRET` configured, every token is
/// rejected as unauthenticated rather than silently accepted — there is
/// no "auth disabled" mode.
pub struct JwtAuthService {
    encoding_key: Option<EncodingKey>,
    decoding_key: Option<DecodingKey>,
    admin_username: String,
    admin_password: Option<String>,
}

impl JwtAuthService {
    pub fn new(secret: Option<&str>, admin_username: String, admin_password: Option<String>) -> Self {
        let (encoding_key, decoding_key) = match secret {
            Some(s) => (
                Some(EncodingKey::from_secret(s.as_bytes())),
                Some(DecodingKey::from_secret(s.as_bytes())),
            ),
            None => (None, None),
        };
        Self {
            encoding_key,
            decoding_key,
            admin_username,
            admin_password,
        }
    }

    /// Exchange the bootstrap admin credential for a signed token. Used
    /// only at process start / by operator tooling, never on the hot
    /// request path.
    pub fn issue_admin_token(&self, username: &str, password: &str) -> Result<String, FleetError> {
        let Some(expected_password) = &self.admin_password else {
            return Err(FleetError::new(
                ErrorCode::Unauthorized,
                "no ADMIN_PASSWORD configured",
            ));
        };
        if username != self.admin_username || password != expected_password {
            return Err(FleetError::new(ErrorCode::Unauthorized, "bad admin credentials"));
        }
        let Some(key) = &self.encoding_key else {
            return Err(FleetError::new(ErrorCode::Unauthorized, "no JWT_SECRET configured"));
        };
        let claims = Claims {
            sub: username.to_string(),
            role: Role::Admin,
            exp: (chrono::Utc::now() + chrono::Duration::hours(12)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, key)
            .map_err(|e| FleetError::new(ErrorCode::Internal, format!("failed to sign token: {e}")))
    }
}

impl AuthService for JwtAuthService {
    fn authenticate(&self, token: &str) -> Result<Principal, FleetError> {
        let Some(key) = &self.decoding_key else {
            return Err(FleetError::new(ErrorCode::Unauthorized, "no JWT_SECRET configured"));
        };
        let data = decode::<Claims>(token, key, &Validation::default())
            .map_err(|e| FleetError::new(ErrorCode::Unauthorized, format!("invalid token: {e}")))?;
        Ok(Principal {
            subject: data.claims.sub,
            role: data.claims.role,
        })
    }

    fn issue_token(&self, username: &str, password: &str) -> Result<String, FleetError> {
        self.issue_admin_token(username, password)
    }
}

/// Deterministic fake used by in-process tests: every non-empty token
/// authenticates as an admin, standing in for a real credential store.
pub struct AllowAllAuthService;

impl AuthService for AllowAllAuthService {
    fn authenticate(&self, token: &str) -> Result<Principal, FleetError> {
        if token.is_empty() {
            return Err(FleetError::new(ErrorCode::Unauthorized, "empty token"));
        }
        Ok(Principal {
            subject: token.to_string(),
            role: Role::Admin,
        })
    }
}

pub type SharedAuthService = Arc<dyn AuthService>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_cannot_issue_flight_commands() {
        let principal = Principal {
            subject: "viewer1".to_string(),
            role: Role::Viewer,
        };
        let auth = AllowAllAuthService;
        assert!(!auth.authorize(&principal, Action::FlightControl));
    }

    #[test]
    fn jwt_round_trip_without_secret_rejects() {
        let svc = JwtAuthService::new(None, "admin".to_string(), Some("pw".to_string()));
        assert!(svc.authenticate("whatever").is_err());
    }

    #[test]
    fn jwt_round_trip_with_secret_succeeds() {
        let secret = "a".repeat(32);
        let svc = JwtAuthService::new(Some(&secret), "admin".to_string(), Some("pw".to_string()));
        let token = svc.issue_admin_token("admin", "pw").unwrap();
        let principal = svc.authenticate(&token).unwrap();
        assert_eq!(principal.role, Role::Admin);
    }
}
