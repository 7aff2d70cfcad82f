//! Identity resolution.
//!
//! Every engine call takes an explicit [`Identity`]. The [`IdentityResolver`]
//! turns it into exactly one identity header for the commerce API, and can
//! recover a user id for request bodies that want one.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cartsync_core::UserId;
use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionIdentityProvider, SessionToken};

/// Header carrying the anonymous session token (`X-Session-Id`).
pub const SESSION_HEADER: &str = "x-session-id";

/// Claim names that may hold a user id, in lookup order.
const ID_CLAIMS: [&str; 5] = ["id", "userId", "user_id", "_id", "sub"];

/// Errors raised while resolving an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Neither a credential nor a session token could be resolved.
    #[error("No usable identity: log in or retry")]
    Unavailable,

    /// The operation is only available to authenticated users.
    #[error("Authentication required")]
    AuthenticationRequired,
}

/// Who the engine is acting for.
#[derive(Debug, Clone)]
pub enum Identity {
    /// A logged-in user holding a bearer credential.
    Authenticated {
        /// Bearer credential issued by the auth service.
        credential: SecretString,
        /// User id, when the caller already knows it.
        user_id: Option<UserId>,
    },
    /// An anonymous visitor identified by a session token.
    Anonymous {
        /// Explicit token; `None` means "use or create the stored one".
        session_token: Option<SessionToken>,
    },
}

impl Identity {
    /// An authenticated identity without a known user id.
    #[must_use]
    pub fn authenticated(credential: impl Into<String>) -> Self {
        Self::Authenticated {
            credential: SecretString::from(credential.into()),
            user_id: None,
        }
    }

    /// An anonymous identity backed by the stored session token.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self::Anonymous {
            session_token: None,
        }
    }

    /// Build an identity from an optional credential and an optional token.
    ///
    /// A non-blank credential always wins; the token is only used for
    /// anonymous identities.
    #[must_use]
    pub fn from_parts(credential: Option<String>, session_token: Option<SessionToken>) -> Self {
        match credential {
            Some(credential) if !credential.trim().is_empty() => Self::authenticated(credential),
            _ => Self::Anonymous {
                session_token: session_token.filter(|t| !t.is_blank()),
            },
        }
    }

    /// Attach a known user id to an authenticated identity.
    ///
    /// Has no effect on anonymous identities.
    #[must_use]
    pub fn with_user_id(self, id: UserId) -> Self {
        match self {
            Self::Authenticated { credential, .. } => Self::Authenticated {
                credential,
                user_id: Some(id),
            },
            anonymous @ Self::Anonymous { .. } => anonymous,
        }
    }

    /// Whether this identity carries a bearer credential.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// The single identity header attached to a request.
///
/// Authorization and session headers are mutually exclusive by
/// construction.
#[derive(Debug, Clone)]
pub enum IdentityHeaders {
    /// `Authorization: Bearer <credential>`.
    Bearer(SecretString),
    /// `X-Session-Id: <token>`.
    Session(SessionToken),
}

impl IdentityHeaders {
    /// Attach the header to an outgoing request.
    #[must_use]
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Bearer(credential) => request.bearer_auth(credential.expose_secret()),
            Self::Session(token) => request.header(SESSION_HEADER, token.as_str()),
        }
    }

    /// Render the header as a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential or token contains characters that
    /// are not valid in a header value.
    pub fn to_header_map(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        match self {
            Self::Bearer(credential) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {}", credential.expose_secret()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Self::Session(token) => {
                headers.insert(SESSION_HEADER, HeaderValue::from_str(token.as_str())?);
            }
        }
        Ok(headers)
    }

    /// The session token, for anonymous requests.
    #[must_use]
    pub const fn session_token(&self) -> Option<&SessionToken> {
        match self {
            Self::Session(token) => Some(token),
            Self::Bearer(_) => None,
        }
    }

    /// Swap in a server-rotated session token. Bearer headers are unchanged.
    #[must_use]
    pub fn rotated(self, token: SessionToken) -> Self {
        match self {
            Self::Session(_) => Self::Session(token),
            bearer @ Self::Bearer(_) => bearer,
        }
    }
}

/// Resolves identities into request headers and user ids.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    sessions: Arc<SessionIdentityProvider>,
}

impl IdentityResolver {
    /// Create a resolver backed by the given session provider.
    #[must_use]
    pub const fn new(sessions: Arc<SessionIdentityProvider>) -> Self {
        Self { sessions }
    }

    /// The session provider behind this resolver.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionIdentityProvider> {
        &self.sessions
    }

    /// Decide which identity header to send.
    ///
    /// Authenticated identities send their credential; anonymous ones send
    /// their explicit token, or the stored token (created on demand).
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Unavailable` for an authenticated identity
    /// whose credential is blank.
    pub fn resolve_headers(&self, identity: &Identity) -> Result<IdentityHeaders, IdentityError> {
        match identity {
            Identity::Authenticated { credential, .. } => {
                if credential.expose_secret().trim().is_empty() {
                    return Err(IdentityError::Unavailable);
                }
                Ok(IdentityHeaders::Bearer(credential.clone()))
            }
            Identity::Anonymous {
                session_token: Some(token),
            } if !token.is_blank() => Ok(IdentityHeaders::Session(token.clone())),
            Identity::Anonymous { .. } => Ok(IdentityHeaders::Session(
                self.sessions.get_or_create_session_token(),
            )),
        }
    }

    /// Recover the user id for an identity, or `None`.
    ///
    /// Sources are tried in order and the first hit wins: the id attached to
    /// the identity, an id-like claim in the credential payload, then the
    /// locally persisted user record. Anonymous identities never resolve.
    #[must_use]
    pub fn resolve_user_id(&self, identity: &Identity) -> Option<UserId> {
        if !identity.is_authenticated() {
            return None;
        }
        let stored = |_: &Identity| {
            self.sessions
                .stored_user_record()
                .as_ref()
                .and_then(user_id_from_record)
        };
        let sources: [&dyn Fn(&Identity) -> Option<UserId>; 3] =
            [&user_id_from_profile, &user_id_from_claims, &stored];
        sources.iter().find_map(|source| source(identity))
    }
}

/// The id the caller attached to the identity.
fn user_id_from_profile(identity: &Identity) -> Option<UserId> {
    match identity {
        Identity::Authenticated {
            user_id: Some(id), ..
        } if !id.as_str().trim().is_empty() => Some(id.clone()),
        _ => None,
    }
}

/// An id-like claim from the credential's JWT payload.
///
/// The signature is not verified; the id is only used to annotate requests
/// that the server authorizes on its own.
fn user_id_from_claims(identity: &Identity) -> Option<UserId> {
    let Identity::Authenticated { credential, .. } = identity else {
        return None;
    };
    let payload = credential.expose_secret().split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    user_id_from_record(&claims).or_else(|| claims.get("user").and_then(user_id_from_record))
}

/// Pull an id out of a JSON object such as a claim set or user record.
#[must_use]
pub fn user_id_from_record(record: &Value) -> Option<UserId> {
    ID_CLAIMS.iter().find_map(|claim| match record.get(*claim)? {
        Value::String(s) if !s.trim().is_empty() => Some(UserId::new(s.as_str())),
        Value::Number(n) => Some(UserId::new(n.to_string())),
        _ => None,
    })
}
