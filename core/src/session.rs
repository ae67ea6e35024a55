/// Session token access
///
/// The platform keeps its bearer token in the `access_token` cookie. Nothing
/// here reads ambient state: callers hand a `TokenProvider` to whoever needs
/// the token (channel handshake, REST authorization).
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cookie holding the bearer token
pub const TOKEN_COOKIE: &str = "access_token";

/// Opaque bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token; blank input yields `None`
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Keep tokens out of logs
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(***)")
    }
}

/// Handshake auth payload: `{ "token": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthPayload {
    pub token: String,
}

impl From<&AuthToken> for AuthPayload {
    fn from(token: &AuthToken) -> Self {
        Self {
            token: token.0.clone(),
        }
    }
}

/// Source of the current session token
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<AuthToken>;
}

pub type SharedTokenProvider = Arc<dyn TokenProvider>;

/// Parsed `Cookie` header
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    /// Parse `name=value; name2=value2`
    pub fn parse(header: &str) -> Self {
        let pairs = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim().trim_matches('"');
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                Some((name.to_string(), value))
            })
            .collect();
        Self { pairs }
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl TokenProvider for CookieJar {
    fn token(&self) -> Option<AuthToken> {
        self.get(TOKEN_COOKIE).and_then(AuthToken::new)
    }
}

/// Fixed token, mostly for tests and scripts
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<AuthToken>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<AuthToken> {
        self.0.clone()
    }
}

/// Liveness flag of one mounted session
///
/// Revoked exactly once on teardown. Anything that writes session state
/// checks it at the point of the write, so late events are discarded.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    live: Arc<AtomicBool>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Returns `true` for the call that actually revoked it
    pub fn revoke(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}
