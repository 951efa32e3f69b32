//! Opaque credential carried in the Hello.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credential token for the board server.
///
/// Passed through unmodified; never inspected, logged, or persisted. The
/// memory is wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CredentialToken(String);

impl CredentialToken {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// An empty token, for servers that do not authenticate.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// Borrow the raw token.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

// Don't leak the token in debug output
impl std::fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let token = CredentialToken::new("s3cr3t-board-token");
        let debug = format!("{:?}", token);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn expose_returns_original() {
        let token = CredentialToken::new("abc");
        assert_eq!(token.expose(), "abc");
        assert_eq!(CredentialToken::anonymous().expose(), "");
    }
}
