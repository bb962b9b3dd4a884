//! The verified claim set behind one operation.

use std::fmt;

/// Who is calling. Produced only by successful credential verification;
/// absence means anonymous. Lives for the duration of one execution context
/// and is never persisted or cached across operations.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject id from the signed claims.
    pub id: String,
    /// Role from the signed claims, checked by the auth guard.
    pub role: String,
    /// Issued-at, seconds since Unix epoch.
    pub issued_at: i64,
    /// Expiry, seconds since Unix epoch.
    pub expires_at: i64,
    /// The original bearer credential, re-attached to downstream calls.
    pub raw_credential: String,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

// The raw credential must never leak into logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("raw_credential", &"<redacted>")
            .finish()
    }
}
