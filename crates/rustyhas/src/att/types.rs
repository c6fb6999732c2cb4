//! Type definitions shared with the ATT bearer

/// Security level of the link an ATT bearer runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    /// No security (unencrypted)
    #[default]
    None,
    /// Encryption without authentication
    EncryptionOnly,
    /// Encryption with authentication
    EncryptionWithAuthentication,
    /// Secure Connections with encryption and authentication
    SecureConnections,
}

impl SecurityLevel {
    /// Check if the link is encrypted at this level
    pub fn is_encrypted(&self) -> bool {
        *self >= SecurityLevel::EncryptionOnly
    }
}
