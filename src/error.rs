/// Failure classes shared by the cipher and the resolver.
///
/// The HTTP layer and the logs key off the kind rather than the concrete error,
/// so a new variant only has to pick the class it belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed master key. Fatal at startup.
    Configuration,
    /// Empty plaintext or a malformed `EncryptedSecret`. Caller-correctable.
    Validation,
    /// AEAD verification failed. Deliberately undifferentiated.
    Cryptographic,
    /// No credential available, or a stored key was requested anonymously.
    Resolution,
    /// An active, owned record exists but cannot be decrypted.
    Corruption,
    /// The persistence collaborator failed.
    Storage,
}

impl ErrorKind {
    /// Whether the caller can fix the request and try again.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::Resolution)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Cryptographic => "cryptographic",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Storage => "storage",
        };
        f.write_str(name)
    }
}
