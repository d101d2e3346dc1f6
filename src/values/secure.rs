use std::fmt;

/// Text stored encrypted at rest. Reads return the masked form unless the
/// caller asks the server to decrypt.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecureString {
    plain: Option<String>,
    masked: String,
}

impl SecureString {
    pub fn new(plain: impl Into<String>, masked: impl Into<String>) -> Self {
        Self {
            plain: Some(plain.into()),
            masked: masked.into(),
        }
    }

    /// Value as returned by a read without decryption.
    pub fn masked_only(masked: impl Into<String>) -> Self {
        Self {
            plain: None,
            masked: masked.into(),
        }
    }

    pub(crate) fn from_parts(plain: Option<String>, masked: String) -> Self {
        Self { plain, masked }
    }

    pub fn plain(&self) -> Option<&str> {
        self.plain.as_deref()
    }

    pub fn masked(&self) -> &str {
        &self.masked
    }

    pub fn is_decrypted(&self) -> bool {
        self.plain.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_none() && self.masked.is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureString")
            .field("masked", &self.masked)
            .field("decrypted", &self.plain.is_some())
            .finish()
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked)
    }
}

/// Write-only secret. The server keeps a verifier and never returns the
/// value, so a read leaves this empty.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VerifyString(Option<String>);

impl VerifyString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Some(secret.into()))
    }

    pub fn secret(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for VerifyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            write!(f, "VerifyString(***)")
        } else {
            write!(f, "VerifyString(unset)")
        }
    }
}
