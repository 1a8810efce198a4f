//! Ed25519 key material for signing and verifying credentials.
//!
//! The private key never leaves the server. The public key is derived from it,
//! so operators only have to provision one PKCS#8 PEM file.

use openssl::pkey::{Id, PKey};

/// An Ed25519 key pair in PEM form.
#[derive(Clone)]
pub struct KeyMaterial {
    private_pem: Vec<u8>,
    public_pem: Vec<u8>,
}

impl KeyMaterial {
    /// Generate a fresh key pair.
    pub fn generate() -> Result<Self, KeyError> {
        let key = PKey::generate_ed25519().map_err(KeyError::OpenSsl)?;
        Ok(Self {
            private_pem: key.private_key_to_pem_pkcs8().map_err(KeyError::OpenSsl)?,
            public_pem: key.public_key_to_pem().map_err(KeyError::OpenSsl)?,
        })
    }

    /// Load a PKCS#8 PEM private key and derive its public half.
    pub fn from_private_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let key = PKey::private_key_from_pem(pem).map_err(KeyError::OpenSsl)?;
        if key.id() != Id::ED25519 {
            return Err(KeyError::WrongAlgorithm);
        }
        Ok(Self {
            // Re-encode so that legacy or encrypted-at-rest encodings are normalised.
            private_pem: key.private_key_to_pem_pkcs8().map_err(KeyError::OpenSsl)?,
            public_pem: key.public_key_to_pem().map_err(KeyError::OpenSsl)?,
        })
    }

    pub fn private_pem(&self) -> &[u8] {
        &self.private_pem
    }

    pub fn public_pem(&self) -> &[u8] {
        &self.public_pem
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_pem", &"<redacted>")
            .field("public_pem", &String::from_utf8_lossy(&self.public_pem))
            .finish()
    }
}

/// Validate a standalone public key PEM and return it normalised.
pub fn load_public_pem(pem: &[u8]) -> Result<Vec<u8>, KeyError> {
    let key = PKey::public_key_from_pem(pem).map_err(KeyError::OpenSsl)?;
    if key.id() != Id::ED25519 {
        return Err(KeyError::WrongAlgorithm);
    }
    key.public_key_to_pem().map_err(KeyError::OpenSsl)
}

/// Errors that can occur while loading key material.
#[derive(Debug)]
pub enum KeyError {
    /// OpenSSL could not parse or produce the key
    OpenSsl(openssl::error::ErrorStack),
    /// The key is not an Ed25519 key
    WrongAlgorithm,
    /// The JWT library rejected the key
    Jwt(jsonwebtoken::errors::Error),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::OpenSsl(e) => write!(f, "Invalid key material: {}", e),
            KeyError::WrongAlgorithm => write!(f, "Key is not an Ed25519 key"),
            KeyError::Jwt(e) => write!(f, "Key rejected by JWT backend: {}", e),
        }
    }
}

impl std::error::Error for KeyError {}
