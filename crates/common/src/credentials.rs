//! # Credentials
//!
//! Random access/secret key generation for IAM users created on behalf of
//! a bucket or policy record, plus validation of credentials read back
//! from a secret.
//!
//! Generation is a pure function of the supplied random source so tests
//! can drive it with a seeded or replaying generator.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Minimum length accepted by MinIO for an access key.
pub const ACCESS_KEY_MIN_LEN: usize = 3;
/// Length used when generating access keys without an explicit length.
pub const ACCESS_KEY_DEFAULT_LEN: usize = 20;
/// Minimum length accepted by MinIO for a secret key.
pub const SECRET_KEY_MIN_LEN: usize = 8;
/// Length used when generating secret keys without an explicit length.
pub const SECRET_KEY_DEFAULT_LEN: usize = 40;

const ALPHANUMERIC: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("{kind} length {length} is too short, minimum is {min}")]
    TooShort {
        kind: KeyKind,
        length: usize,
        min: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Access,
    Secret,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Access => write!(f, "access key"),
            KeyKind::Secret => write!(f, "secret key"),
        }
    }
}

/// Generate an access key drawn from `0-9A-Z`.
///
/// A `length` of zero selects [`ACCESS_KEY_DEFAULT_LEN`].
pub fn generate_access_key<R>(length: usize, rng: &mut R) -> Result<String, KeyError>
where
    R: RngCore + ?Sized,
{
    let length = if length == 0 {
        ACCESS_KEY_DEFAULT_LEN
    } else {
        length
    };
    if length < ACCESS_KEY_MIN_LEN {
        return Err(KeyError::TooShort {
            kind: KeyKind::Access,
            length,
            min: ACCESS_KEY_MIN_LEN,
        });
    }

    let mut key = vec![0u8; length];
    rng.fill_bytes(&mut key);
    Ok(key
        .into_iter()
        .map(|byte| ALPHANUMERIC[usize::from(byte) % ALPHANUMERIC.len()] as char)
        .collect())
}

/// Generate a secret key drawn from `[A-Za-z0-9+]`.
///
/// A `length` of zero selects [`SECRET_KEY_DEFAULT_LEN`]. The output is
/// always exactly `length` characters long.
pub fn generate_secret_key<R>(length: usize, rng: &mut R) -> Result<String, KeyError>
where
    R: RngCore + ?Sized,
{
    let length = if length == 0 {
        SECRET_KEY_DEFAULT_LEN
    } else {
        length
    };
    if length < SECRET_KEY_MIN_LEN {
        return Err(KeyError::TooShort {
            kind: KeyKind::Secret,
            length,
            min: SECRET_KEY_MIN_LEN,
        });
    }

    // every 3 raw bytes encode to 4 characters
    let mut raw = vec![0u8; (length * 3).div_ceil(4)];
    rng.fill_bytes(&mut raw);
    let mut encoded = STANDARD_NO_PAD.encode(&raw);
    encoded.truncate(length);
    Ok(encoded.replace('/', "+"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("missing field '{0}'")]
    Missing(&'static str),
    #[error("field '{0}' is not valid UTF-8")]
    NotUtf8(&'static str),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// A user/password pair for a MinIO IAM user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Generate a default-length user and password.
    pub fn generate<R>(rng: &mut R) -> Result<Self, KeyError>
    where
        R: RngCore + ?Sized,
    {
        Ok(Self {
            user: generate_access_key(0, rng)?,
            password: generate_secret_key(0, rng)?,
        })
    }

    /// Validate raw `user` / `password` fields read from a secret.
    pub fn from_fields(
        user: Option<&[u8]>,
        password: Option<&[u8]>,
    ) -> Result<Self, CredentialsError> {
        let user = field("user", user)?;
        let password = field("password", password)?;

        if user.len() < ACCESS_KEY_MIN_LEN {
            return Err(KeyError::TooShort {
                kind: KeyKind::Access,
                length: user.len(),
                min: ACCESS_KEY_MIN_LEN,
            }
            .into());
        }
        if password.len() < SECRET_KEY_MIN_LEN {
            return Err(KeyError::TooShort {
                kind: KeyKind::Secret,
                length: password.len(),
                min: SECRET_KEY_MIN_LEN,
            }
            .into());
        }

        Ok(Self { user, password })
    }
}

fn field(name: &'static str, value: Option<&[u8]>) -> Result<String, CredentialsError> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or(CredentialsError::Missing(name))?;
    String::from_utf8(value.to_vec()).map_err(|_| CredentialsError::NotUtf8(name))
}
