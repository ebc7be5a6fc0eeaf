//! Identity ticket signing and verification
//!
//! A ticket is the hex encoded HMAC-SHA256 of the decimal identity under a
//! secret shared between the server and whatever issues tickets to clients.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How `set_identity` commands are checked
#[derive(Clone, Debug)]
pub enum IdentityPolicy {
    /// Identities are taken at face value
    Open,
    /// Tickets must be signed with this secret
    Signed(String),
}

impl IdentityPolicy {
    pub fn from_secret(secret: Option<String>) -> Self {
        match secret {
            Some(secret) => Self::Signed(secret),
            None => Self::Open,
        }
    }

    /// Check a ticket presented for `identity`
    pub fn check(&self, identity: u64, ticket: &str) -> Result<(), AuthError> {
        match self {
            Self::Open => Ok(()),
            Self::Signed(secret) => verify_ticket(identity, ticket, secret),
        }
    }
}

/// Issue a ticket for `identity`
pub fn sign_ticket(identity: u64, secret: &str) -> Result<String, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
    mac.update(identity.to_string().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a ticket in constant time
pub fn verify_ticket(identity: u64, ticket: &str, secret: &str) -> Result<(), AuthError> {
    let provided = hex::decode(ticket.trim()).map_err(|_| AuthError::MalformedTicket)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
    mac.update(identity.to_string().as_bytes());

    mac.verify_slice(&provided)
        .map_err(|_| AuthError::SignatureMismatch)
}

/// Ticket verification errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Identity secret cannot be used as an HMAC key")]
    InvalidSecret,

    #[error("Ticket is not valid hex")]
    MalformedTicket,

    #[error("Ticket signature does not match identity")]
    SignatureMismatch,
}
