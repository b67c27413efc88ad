//! Shared-secret request signing.
//!
//! The platform accepts an `Authorization` header of the form
//! `Knoema {client_id}:{base64(HMAC-SHA1(secret, "dd-MM-yy-HH"))}:1.2`, where the
//! signed string is the current UTC time truncated to the hour. A signature is
//! therefore valid for the whole UTC hour in which it was produced.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

/// Scheme name placed in front of the credentials.
pub const AUTH_SCHEME: &str = "Knoema";

/// Signing protocol version appended to the header value.
pub const PROTOCOL_VERSION: &str = "1.2";

type HmacSha1 = Hmac<Sha1>;

#[derive(Clone)]
pub struct RequestSigner {
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl RequestSigner {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Header value for a request sent now.
    pub fn header_value(&self) -> Result<String> {
        self.header_value_at(Utc::now())
    }

    /// Header value for a request sent at `now`. Minutes and seconds are ignored.
    pub fn header_value_at(&self, now: DateTime<Utc>) -> Result<String> {
        Ok(format!(
            "{} {}:{}:{}",
            AUTH_SCHEME,
            self.client_id,
            self.signature_at(now)?,
            PROTOCOL_VERSION
        ))
    }

    fn signature_at(&self, now: DateTime<Utc>) -> Result<String> {
        let window = now.format("%d-%m-%y-%H").to_string();
        let mut mac = <HmacSha1 as KeyInit>::new_from_slice(self.client_secret.as_bytes())
            .map_err(|e| Error::Config(format!("unusable client secret: {}", e)))?;
        mac.update(window.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}
