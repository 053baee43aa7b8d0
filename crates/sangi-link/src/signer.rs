//! AWS Signature Version 4 presigning for IoT Core WebSocket endpoints.
//!
//! AWS IoT accepts MQTT over WebSocket on `wss://<endpoint>/mqtt` when the
//! upgrade request carries a presigned query string. The signature covers
//! only the `host` header and an empty payload; the session token is added
//! after signing.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use url::Url;

use sangi_core::prelude::*;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Service name AWS IoT uses for device gateway signatures.
pub const SERVICE: &str = "iotdevicegateway";

/// Path of the MQTT-over-WebSocket endpoint.
pub const MQTT_PATH: &str = "/mqtt";

pub const DEFAULT_EXPIRES: Duration = Duration::from_secs(300);

/// SHA-256 of the empty string.
const EMPTY_PAYLOAD_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// RFC 3986 unreserved characters stay literal, everything else is encoded.
const AWS_URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// AWS credentials for the signed transport.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RequestSigner
// ─────────────────────────────────────────────────────────────────────────────

/// Produces presigned endpoint URLs. Sign once per connection attempt; the
/// result expires after [`expires`](RequestSigner::with_expires).
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Option<Credentials>,
    region: String,
    expires: Duration,
}

impl RequestSigner {
    pub fn new(credentials: Option<Credentials>, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            expires: DEFAULT_EXPIRES,
        }
    }

    pub fn with_expires(mut self, expires: Duration) -> Self {
        self.expires = expires;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `endpoint` with the current time.
    pub fn sign_url(&self, endpoint: &str) -> Result<String> {
        self.sign_url_at(endpoint, Utc::now())
    }

    /// Sign `endpoint` as of `now`.
    ///
    /// Without credentials the endpoint is returned unchanged.
    pub fn sign_url_at(&self, endpoint: &str, now: DateTime<Utc>) -> Result<String> {
        let Some(credentials) = &self.credentials else {
            return Ok(endpoint.to_string());
        };

        let url = Url::parse(endpoint)
            .map_err(|e| Error::invalid_endpoint(endpoint, e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_endpoint(endpoint, "missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", self.region);

        let params = [
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            (
                "X-Amz-Credential",
                format!("{}/{scope}", credentials.access_key_id),
            ),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", self.expires.as_secs().to_string()),
            ("X-Amz-SignedHeaders", "host".to_string()),
        ];
        let canonical_query = canonical_query_string(&params);

        let canonical_request = format!(
            "GET\n{MQTT_PATH}\n{canonical_query}\nhost:{host}\n\nhost\n{EMPTY_PAYLOAD_HASH}"
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = derive_signing_key(
            &credentials.secret_access_key,
            &date_stamp,
            &self.region,
            SERVICE,
        )?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let mut signed = format!(
            "{}://{host}{MQTT_PATH}?{canonical_query}&X-Amz-Signature={signature}",
            url.scheme()
        );
        if let Some(token) = &credentials.session_token {
            signed.push_str("&X-Amz-Security-Token=");
            signed.push_str(&uri_encode(token));
        }

        trace!("Signed endpoint for host {} (expires {:?})", host, self.expires);
        Ok(signed)
    }
}

/// Convenience wrapper for one-off signing with the default validity window.
pub fn sign_url(endpoint: &str, credentials: Option<&Credentials>, region: &str) -> Result<String> {
    RequestSigner::new(credentials.cloned(), region).sign_url(endpoint)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_URI_ENCODE).to_string()
}

/// Params must already be sorted by key.
fn canonical_query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", uri_encode(key), uri_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::config(format!("Invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `AWS4 + secret → date → region → service → "aws4_request"`.
pub fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}
