//! HTTP Signatures (draft-cavage) for `ActivityPub`.
//!
//! Signs outbound requests and verifies inbound ones with `rsa-sha256`
//! (`hs2019` accepted as an alias on verify). POST requests sign
//! `(request-target) host date digest`; GET requests sign the same set
//! without `digest`.

#![allow(missing_docs)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use rsa::{
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::DecodePublicKey,
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use signature::{SignatureEncoding, Signer, Verifier};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use url::Url;

use crate::{crypto::parse_private_key, AppError, AppResult};

/// Verification failure taxonomy.
///
/// Callers map these onto HTTP statuses; the variant names are stable and
/// show up in operator logs.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing Signature header")]
    MissingSignatureHeader,
    #[error("malformed Signature header")]
    InvalidSignatureHeader,
    #[error("required header not covered by signature: {0}")]
    MissingSignedHeaders(String),
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("missing Date header")]
    MissingDate,
    #[error("unparseable Date header")]
    InvalidDate,
    #[error("signature expired: {age_secs}s old (max {max_secs}s)")]
    SignatureExpired { age_secs: i64, max_secs: i64 },
    #[error("missing Digest header")]
    MissingDigest,
    #[error("Digest header does not match body")]
    DigestMismatch,
    #[error("signature is not valid base64")]
    InvalidSignatureEncoding,
    #[error("actor public key is not a valid RSA PEM")]
    InvalidPublicKey,
    #[error("signature does not verify")]
    SignatureInvalid,
}

/// Headers that must be covered by the signature on a body-less request.
const REQUIRED_HEADERS_GET: &[&str] = &["(request-target)", "host", "date"];

/// Headers that must be covered by the signature on a POST.
const REQUIRED_HEADERS_POST: &[&str] = &["(request-target)", "host", "date", "digest"];

/// Format a timestamp as an RFC 7231 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
#[must_use]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Calculate the `Digest` header value for a body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

/// Compare a `Digest` header against the raw body, in constant time.
pub fn verify_digest(body: &[u8], digest_header: &str) -> Result<(), VerifyError> {
    let Some((algorithm, value)) = digest_header.split_once('=') else {
        return Err(VerifyError::DigestMismatch);
    };
    if !algorithm.eq_ignore_ascii_case("sha-256") {
        return Err(VerifyError::DigestMismatch);
    }
    let received = BASE64
        .decode(value)
        .map_err(|_| VerifyError::DigestMismatch)?;
    let expected = Sha256::digest(body);

    if received.ct_eq(expected.as_slice()).into() {
        Ok(())
    } else {
        Err(VerifyError::DigestMismatch)
    }
}

/// Parsed `Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Key ID, typically `<actor>#main-key`.
    pub key_id: String,
    /// Declared algorithm, if any.
    pub algorithm: Option<String>,
    /// Header names covered by the signature, in signing order.
    pub headers: Vec<String>,
    /// Base64 signature value.
    pub signature: String,
}

impl SignatureHeader {
    /// Parse a `Signature` header value.
    ///
    /// Format: `keyId="...",algorithm="...",headers="...",signature="..."`.
    /// `headers` defaults to `date` when absent, per the draft.
    pub fn parse(header: &str) -> Result<Self, VerifyError> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in header.split(',') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim_matches('"');
                match key.trim() {
                    "keyId" => key_id = Some(value.to_string()),
                    "algorithm" => algorithm = Some(value.to_string()),
                    "headers" => headers = Some(value.to_string()),
                    "signature" => signature = Some(value.to_string()),
                    _ => {} // Ignore unknown fields
                }
            }
        }

        Ok(Self {
            key_id: key_id.ok_or(VerifyError::InvalidSignatureHeader)?,
            algorithm,
            headers: headers
                .unwrap_or_else(|| "date".to_string())
                .split(' ')
                .map(str::to_lowercase)
                .collect(),
            signature: signature.ok_or(VerifyError::InvalidSignatureHeader)?,
        })
    }
}

/// An inbound request in the shape the verifier needs.
///
/// Header names must already be lowercased.
#[derive(Debug)]
pub struct IncomingRequest<'a> {
    pub method: &'a str,
    pub path_and_query: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub body: Option<&'a [u8]>,
}

/// Pre-key checks: signed-header coverage, algorithm, Date window, Digest.
///
/// Runs before actor resolution so obviously bad requests never trigger a
/// remote fetch. Key lookup and the RSA check happen in
/// [`verify_signature`].
pub fn precheck(
    request: &IncomingRequest<'_>,
    sig: &SignatureHeader,
    signature_max_age_secs: i64,
) -> Result<(), VerifyError> {
    let required = if request.body.is_some() {
        REQUIRED_HEADERS_POST
    } else {
        REQUIRED_HEADERS_GET
    };
    for name in required {
        if !sig.headers.iter().any(|h| h == name) {
            return Err(VerifyError::MissingSignedHeaders((*name).to_string()));
        }
    }

    match sig.algorithm.as_deref() {
        None | Some("rsa-sha256" | "hs2019") => {}
        Some(other) => return Err(VerifyError::UnsupportedAlgorithm(other.to_string())),
    }

    let date = request
        .headers
        .get("date")
        .ok_or(VerifyError::MissingDate)?;
    let date = parse_http_date(date).ok_or(VerifyError::InvalidDate)?;
    let age_secs = Utc::now().signed_duration_since(date).num_seconds().abs();
    if age_secs > signature_max_age_secs {
        return Err(VerifyError::SignatureExpired {
            age_secs,
            max_secs: signature_max_age_secs,
        });
    }

    if let Some(body) = request.body {
        let digest = request
            .headers
            .get("digest")
            .ok_or(VerifyError::MissingDigest)?;
        verify_digest(body, digest)?;
    }

    Ok(())
}

/// Verify the RSA signature over the reconstructed signing string.
pub fn verify_signature(
    request: &IncomingRequest<'_>,
    sig: &SignatureHeader,
    public_key_pem: &str,
) -> Result<(), VerifyError> {
    let signing_string = build_signing_string(
        request.method,
        request.path_and_query,
        request.headers,
        &sig.headers,
    )?;

    let signature_bytes = BASE64
        .decode(&sig.signature)
        .map_err(|_| VerifyError::InvalidSignatureEncoding)?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|_| VerifyError::InvalidPublicKey)?;

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| VerifyError::InvalidSignatureEncoding)?;

    verifying_key
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| VerifyError::SignatureInvalid)
}

/// Build the signing string: one `name: value` line per covered header.
fn build_signing_string(
    method: &str,
    path_and_query: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[String],
) -> Result<String, VerifyError> {
    let mut parts = Vec::with_capacity(signed_headers.len());

    for name in signed_headers {
        let value = if name == "(request-target)" {
            format!("{} {path_and_query}", method.to_lowercase())
        } else {
            headers
                .get(name)
                .ok_or_else(|| VerifyError::MissingSignedHeaders(name.clone()))?
                .clone()
        };
        parts.push(format!("{name}: {value}"));
    }

    Ok(parts.join("\n"))
}

/// Parse an HTTP `Date` header (RFC 7231, with legacy fallbacks).
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S GMT", // RFC 7231
        "%A, %d-%b-%y %H:%M:%S GMT", // RFC 850
        "%a %b %e %H:%M:%S %Y",      // asctime()
    ];
    for format in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }
    None
}

/// Headers produced by signing an outbound request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub host: String,
    pub date: String,
    /// Present on POST only.
    pub digest: Option<String>,
    /// The `Signature` header value.
    pub signature: String,
}

/// Signs outbound requests with an actor's private key.
pub struct RequestSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl RequestSigner {
    /// Create a signer from a PEM private key and its key ID.
    pub fn new(private_key_pem: &str, key_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            private_key: parse_private_key(private_key_pem)?,
            key_id: key_id.into(),
        })
    }

    /// Sign a request. `body` must be the exact bytes that will be sent.
    pub fn sign(&self, method: &str, url: &Url, body: Option<&[u8]>) -> AppResult<SignedHeaders> {
        let host = host_header(url)?;
        let query = url.query().map_or(String::new(), |q| format!("?{q}"));
        let request_target = format!("{} {}{query}", method.to_lowercase(), url.path());

        let date = http_date(Utc::now());
        let digest = body.map(calculate_digest);

        let mut signed_headers = vec!["(request-target)", "host", "date"];
        if digest.is_some() {
            signed_headers.push("digest");
        }

        let mut parts = Vec::with_capacity(signed_headers.len());
        for name in &signed_headers {
            let value = match *name {
                "(request-target)" => request_target.clone(),
                "host" => host.clone(),
                "date" => date.clone(),
                "digest" => digest.clone().unwrap_or_default(),
                _ => unreachable!("unknown signed header"),
            };
            parts.push(format!("{name}: {value}"));
        }
        let signing_string = parts.join("\n");

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature_bytes = signing_key
            .try_sign(signing_string.as_bytes())
            .map_err(|e| AppError::Internal(format!("RSA signing failed: {e}")))?;

        let signature = format!(
            "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            signed_headers.join(" "),
            BASE64.encode(signature_bytes.to_bytes()),
        );

        Ok(SignedHeaders {
            host,
            date,
            digest,
            signature,
        })
    }
}

/// The `Host` header value for a URL, including any non-default port.
fn host_header(url: &Url) -> AppResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::BadRequest(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
