//! AWS Signature Version 4 request signing, header flavour.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION, HOST};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

pub const ALGORITHM_IDENTIFIER: &str = "AWS4-HMAC-SHA256";
pub const KEY_TYPE_IDENTIFIER: &str = "aws4_request";
pub const AMZ_DATE_HEADER: &str = "x-amz-date";
pub const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: DEFAULT_REGION.to_string(),
            service: "s3".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_scope(mut self, region: impl Into<String>, service: impl Into<String>) -> Self {
        self.region = region.into();
        self.service = service.into();
        self
    }

    /// Add `host`, `x-amz-date`, `x-amz-content-sha256` and `authorization`
    /// headers for a request carrying `payload`.
    pub fn sign(
        &self,
        method: &Method,
        url: &Url,
        headers: &mut HeaderMap,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), InvalidHeaderValue> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex::encode(sha256_hash(payload));

        headers.insert(HOST, HeaderValue::from_str(&host_header(url))?);
        headers.insert(
            HeaderName::from_static(AMZ_DATE_HEADER),
            HeaderValue::from_str(&amz_date)?,
        );
        headers.insert(
            HeaderName::from_static(CONTENT_SHA256_HEADER),
            HeaderValue::from_str(&payload_hash)?,
        );

        let authorization = self.authorization(method, url, headers, &payload_hash, now);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        Ok(())
    }

    /// `Authorization` header value over every header already in `headers`.
    pub fn authorization(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = derive_scope(&date, &self.region, &self.service);

        let canonical_headers = canonical_headers(headers);
        let signed_headers = canonical_headers
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request =
            derive_canonical_request(method, url, &canonical_headers, &signed_headers, payload_hash);
        let string_to_sign = derive_string_to_sign(&canonical_request, &amz_date, &scope);
        let signing_key = derive_signing_key(&self.secret_key, &date, &self.region, &self.service);
        let signature = hex::encode(hmac_sign(&signing_key, string_to_sign.as_bytes()));

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM_IDENTIFIER, self.access_key, scope, signed_headers, signature
        )
    }
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn derive_scope(date: &str, region: &str, service: &str) -> String {
    format!("{}/{}/{}/{}", date, region, service, KEY_TYPE_IDENTIFIER)
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sign(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sign(&k_date, region.as_bytes());
    let k_service = hmac_sign(&k_region, service.as_bytes());
    hmac_sign(&k_service, KEY_TYPE_IDENTIFIER.as_bytes())
}

fn derive_canonical_request(
    method: &Method,
    url: &Url,
    canonical_headers: &BTreeMap<String, String>,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let mut headers = String::new();
    for (name, value) in canonical_headers {
        let _ = writeln!(headers, "{}:{}", name, value);
    }

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        url.path(),
        canonical_query_string(url),
        headers,
        signed_headers,
        payload_hash
    )
}

fn derive_string_to_sign(canonical_request: &str, amz_date: &str, scope: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM_IDENTIFIER,
        amz_date,
        scope,
        hex::encode(sha256_hash(canonical_request.as_bytes()))
    )
}

fn canonical_query_string(url: &Url) -> String {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .collect();
    params.sort();
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercased names mapped to trimmed values; repeated headers are joined
/// with a comma.
fn canonical_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut canonical: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if name == AUTHORIZATION {
            continue;
        }
        let value = value.to_str().unwrap_or_default().trim().to_string();
        canonical
            .entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    canonical
}

fn sha256_hash(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, new_from_slice cannot fail here
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                let _ = write!(result, "%{:02X}", byte);
            }
        }
    }
    result
}
