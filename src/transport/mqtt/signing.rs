//! SigV4 query presigning for the websocket upgrade
//!
//! AWS-IoT-style brokers authenticate the websocket handshake itself: the
//! client presents a `wss://<endpoint>/mqtt` URL whose query string carries a
//! SigV4 signature over the upgrade request. Signed URLs are only valid for a
//! few minutes, which is why every (re)connect attempt derives a fresh one
//! from the credential material that is current at that moment.
//!
//! The timestamp is an explicit argument so the derivation stays
//! deterministic and testable; callers pass `Utc::now()`.

use crate::credentials::CredentialMaterial;
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "iotdevicegateway";
const URL_EXPIRY_SECS: u32 = 3600;

/// Derive the presigned websocket URL for one connect attempt.
pub fn presign_websocket_url(
    endpoint: &str,
    material: &CredentialMaterial,
    at: DateTime<Utc>,
) -> Result<String, TransportError> {
    if material.is_placeholder() {
        return Err(TransportError::OpenFailed(
            "credential material has not been refreshed yet"
                .to_string()
                .into(),
        ));
    }

    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = at.format("%Y%m%d").to_string();
    let scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", material.region);
    let credential = format!("{}/{scope}", material.access_key_id);

    // Query parameters in lexicographic order, values URI-encoded; the same
    // string feeds both the canonical request and the final URL.
    let canonical_query = format!(
        "X-Amz-Algorithm={ALGORITHM}\
         &X-Amz-Credential={}\
         &X-Amz-Date={amz_date}\
         &X-Amz-Expires={URL_EXPIRY_SECS}\
         &X-Amz-SignedHeaders=host",
        urlencoding::encode(&credential),
    );

    let payload_hash = hex::encode(Sha256::digest(b""));
    let canonical_request = format!(
        "GET\n/mqtt\n{canonical_query}\nhost:{endpoint}\n\nhost\n{payload_hash}"
    );

    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(
        &material.secret_access_key,
        &date_stamp,
        &material.region,
        SERVICE,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    // The session token is appended after signing; it is not part of the
    // canonical request for this service.
    let mut url = format!("wss://{endpoint}/mqtt?{canonical_query}&X-Amz-Signature={signature}");
    if !material.session_token.is_empty() {
        url.push_str("&X-Amz-Security-Token=");
        url.push_str(&urlencoding::encode(&material.session_token));
    }
    Ok(url)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Standard SigV4 key derivation chain: date, region, service, terminator.
fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
