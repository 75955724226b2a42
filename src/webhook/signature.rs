//! Provider webhook signatures: `t=<unix>,v1=<hex hmac-sha256("<t>.<payload>")>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no signature matched")]
    Mismatch,
}

/// Verifies `header` against `payload`. `now` is unix seconds.
pub fn verify(payload: &str, header: &str, secret: &str, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) { candidates.push(bytes); }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() { return Err(SignatureError::Malformed); }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() { return Err(SignatureError::Expired); }

    let signed = format!("{timestamp}.{payload}");
    let matched = candidates.iter().any(|candidate| {
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
        mac.update(signed.as_bytes());
        mac.verify_slice(candidate).is_ok()
    });
    if matched { Ok(()) } else { Err(SignatureError::Mismatch) }
}

/// Builds a header the way the provider does. Used to replay events locally.
pub fn signature_header(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn test_valid_signature() {
        let header = signature_header(PAYLOAD, SECRET, 1_700_000_000);
        assert_eq!(verify(PAYLOAD, &header, SECRET, 1_700_000_100, 300), Ok(()));
    }

    #[test]
    fn test_tampered_payload() {
        let header = signature_header(PAYLOAD, SECRET, 1_700_000_000);
        let tampered = PAYLOAD.replace("evt_1", "evt_2");
        assert_eq!(verify(&tampered, &header, SECRET, 1_700_000_000, 300), Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_wrong_secret_and_stale_timestamp() {
        let header = signature_header(PAYLOAD, SECRET, 1_700_000_000);
        assert_eq!(verify(PAYLOAD, &header, "whsec_other", 1_700_000_000, 300), Err(SignatureError::Mismatch));
        assert_eq!(verify(PAYLOAD, &header, SECRET, 1_700_000_301, 300), Err(SignatureError::Expired));
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(verify(PAYLOAD, "", SECRET, 0, 300), Err(SignatureError::Malformed));
        assert_eq!(verify(PAYLOAD, "t=abc,v1=00", SECRET, 0, 300), Err(SignatureError::Malformed));
        assert_eq!(verify(PAYLOAD, "t=10,v1=not-hex", SECRET, 10, 300), Err(SignatureError::Malformed));
    }

    #[test]
    fn test_extreme_timestamps_are_expired() {
        let now = 1_700_000_000;
        assert_eq!(verify(PAYLOAD, "t=-9223372036854775808,v1=00", SECRET, now, 300), Err(SignatureError::Expired));
        assert_eq!(verify(PAYLOAD, "t=9223372036854775807,v1=00", SECRET, now, 300), Err(SignatureError::Expired));
        let header = signature_header(PAYLOAD, SECRET, i64::MIN);
        assert_eq!(verify(PAYLOAD, &header, SECRET, now, 300), Err(SignatureError::Expired));
    }

    #[test]
    fn test_any_v1_may_match() {
        let good = signature_header(PAYLOAD, SECRET, 1_700_000_000);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={v1}", "00".repeat(32));
        assert_eq!(verify(PAYLOAD, &header, SECRET, 1_700_000_000, 300), Ok(()));
    }
}
