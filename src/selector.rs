use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::metadata::CertificateCandidate;
use crate::parsers::certificate::ParsedCertificate;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no X509Certificate in SPSSODescriptor")]
    NoCertificate,
    #[error("certificate could not be decoded: {0}")]
    Undecodable(String),
    #[error("certificate is not valid anymore (expired {})", .not_after.format("%Y-%m-%d %H:%M:%S UTC"))]
    Expired { not_after: DateTime<Utc> },
}

/// Choose the certificate an SP currently signs with.
///
/// Two certificates without a signing/encryption `use`, sharing a KeyName and
/// with different bodies form a rollover pair; the one that expires later wins
/// (the second on a tie). Any other shape selects the first certificate.
/// The chosen certificate must still be valid at `now`.
pub fn select(
    candidates: &[CertificateCandidate],
    now: DateTime<Utc>,
) -> Result<ParsedCertificate, SelectionError> {
    let first = candidates.first().ok_or(SelectionError::NoCertificate)?;

    let chosen = if is_rollover_pair(candidates) {
        let a = decode(&candidates[0])?;
        let b = decode(&candidates[1])?;
        tracing::debug!(
            first_expiry = %a.not_after,
            second_expiry = %b.not_after,
            "rollover pair detected"
        );
        if a.not_after > b.not_after {
            a
        } else {
            b
        }
    } else {
        decode(first)?
    };

    if chosen.not_after <= now {
        return Err(SelectionError::Expired {
            not_after: chosen.not_after,
        });
    }

    Ok(chosen)
}

fn is_rollover_pair(candidates: &[CertificateCandidate]) -> bool {
    let [a, b] = candidates else {
        return false;
    };
    !a.is_signing_or_encryption()
        && !b.is_signing_or_encryption()
        && a.key_name == b.key_name
        && a.compact_body() != b.compact_body()
}

fn decode(candidate: &CertificateCandidate) -> Result<ParsedCertificate, SelectionError> {
    ParsedCertificate::from_base64(&candidate.body)
        .map_err(|e| SelectionError::Undecodable(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::certificate::tests::*;

    fn candidate(pem: &str, key_use: Option<&str>, key_name: Option<&str>) -> CertificateCandidate {
        CertificateCandidate {
            body: body_of(pem),
            key_use: key_use.map(String::from),
            key_name: key_name.map(String::from),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn rollover_pair_picks_later_expiry() {
        let old = candidate(ROLLOVER_OLD_PEM, None, Some("k"));
        let new = candidate(ROLLOVER_NEW_PEM, None, Some("k"));

        let picked = select(&[old.clone(), new.clone()], now()).unwrap();
        assert_eq!(picked.not_after.format("%Y").to_string(), "2126");

        // Order does not matter
        let picked = select(&[new, old], now()).unwrap();
        assert_eq!(picked.not_after.format("%Y").to_string(), "2126");
    }

    #[test]
    fn signing_use_disables_rollover() {
        let old = candidate(ROLLOVER_OLD_PEM, Some("signing"), Some("k"));
        let new = candidate(ROLLOVER_NEW_PEM, None, Some("k"));
        let picked = select(&[old, new], now()).unwrap();
        assert_eq!(picked.not_after.format("%Y").to_string(), "2100");
    }

    #[test]
    fn different_key_names_select_first() {
        let old = candidate(ROLLOVER_OLD_PEM, None, Some("old"));
        let new = candidate(ROLLOVER_NEW_PEM, None, Some("new"));
        let picked = select(&[old, new], now()).unwrap();
        assert_eq!(picked.not_after.format("%Y").to_string(), "2100");
    }

    #[test]
    fn identical_bodies_select_first() {
        let a = candidate(SP_ONE_PEM, None, None);
        let picked = select(&[a.clone(), a], now()).unwrap();
        assert!(picked.subject.contains("sp1.example.org"));
    }

    #[test]
    fn single_certificate_selected_regardless_of_use() {
        for key_use in [None, Some("signing"), Some("encryption")] {
            let picked = select(&[candidate(SP_ONE_PEM, key_use, None)], now()).unwrap();
            assert!(picked.subject.contains("sp1.example.org"));
        }
    }

    #[test]
    fn expired_certificate_is_rejected() {
        let err = select(&[candidate(EXPIRED_PEM, None, None)], now()).unwrap_err();
        assert!(matches!(err, SelectionError::Expired { .. }));
        assert!(err.to_string().contains("2020-01-01"));
    }

    #[test]
    fn rollover_winner_is_still_expiry_checked() {
        let expired = candidate(EXPIRED_PEM, None, Some("k"));
        let old = candidate(ROLLOVER_OLD_PEM, None, Some("k"));
        let far_future = DateTime::parse_from_rfc3339("2110-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let err = select(&[expired, old], far_future).unwrap_err();
        assert!(matches!(err, SelectionError::Expired { .. }));
    }

    #[test]
    fn no_candidates() {
        assert!(matches!(select(&[], now()), Err(SelectionError::NoCertificate)));
    }

    #[test]
    fn garbage_body_is_undecodable() {
        let bad = CertificateCandidate {
            body: "Zm9v".to_string(),
            ..Default::default()
        };
        assert!(matches!(select(&[bad], now()), Err(SelectionError::Undecodable(_))));
    }
}
