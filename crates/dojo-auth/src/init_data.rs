use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Domain string Telegram prescribes for deriving the signing key from
/// the bot token.
const KEY_DOMAIN: &[u8] = b"WebAppData";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitDataError {
    #[error("payload is not a valid query string")]
    Malformed,
    #[error("signature field missing")]
    MissingSignature,
    #[error("signature mismatch")]
    BadSignature,
    #[error("auth timestamp missing or unreadable")]
    MissingTimestamp,
    #[error("credential is older than the allowed maximum age")]
    Expired,
    #[error("no user object in payload")]
    MissingUser,
}

/// The `user` object embedded in init data. Telegram sends more fields
/// (language, premium flag, photo url); we only keep what the backend uses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebAppUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedInitData {
    pub user: WebAppUser,
    pub auth_date: i64,
}

/// Verify a raw `initData` payload against the bot token.
///
/// Rejects if the `hash` field is absent, the HMAC does not match, or the
/// embedded `auth_date` is older than `max_age_secs` (replay protection).
pub fn verify(
    raw: &str,
    bot_token: &str,
    max_age_secs: i64,
) -> Result<VerifiedInitData, InitDataError> {
    verify_at(raw, bot_token, max_age_secs, chrono::Utc::now().timestamp())
}

/// Same as [`verify`] with an explicit clock, so expiry is testable.
pub fn verify_at(
    raw: &str,
    bot_token: &str,
    max_age_secs: i64,
    now: i64,
) -> Result<VerifiedInitData, InitDataError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut supplied_hash: Option<String> = None;

    for part in raw.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or(InitDataError::Malformed)?;
        let key = urlencoding::decode(key)
            .map_err(|_| InitDataError::Malformed)?
            .into_owned();
        let value = urlencoding::decode(value)
            .map_err(|_| InitDataError::Malformed)?
            .into_owned();
        if key == "hash" {
            supplied_hash = Some(value);
        } else {
            pairs.push((key, value));
        }
    }

    let supplied = supplied_hash.ok_or(InitDataError::MissingSignature)?;
    let supplied = hex::decode(supplied.trim()).map_err(|_| InitDataError::BadSignature)?;

    // Data-check string: remaining pairs, sorted by key, `key=value`
    // joined by newlines.
    pairs.sort();
    let check_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut mac = HmacSha256::new_from_slice(&derive_secret(bot_token))
        .expect("hmac accepts keys of any length");
    mac.update(check_string.as_bytes());
    // verify_slice is constant-time; never compare digests with ==.
    mac.verify_slice(&supplied)
        .map_err(|_| InitDataError::BadSignature)?;

    let auth_date: i64 = pairs
        .iter()
        .find(|(k, _)| k == "auth_date")
        .and_then(|(_, v)| v.parse().ok())
        .ok_or(InitDataError::MissingTimestamp)?;
    if now.saturating_sub(auth_date) > max_age_secs {
        return Err(InitDataError::Expired);
    }

    let user_json = pairs
        .iter()
        .find(|(k, _)| k == "user")
        .map(|(_, v)| v.as_str())
        .ok_or(InitDataError::MissingUser)?;
    let user: WebAppUser =
        serde_json::from_str(user_json).map_err(|_| InitDataError::MissingUser)?;

    Ok(VerifiedInitData { user, auth_date })
}

fn derive_secret(bot_token: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(KEY_DOMAIN).expect("hmac accepts keys of any length");
    mac.update(bot_token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456:TEST-TOKEN";

    /// Build a correctly signed payload the way Telegram would.
    fn signed_payload(fields: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = fields.to_vec();
        sorted.sort();
        let check_string = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut mac = HmacSha256::new_from_slice(&derive_secret(TOKEN)).unwrap();
        mac.update(check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let mut raw: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        raw.push(format!("hash={hash}"));
        raw.join("&")
    }

    fn user_field() -> String {
        r#"{"id":777000,"first_name":"Rin","username":"rin_the_ghost"}"#.to_string()
    }

    #[test]
    fn accepts_valid_payload() {
        let user = user_field();
        let raw = signed_payload(&[
            ("auth_date", "1700000000"),
            ("query_id", "AAF3kQ"),
            ("user", &user),
        ]);
        let verified = verify_at(&raw, TOKEN, 86_400, 1_700_000_100).unwrap();
        assert_eq!(verified.user.id, 777_000);
        assert_eq!(verified.user.first_name, "Rin");
        assert_eq!(verified.user.username.as_deref(), Some("rin_the_ghost"));
        assert_eq!(verified.auth_date, 1_700_000_000);
    }

    #[test]
    fn rejects_tampered_signature() {
        let user = user_field();
        let raw = signed_payload(&[("auth_date", "1700000000"), ("user", &user)]);

        // Flip one hex digit of the hash.
        let mut tampered = raw.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        assert_eq!(
            verify_at(&tampered, TOKEN, 86_400, 1_700_000_100),
            Err(InitDataError::BadSignature)
        );
    }

    #[test]
    fn rejects_tampered_fields() {
        let user = user_field();
        let raw = signed_payload(&[("auth_date", "1700000000"), ("user", &user)]);
        let tampered = raw.replace("777000", "777001");
        assert_eq!(
            verify_at(&tampered, TOKEN, 86_400, 1_700_000_100),
            Err(InitDataError::BadSignature)
        );
    }

    #[test]
    fn rejects_missing_hash() {
        assert_eq!(
            verify_at("auth_date=1700000000", TOKEN, 86_400, 1_700_000_100),
            Err(InitDataError::MissingSignature)
        );
    }

    #[test]
    fn rejects_stale_auth_date_despite_valid_signature() {
        let user = user_field();
        let raw = signed_payload(&[("auth_date", "1700000000"), ("user", &user)]);
        // Two days later with a one-day budget.
        assert_eq!(
            verify_at(&raw, TOKEN, 86_400, 1_700_172_800),
            Err(InitDataError::Expired)
        );
    }

    #[test]
    fn rejects_wrong_bot_token() {
        let user = user_field();
        let raw = signed_payload(&[("auth_date", "1700000000"), ("user", &user)]);
        assert_eq!(
            verify_at(&raw, "999:OTHER-TOKEN", 86_400, 1_700_000_100),
            Err(InitDataError::BadSignature)
        );
    }

    #[test]
    fn rejects_payload_without_user() {
        let raw = signed_payload(&[("auth_date", "1700000000"), ("query_id", "AAF3kQ")]);
        assert_eq!(
            verify_at(&raw, TOKEN, 86_400, 1_700_000_100),
            Err(InitDataError::MissingUser)
        );
    }
}
