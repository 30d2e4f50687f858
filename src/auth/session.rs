//! Signed session cookie.
//!
//! The session travels in the `janusec-token` cookie as
//! `base64(json).base64(hmac_sha256(json))`. The payload carries its own
//! expiry so a replayed cookie stops working even if the browser keeps it.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const SESSION_COOKIE_NAME: &str = "janusec-token";

/// Max-Age of a session that only carries a pending OAuth state.
pub const STATE_SESSION_SECS: u64 = 300;

/// Session payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionData {
    /// Pending OAuth states, keyed by state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Seconds since epoch.
    pub expires_at: u64,
}

impl SessionData {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Why a cookie was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    Malformed,
    BadSignature,
    Expired,
}

/// Signs and verifies session cookies.
#[derive(Clone)]
pub struct SessionCodec {
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec").finish_non_exhaustive()
    }
}

impl SessionCodec {
    pub fn new(secret: &[u8]) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: Hmac::<Sha256>::new_from_slice(secret)?,
        })
    }

    fn mac(&self) -> Hmac<Sha256> {
        self.mac.clone()
    }

    pub fn encode(&self, data: &SessionData) -> String {
        let payload = serde_json::to_vec(data).unwrap_or_default();
        let mut mac = self.mac();
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(&payload),
            general_purpose::URL_SAFE_NO_PAD.encode(sig)
        )
    }

    pub fn decode(&self, token: &str, now: u64) -> Result<SessionData, SessionRejection> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionRejection::Malformed)?;
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionRejection::Malformed)?;
        let sig = general_purpose::URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SessionRejection::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&sig)
            .map_err(|_| SessionRejection::BadSignature)?;

        let data: SessionData =
            serde_json::from_slice(&payload).map_err(|_| SessionRejection::Malformed)?;
        if data.is_expired(now) {
            return Err(SessionRejection::Expired);
        }
        Ok(data)
    }

    /// Read the session from request headers.
    ///
    /// `Ok(None)` means no cookie was sent.
    pub fn from_headers(
        &self,
        headers: &HeaderMap,
        now: u64,
    ) -> Result<Option<SessionData>, SessionRejection> {
        let jar = CookieJar::from_headers(headers);
        match jar.get(SESSION_COOKIE_NAME) {
            Some(cookie) => self.decode(cookie.value(), now).map(Some),
            None => Ok(None),
        }
    }

    /// `Set-Cookie` value storing `data` for `max_age` seconds.
    pub fn set_cookie(&self, data: &SessionData, max_age: u64) -> Option<HeaderValue> {
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        let cookie = Cookie::build((SESSION_COOKIE_NAME, self.encode(data)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(max_age))
            .build();
        HeaderValue::from_str(&cookie.to_string()).ok()
    }
}

/// `Set-Cookie` value that deletes the session cookie.
pub fn clear_cookie() -> Option<HeaderValue> {
    let cookie = Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .expires(time::OffsetDateTime::UNIX_EPOCH)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    fn data(expires_at: u64) -> SessionData {
        SessionData {
            user_id: Some("alice".into()),
            access_token: Some("tok".into()),
            expires_at,
            ..Default::default()
        }
    }

    #[test]
    fn test_signed_cookie_verifies() {
        let codec = SessionCodec::new(b"secret").unwrap();
        let token = codec.encode(&data(2_000));
        assert_eq!(codec.decode(&token, 1_000), Ok(data(2_000)));
    }

    #[test]
    fn test_tampered_cookie_rejected() {
        let codec = SessionCodec::new(b"secret").unwrap();
        let token = codec.encode(&data(2_000));
        let other = SessionCodec::new(b"other").unwrap().encode(&data(2_000));
        let forged = format!(
            "{}.{}",
            token.split_once('.').unwrap().0,
            other.split_once('.').unwrap().1
        );
        assert_eq!(codec.decode(&forged, 1_000), Err(SessionRejection::BadSignature));
        assert_eq!(codec.decode("garbage", 1_000), Err(SessionRejection::Malformed));
    }

    #[test]
    fn test_expired_cookie_rejected() {
        let codec = SessionCodec::new(b"secret").unwrap();
        let token = codec.encode(&data(2_000));
        assert_eq!(codec.decode(&token, 2_000), Err(SessionRejection::Expired));
    }

    #[test]
    fn test_cookie_parsing() {
        let codec = SessionCodec::new(b"secret").unwrap();
        let token = codec.encode(&data(2_000));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("a=1; janusec-token={}; b=2", token)).unwrap(),
        );
        headers.append(header::COOKIE, HeaderValue::from_static("c=3"));
        assert_eq!(codec.from_headers(&headers, 1_000), Ok(Some(data(2_000))));
        assert_eq!(codec.from_headers(&HeaderMap::new(), 1_000), Ok(None));
    }

    #[test]
    fn test_clear_cookie_expires() {
        let value = clear_cookie().unwrap();
        let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn test_set_cookie_attributes() {
        let codec = SessionCodec::new(b"secret").unwrap();
        let value = codec.set_cookie(&data(2_000), 300).unwrap();
        let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(300)));
        assert_eq!(codec.decode(cookie.value(), 1_000), Ok(data(2_000)));

        // lifetimes beyond i64 seconds still produce a cookie
        assert!(codec.set_cookie(&data(2_000), u64::MAX).is_some());
    }
}
