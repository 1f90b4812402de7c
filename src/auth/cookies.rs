//! Session cookies.
//!
//! Both tokens travel as `HttpOnly; SameSite=Lax` cookies scoped to `/`.
//! `Secure` is added only in production so local HTTP development works.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

use super::token::TokenPair;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

fn build(name: &str, value: &str, max_age: i64, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` values for a freshly issued pair, access first.
///
/// # Errors
/// Returns an error if a token contains bytes that are not valid in a header.
pub fn token_cookies(pair: &TokenPair, secure: bool) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    Ok([
        build(ACCESS_COOKIE, &pair.access_token, pair.access_ttl_seconds, secure)?,
        build(REFRESH_COOKIE, &pair.refresh_token, pair.refresh_ttl_seconds, secure)?,
    ])
}

/// `Set-Cookie` values that expire both session cookies immediately.
///
/// # Errors
/// Never fails for the fixed cookie names; the `Result` mirrors [`token_cookies`].
pub fn cleared_cookies(secure: bool) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    Ok([
        build(ACCESS_COOKIE, "", 0, secure)?,
        build(REFRESH_COOKIE, "", 0, secure)?,
    ])
}

/// Value of the named cookie from the `Cookie` header, if present and non-empty.
#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == name {
                let val = val.trim();
                return (!val.is_empty()).then(|| val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "aaa".to_string(),
            refresh_token: "rrr".to_string(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
        }
    }

    #[test]
    fn token_cookies_carry_attributes() -> Result<(), InvalidHeaderValue> {
        let [access, refresh] = token_cookies(&pair(), false)?;
        assert_eq!(
            access,
            "access_token=aaa; Path=/; HttpOnly; SameSite=Lax; Max-Age=900"
        );
        assert_eq!(
            refresh,
            "refresh_token=rrr; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800"
        );
        Ok(())
    }

    #[test]
    fn production_cookies_are_secure() -> Result<(), InvalidHeaderValue> {
        for cookie in token_cookies(&pair(), true)?
            .into_iter()
            .chain(cleared_cookies(true)?)
        {
            let value = cookie.to_str().unwrap_or_default();
            assert!(value.ends_with("; Secure"), "{value}");
        }
        Ok(())
    }

    #[test]
    fn cleared_cookies_expire_immediately() -> Result<(), InvalidHeaderValue> {
        let [access, refresh] = cleared_cookies(false)?;
        assert_eq!(
            access,
            "access_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
        assert_eq!(
            refresh,
            "refresh_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
        Ok(())
    }

    #[test]
    fn extract_cookie_finds_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; broken; access_token=abc.def ; refresh_token=xyz"),
        );
        assert_eq!(
            extract_cookie(&headers, ACCESS_COOKIE),
            Some("abc.def".to_string())
        );
        assert_eq!(
            extract_cookie(&headers, REFRESH_COOKIE),
            Some("xyz".to_string())
        );
        assert_eq!(extract_cookie(&headers, "session"), None);
    }

    #[test]
    fn extract_cookie_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("access_token="));
        assert_eq!(extract_cookie(&headers, ACCESS_COOKIE), None);
        assert_eq!(extract_cookie(&HeaderMap::new(), ACCESS_COOKIE), None);
    }
}
