//! Session-backed anti-forgery tokens.
//!
//! A token is stored in the session together with its validity deadline
//! (milliseconds since the Unix epoch). Issuing a token while a valid one
//! exists extends the deadline and returns the same token.

use chrono::Utc;
use serde_json::Value;

use crate::http::Request;
use crate::session::Session;

/// Session key holding the current token.
pub const TOKEN_KEY: &str = "__csrfToken";
/// Session key holding the token deadline.
pub const VALIDITY_KEY: &str = "__csrfTokenValidity";
/// Request header checked before the form field.
pub const TOKEN_HEADER: &str = "x-csrf-token";
/// Form field checked when the header is absent.
pub const TOKEN_FIELD: &str = "__csrfToken";

const VALIDITY_MS: i64 = 30 * 60 * 1000;

/// Returns the session's token, issuing a new one if none is valid.
pub fn generate_token(session: &mut Session) -> String {
    let now = Utc::now().timestamp_millis();

    if let (Some(token), Some(deadline)) = (
        session.get(TOKEN_KEY).and_then(Value::as_str).map(str::to_owned),
        session.get(VALIDITY_KEY).and_then(Value::as_i64),
    ) {
        if deadline >= now {
            session.set(VALIDITY_KEY, now + VALIDITY_MS);
            return token;
        }
    }

    let token = format!(
        "{:x}{:x}",
        rand::random::<u64>(),
        rand::random::<u64>()
    );
    session.set(TOKEN_KEY, token.clone());
    session.set(VALIDITY_KEY, now + VALIDITY_MS);
    token
}

/// Checks the token sent with `request` against its session.
pub fn check_token(request: &Request) -> bool {
    let sent = request
        .headers()
        .get(TOKEN_HEADER)
        .or_else(|| request.form().get_str(TOKEN_FIELD))
        .unwrap_or("");
    if sent.is_empty() {
        return false;
    }

    let session = request.session();
    match (
        session.get(TOKEN_KEY).and_then(Value::as_str),
        session.get(VALIDITY_KEY).and_then(Value::as_i64),
    ) {
        (Some(expected), Some(deadline)) => {
            expected == sent && deadline >= Utc::now().timestamp_millis()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(extra_header: &str, body: &[u8]) -> Request {
        let raw = format!(
            "POST /save HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n{extra_header}\r\n"
        );
        let (mut req, _) = Request::parse(raw.as_bytes(), None).unwrap();
        req.parse_body(body).unwrap();
        req
    }

    #[test]
    fn reissue_returns_same_token_while_valid() {
        let mut session = Session::disabled();
        let first = generate_token(&mut session);
        let second = generate_token(&mut session);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn expired_token_is_replaced() {
        let mut session = Session::disabled();
        let first = generate_token(&mut session);
        session.set(VALIDITY_KEY, 0);
        assert_ne!(generate_token(&mut session), first);
    }

    #[test]
    fn token_from_form_field() {
        let mut req = request("", b"");
        let token = generate_token(req.session_mut());
        let body = format!("{TOKEN_FIELD}={token}");
        req.parse_body(body.as_bytes()).unwrap();
        assert!(check_token(&req));
    }

    #[test]
    fn token_from_header() {
        let mut req = request("X-CSRF-Token: placeholder\r\n", b"");
        let token = generate_token(req.session_mut());
        assert!(!check_token(&req));

        let raw = format!("POST /save HTTP/1.1\r\nX-CSRF-Token: {token}\r\n\r\n");
        let (mut with_header, _) = Request::parse(raw.as_bytes(), None).unwrap();
        with_header.set_session(req.session().clone());
        assert!(check_token(&with_header));
    }

    #[test]
    fn missing_or_wrong_token_fails() {
        let mut req = request("", b"__csrfToken=nope");
        assert!(!check_token(&req));
        generate_token(req.session_mut());
        assert!(!check_token(&req));
    }
}
