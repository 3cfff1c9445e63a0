//! Portal login for token refresh
//!
//! The portal authenticates with a form POST and hands the session token
//! back as a `Set-Cookie` rather than in the response body. Called when a
//! balance fetch reports an expired token (at most once per monitoring
//! cycle) or to bootstrap a token when none is stored yet.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Cookie carrying the portal session token.
pub const TOKEN_COOKIE: &str = "AppUserToken";

/// Login response body. The token itself arrives via `Set-Cookie`; the
/// body only signals acceptance (`Tag == 1`) or carries the rejection
/// message.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "Tag")]
    tag: i64,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Log in with account/password and return a fresh session token.
///
/// Rejected credentials (`Tag != 1`, or 401/403) classify as
/// `InvalidCredentials` so the cycle can report an authentication failure
/// instead of retrying; transport and parse failures stay transient.
pub async fn login(
    client: &reqwest::Client,
    login_url: &str,
    account: &str,
    password: &str,
) -> Result<String> {
    let response = client
        .post(login_url)
        .header("x-requested-with", "XMLHttpRequest")
        .form(&[("account", account), ("password", password)])
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::InvalidCredentials(format!(
            "login rejected ({status}): {body}"
        )));
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Portal(format!(
            "login endpoint returned {status}: {body}"
        )));
    }

    // The cookie must be read before .json() consumes the response.
    let token = response
        .cookies()
        .find(|c| c.name() == TOKEN_COOKIE)
        .map(|c| c.value().to_string());

    let payload: LoginResponse = response
        .json()
        .await
        .map_err(|e| Error::Parse(format!("invalid login response: {e}")))?;

    if payload.tag != 1 {
        return Err(Error::InvalidCredentials(
            payload
                .message
                .unwrap_or_else(|| String::from("login rejected")),
        ));
    }

    token.ok_or_else(|| Error::Portal("login succeeded but token cookie missing".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Start a mock login endpoint with a fixed body and optional token cookie.
    async fn start_login(
        status: u16,
        body: &'static str,
        cookie: Option<&'static str>,
    ) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move {
                let mut response = axum::response::Response::builder()
                    .status(axum::http::StatusCode::from_u16(status).unwrap())
                    .header(axum::http::header::CONTENT_TYPE, "application/json");
                if let Some(cookie) = cookie {
                    response = response.header(axum::http::header::SET_COOKIE, cookie);
                }
                response.body(axum::body::Body::from(body)).unwrap()
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/Login/LoginJson")
    }

    #[tokio::test]
    async fn login_extracts_token_cookie() {
        let url = start_login(
            200,
            r#"{"Tag":1}"#,
            Some("AppUserToken=tk_fresh_123; Path=/; HttpOnly"),
        )
        .await;

        let client = reqwest::Client::new();
        let token = login(&client, &url, "acct", "pw").await.unwrap();
        assert_eq!(token, "tk_fresh_123");
    }

    #[tokio::test]
    async fn rejected_credentials_classify_as_invalid() {
        let url = start_login(200, r#"{"Tag":0,"Message":"wrong password"}"#, None).await;

        let client = reqwest::Client::new();
        let result = login(&client, &url, "acct", "bad-pw").await;
        match result {
            Err(Error::InvalidCredentials(msg)) => assert!(msg.contains("wrong password")),
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_login_without_cookie_is_portal_error() {
        let url = start_login(200, r#"{"Tag":1}"#, None).await;

        let client = reqwest::Client::new();
        let result = login(&client, &url, "acct", "pw").await;
        assert!(matches!(result, Err(Error::Portal(_))));
    }

    #[tokio::test]
    async fn http_403_is_invalid_credentials() {
        let url = start_login(403, "forbidden", None).await;

        let client = reqwest::Client::new();
        let result = login(&client, &url, "acct", "pw").await;
        assert!(matches!(result, Err(Error::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn http_500_is_portal_error() {
        let url = start_login(500, "boom", None).await;

        let client = reqwest::Client::new();
        let result = login(&client, &url, "acct", "pw").await;
        assert!(matches!(result, Err(Error::Portal(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let client = reqwest::Client::new();
        let result = login(&client, "http://127.0.0.1:1/login", "a", "p").await;
        assert!(matches!(result, Err(Error::Http(_))));
    }
}
