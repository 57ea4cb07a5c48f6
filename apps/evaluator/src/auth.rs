//! Login page logic: exchange credentials for a session and persist it.

use tracing::info;

use crate::api_client::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::auth::{TokenRequest, TokenResponse};
use crate::session::{KeyValueStore, Session, SessionStore};

/// POST /auth/token
///
/// Stores the issued session on success. Empty credentials are rejected
/// before any network call.
pub async fn login<S: KeyValueStore>(
    api: &ApiClient,
    sessions: &SessionStore<S>,
    email: &str,
    password: &str,
) -> ClientResult<Session> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(ClientError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let options = RequestOptions::post().json(&TokenRequest { email, password })?;
    let response: TokenResponse = api.request_as("/auth/token", options).await?;

    let session = match (response.access_token, response.tenant_id) {
        (Some(token), Some(tenant_id)) if !token.is_empty() && !tenant_id.is_empty() => {
            Session { token, tenant_id }
        }
        _ => {
            return Err(ClientError::Request {
                status: 200,
                message: "Login response did not include a token and tenant".to_string(),
            })
        }
    };

    sessions.set(&session)?;
    info!(
        tenant_id = %session.tenant_id,
        token_type = response.token_type.as_deref().unwrap_or("bearer"),
        "logged in"
    );
    Ok(session)
}

/// Clears the stored session. The caller returns the user to login.
pub fn logout<S: KeyValueStore>(sessions: &SessionStore<S>) -> ClientResult<()> {
    sessions.clear()
}
