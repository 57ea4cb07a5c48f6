use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of `POST /auth/token`. Fields are optional so a partial body can be
/// reported as a request failure instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub tenant_id: Option<String>,
    pub token_type: Option<String>,
}
