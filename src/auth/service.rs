//! Login and signup against the registry's user endpoints

use super::{Credentials, Session};
use crate::error::{BazaarError, Result};
use crate::models::registry::{RegistryClient, error_message};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct LoginEnvelope {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    access_token: String,
    user: LoginUser,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    user_id: Value,
}

/// Exchange credentials for a [`Session`]
///
/// Any non-2xx response or malformed payload is an [`BazaarError::Auth`]
/// carrying the server's message. Transport failures stay
/// [`BazaarError::Transport`]. Nothing is retried.
pub async fn login(client: &RegistryClient, credentials: &Credentials) -> Result<Session> {
    let url = client.endpoint("user/email-login")?;
    let response = client
        .request(reqwest::Method::GET, url, None)
        .basic_auth(&credentials.email, Some(&credentials.password))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = error_message(response).await;
        tracing::warn!(email = %credentials.email, status = status.as_u16(), "Login rejected");
        return Err(BazaarError::Auth(message));
    }

    let envelope: LoginEnvelope = response
        .json()
        .await
        .map_err(|e| BazaarError::Auth(format!("malformed login response: {}", e)))?;

    let user_id = match envelope.data.user.user_id {
        Value::String(id) => id,
        Value::Number(id) => id.to_string(),
        other => {
            return Err(BazaarError::Auth(format!(
                "malformed login response: user_id is {}",
                other
            )));
        }
    };
    if envelope.data.access_token.is_empty() || user_id.is_empty() {
        return Err(BazaarError::Auth(
            "malformed login response: empty token or user id".to_string(),
        ));
    }

    tracing::info!(email = %credentials.email, user_id = %user_id, "Logged in");
    Ok(Session::new(envelope.data.access_token, user_id))
}

/// Register a new account; it must be verified by email before login
pub async fn signup(client: &RegistryClient, credentials: &Credentials, username: &str) -> Result<()> {
    let url = client.endpoint("user/email-signup-basic")?;
    let request = client.request(reqwest::Method::POST, url, None).json(&serde_json::json!({
        "username": username,
        "email": credentials.email,
        "password": credentials.password,
    }));

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BazaarError::Http {
            status: status.as_u16(),
            message: error_message(response).await,
        });
    }

    tracing::info!(
        email = %credentials.email,
        "Signed up, check your email to verify the account"
    );
    Ok(())
}
