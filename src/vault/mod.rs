//! Minimal `HashiCorp` Vault client: `AppRole` login, wrapped secret-id
//! unwrapping, dynamic database credentials, lease renewal and the transit
//! engine used to encrypt magic-link tokens.

pub mod database;
pub mod renew;
pub mod transit;

use crate::APP_USER_AGENT;
use anyhow::{Result, anyhow};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, instrument};
use url::Url;

fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

fn vault_error_message(json_response: &Value) -> &str {
    json_response
        .get("errors")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Follow `path` through nested JSON objects and return the string at the end.
pub(crate) fn get_required_str<'a>(json_response: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(json_response, |current, key| current.get(*key))?
        .as_str()
}

/// Send a Vault request and return the JSON body of a successful response.
///
/// Non-success statuses become errors carrying the first message from Vault's
/// `errors` array.
pub(crate) async fn send(request: RequestBuilder, operation: &'static str, url: &str) -> Result<Value> {
    let span = info_span!("vault.request", vault.operation = operation, url = %url);
    let response = request.send().instrument(span).await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await.unwrap_or(Value::Null);

        return Err(anyhow!(
            "{} - {}, {}",
            url,
            status,
            vault_error_message(&json_response)
        ));
    }

    Ok(response.json().await?)
}

/// Build `scheme://host:port{path}` from the configured Vault URL.
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
#[instrument]
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// Unwrap a wrapped Vault client token
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/upfront/secret-id
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;

    let request = client()?.post(&unwrap_url).header("X-Vault-Token", token);
    let json_response = send(request, "unwrap", &unwrap_url).await?;

    get_required_str(&json_response, &["data", "secret_id"])
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))
}

/// Login to Vault using `AppRole`, returns the client token and its lease duration
/// Create a secret ID with:
/// vault write -f auth/approle/role/upfront/secret-id
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(sid))]
pub async fn approle_login(url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", url, rid);

    let request = client()?.post(url).json(&login_payload);
    let json_response = send(request, "approle_login", url).await?;

    let token = get_required_str(&json_response, &["auth", "client_token"])
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response
        .get("auth")
        .and_then(|v| v.get("lease_duration"))
        .and_then(Value::as_u64)
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}
