use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;

/// Get DB credentials from Vault and store them (with their lease) in `globals`
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(globals))]
pub async fn database_creds(globals: &mut GlobalArgs, role_path: &str) -> Result<()> {
    let creds_url = vault::endpoint_url(&globals.vault_url, role_path)?;

    let request = vault::client()?
        .get(creds_url.as_str())
        .header("X-Vault-Token", globals.vault_token.expose_secret());

    let json_response = vault::send(request, "database.creds", &creds_url).await?;

    let lease_id = json_response
        .get("lease_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_id found"))?;

    let lease_duration = json_response
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))?;

    let username = vault::get_required_str(&json_response, &["data", "username"])
        .ok_or_else(|| anyhow!("Error parsing JSON response: no username found"))?;

    let password = vault::get_required_str(&json_response, &["data", "password"])
        .ok_or_else(|| anyhow!("Error parsing JSON response: no password found"))?;

    globals.vault_db_lease_id = lease_id.to_string();
    globals.vault_db_lease_duration = lease_duration;
    globals.vault_db_username = username.to_string();
    globals.vault_db_password = SecretString::from(password.to_string());

    Ok(())
}
