use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Result, anyhow};
use base64ct::{Base64, Encoding};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{error, instrument};

/// Transit engine mount and key used for encryption.
#[derive(Clone, Debug)]
pub struct TransitKey {
    mount: String,
    name: String,
}

impl TransitKey {
    #[must_use]
    pub fn new(mount: &str, name: &str) -> Self {
        Self {
            mount: mount.trim_matches('/').to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn path(&self, operation: &str) -> String {
        format!("/v1/{}/{operation}/{}", self.mount, self.name)
    }
}

/// Encrypt using Vault transit engine, returns the `vault:v<N>:...` ciphertext
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(globals, plaintext))]
pub async fn encrypt(globals: &GlobalArgs, key: &TransitKey, plaintext: &[u8]) -> Result<String> {
    let url = vault::endpoint_url(&globals.vault_url, &key.path("encrypt"))?;

    let request = vault::client()?
        .post(url.as_str())
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .json(&json!({ "plaintext": Base64::encode_string(plaintext) }));

    let json_response = vault::send(request, "transit.encrypt", &url).await?;

    vault::get_required_str(&json_response, &["data", "ciphertext"]).map_or_else(
        || {
            error!("Failed to encrypt, no ciphertext in response");
            Err(anyhow!("Failed to encrypt"))
        },
        |ciphertext| Ok(ciphertext.to_string()),
    )
}

/// Decrypt a transit ciphertext back into the original bytes
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status (wrong key, corrupted ciphertext), or the response is missing expected fields.
#[instrument(skip(globals, ciphertext))]
pub async fn decrypt(globals: &GlobalArgs, key: &TransitKey, ciphertext: &str) -> Result<Vec<u8>> {
    let url = vault::endpoint_url(&globals.vault_url, &key.path("decrypt"))?;

    let request = vault::client()?
        .post(url.as_str())
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .json(&json!({ "ciphertext": ciphertext }));

    let json_response = vault::send(request, "transit.decrypt", &url).await?;

    let plaintext_b64 = vault::get_required_str(&json_response, &["data", "plaintext"])
        .ok_or_else(|| {
            error!("Failed to decrypt, no plaintext in response");
            anyhow!("Failed to decrypt")
        })?;

    Base64::decode_vec(plaintext_b64).map_err(|e| {
        error!("Failed to decode plaintext: {}", e);
        anyhow!("Failed to decode plaintext")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn globals(url: String) -> GlobalArgs {
        let mut globals = GlobalArgs::new(url);
        globals.set_token(SecretString::from("vault-token".to_string()));
        globals
    }

    #[test]
    fn transit_key_trims_mount_slashes() {
        let key = TransitKey::new("/transit/upfront/", "magic-link");
        assert_eq!(key.path("encrypt"), "/v1/transit/upfront/encrypt/magic-link");
        assert_eq!(key.name(), "magic-link");
    }

    #[tokio::test]
    async fn encrypt_sends_base64_plaintext() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/transit/upfront/encrypt/magic-link"))
            .and(header("X-Vault-Token", "vault-token"))
            .and(body_json(json!({"plaintext": "aGVsbG8="})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"ciphertext": "vault:v1:c2VjcmV0"}
            })))
            .mount(&server)
            .await;

        let key = TransitKey::new("transit/upfront", "magic-link");
        let ciphertext = encrypt(&globals(server.uri()), &key, b"hello").await?;

        assert_eq!(ciphertext, "vault:v1:c2VjcmV0");
        Ok(())
    }

    #[tokio::test]
    async fn decrypt_returns_raw_bytes() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/transit/upfront/decrypt/magic-link"))
            .and(body_json(json!({"ciphertext": "vault:v1:c2VjcmV0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"plaintext": "aGVsbG8="}
            })))
            .mount(&server)
            .await;

        let key = TransitKey::new("transit/upfront", "magic-link");
        let plaintext = decrypt(&globals(server.uri()), &key, "vault:v1:c2VjcmV0").await?;

        assert_eq!(plaintext, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn decrypt_fails_on_rotated_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/transit/upfront/decrypt/magic-link"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"errors": ["cipher: message authentication failed"]})),
            )
            .mount(&server)
            .await;

        let key = TransitKey::new("transit/upfront", "magic-link");
        let result = decrypt(&globals(server.uri()), &key, "vault:v1:Zm9yZ2Vk").await;

        assert!(result.is_err());
    }
}
