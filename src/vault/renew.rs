use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng, rngs::StdRng};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::future::Future;
use tokio::{
    sync::mpsc,
    time::{Duration, sleep},
};
use tracing::{debug, error, instrument, warn};

const RENEW_ATTEMPTS: u32 = 3;

/// Renew the Vault client token, returns the new lease duration in seconds
#[instrument(skip(token))]
async fn renew_token(url: &str, token: &SecretString) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/auth/token/renew-self")?;

    let request = vault::client()?
        .post(&renew_url)
        .json(&json!({ "increment": 0 }))
        .header("X-Vault-Token", token.expose_secret());

    let json_response = vault::send(request, "token.renew", &renew_url).await?;

    json_response
        .get("auth")
        .and_then(|v| v.get("lease_duration"))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew the dynamic database credentials lease
#[instrument(skip(token))]
async fn renew_db_lease(
    url: &str,
    token: &SecretString,
    lease_id: &str,
    increment: u64,
) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/sys/leases/renew")?;

    let request = vault::client()?
        .post(&renew_url)
        .json(&json!({ "increment": increment, "lease_id": lease_id }))
        .header("X-Vault-Token", token.expose_secret());

    let json_response = vault::send(request, "lease.renew", &renew_url).await?;

    json_response
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew somewhere between 70% and 90% of the lease so replicas spread out.
fn jittered(rng: &mut StdRng, lease_duration: u64) -> Duration {
    let factor = rng.gen_range(70..90);
    Duration::from_secs(lease_duration * factor / 100)
}

/// Keep renewing a lease forever; after three failed attempts in a row the
/// shutdown channel is signalled and the loop ends.
async fn renew_loop<F, Fut>(what: &'static str, tx: mpsc::UnboundedSender<()>, renew: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let mut rng = StdRng::from_entropy();

    loop {
        let mut next_renewal = Duration::default();

        for attempt in 1..=RENEW_ATTEMPTS {
            if attempt > 1 {
                let backoff_time = 2u64.pow(attempt - 1);
                warn!("Backing off for {} seconds", backoff_time);
                sleep(Duration::from_secs(backoff_time)).await;
            }

            match renew().await {
                Ok(lease_duration) => {
                    next_renewal = jittered(&mut rng, lease_duration);
                    break;
                }

                Err(e) => {
                    error!("Failed to renew {}: {}", what, e);

                    if attempt == RENEW_ATTEMPTS {
                        error!("Failed to renew {} after {} attempts", what, RENEW_ATTEMPTS);
                        let _ = tx.send(());
                        return;
                    }
                }
            }
        }

        debug!("Will renew {} in {} seconds", what, next_renewal.as_secs());

        sleep(next_renewal).await;
    }
}

/// Spawn background renewal of the Vault token and the database lease.
/// A message on `tx` means a lease could not be renewed and the server must stop.
/// # Errors
/// Currently infallible; kept fallible for callers that `?` it during startup.
#[instrument(skip(globals, tx))]
pub async fn try_renew(globals: &GlobalArgs, tx: mpsc::UnboundedSender<()>) -> Result<()> {
    let url = globals.vault_url.clone();
    let token = globals.vault_token.clone();
    tokio::spawn(renew_loop("token", tx.clone(), move || {
        let url = url.clone();
        let token = token.clone();
        async move { renew_token(&url, &token).await }
    }));

    let url = globals.vault_url.clone();
    let token = globals.vault_token.clone();
    let lease_id = globals.vault_db_lease_id.clone();
    let increment = globals.vault_db_lease_duration;
    tokio::spawn(renew_loop("DB lease", tx, move || {
        let url = url.clone();
        let token = token.clone();
        let lease_id = lease_id.clone();
        async move { renew_db_lease(&url, &token, &lease_id, increment).await }
    }));

    Ok(())
}
