use crate::{
    cli::actions::vault,
    upfront::{
        self,
        identity::PgIdentityProvider,
        provisioner::{AccountOutcome, AccountProvisioner},
        store::PgResourceStore,
    },
};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub vault: vault::Args,
    pub resource_id: String,
}

/// Re-run account provisioning for an active job post whose owner account
/// was left incomplete.
/// # Errors
/// Returns an error if Vault, the database or the identity step fails.
pub async fn execute(args: Args) -> Result<()> {
    let globals = vault::login(&args.vault).await?;
    let dsn = vault::dsn_with_creds(&args.dsn, &globals)?;
    let pool = upfront::connect(&dsn).await?;

    let accounts = AccountProvisioner::new(
        Arc::new(PgResourceStore::new(pool.clone())),
        Arc::new(PgIdentityProvider::new(pool)),
    );

    let outcome = accounts.reprovision(&args.resource_id).await?;
    match outcome {
        AccountOutcome::AlreadyProvisioned => {
            info!(resource_id = %args.resource_id, "account already provisioned, nothing to do");
        }
        AccountOutcome::Created | AccountOutcome::Completed => {
            info!(resource_id = %args.resource_id, ?outcome, "account provisioned");
        }
    }
    println!("{}: {outcome:?}", args.resource_id);

    Ok(())
}
