use crate::cli::{
    actions::{Action, provision, server, vault},
    commands::PROVISION,
};
use anyhow::{Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let vault = vault_args(matches)?;

    if let Some(sub) = matches.subcommand_matches(PROVISION) {
        let resource_id = sub
            .get_one::<String>("resource-id")
            .cloned()
            .context("missing required argument: --resource-id")?;

        return Ok(Action::Provision(provision::Args {
            dsn,
            vault,
            resource_id,
        }));
    }

    let stripe_secret_key = matches
        .get_one::<String>("stripe-secret-key")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --stripe-secret-key")?;

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn,
        vault,
        stripe_secret_key,
        stripe_api_url: required(matches, "stripe-api-url")?,
        email_from: required(matches, "email-from")?,
        email_subject: required(matches, "email-subject")?,
        email_api_url: matches.get_one::<String>("email-api-url").cloned(),
        email_api_token: matches
            .get_one::<String>("email-api-token")
            .cloned()
            .map(SecretString::from),
        allowed_origins: matches
            .get_many::<String>("allowed-origin")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
    }))
}

fn vault_args(matches: &ArgMatches) -> Result<vault::Args> {
    Ok(vault::Args {
        url: required(matches, "vault-url")?,
        role_id: required(matches, "vault-role-id")?,
        secret_id: matches
            .get_one::<String>("vault-secret-id")
            .cloned()
            .map(SecretString::from),
        wrapped_token: matches
            .get_one::<String>("vault-wrapped-token")
            .cloned()
            .map(SecretString::from),
        db_role: required(matches, "vault-db-role")?,
        transit_mount: required(matches, "vault-transit-mount")?,
        transit_key: required(matches, "vault-transit-key")?,
    })
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}
