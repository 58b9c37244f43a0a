use crate::{
    cli::actions::vault,
    upfront::{
        self, AppState,
        config::UpfrontConfig,
        email::{EmailSender, HttpEmailSender, LogEmailSender},
        identity::PgIdentityProvider,
        keys::TransitKeyService,
        payment::StripeGateway,
        store::PgResourceStore,
    },
    vault::transit::TransitKey,
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault: vault::Args,
    pub stripe_secret_key: SecretString,
    pub stripe_api_url: String,
    pub email_from: String,
    pub email_subject: String,
    pub email_api_url: Option<String>,
    pub email_api_token: Option<SecretString>,
    pub allowed_origins: Vec<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if Vault login fails, DB credentials cannot be fetched, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let globals = vault::login(&args.vault).await?;
    let dsn = vault::dsn_with_creds(&args.dsn, &globals)?;
    let pool = upfront::connect(&dsn).await?;

    let keys = Arc::new(TransitKeyService::new(
        globals.clone(),
        TransitKey::new(&args.vault.transit_mount, &args.vault.transit_key),
    ));
    let payments = Arc::new(StripeGateway::new(
        &args.stripe_api_url,
        args.stripe_secret_key,
    )?);

    let email: Arc<dyn EmailSender> = match (args.email_api_url, args.email_api_token) {
        (Some(url), Some(token)) => Arc::new(HttpEmailSender::new(url, token)?),
        _ => {
            info!("no email API configured, login links will only be logged");
            Arc::new(LogEmailSender)
        }
    };

    let config = UpfrontConfig::new(args.email_from)
        .with_email_subject(args.email_subject)
        .with_allowed_origins(&args.allowed_origins);

    let state = AppState::new(
        config,
        keys,
        Arc::new(PgResourceStore::new(pool.clone())),
        Arc::new(PgIdentityProvider::new(pool)),
        payments,
        email,
    );

    upfront::new(args.port, &globals, state).await
}

fn log_startup_args(args: &Args) {
    let origins = if args.allowed_origins.is_empty() {
        "any".to_string()
    } else {
        args.allowed_origins.join(", ")
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", vault::redact_dsn(&args.dsn)),
        ("vault_url", args.vault.url.clone()),
        ("vault_role_id", args.vault.role_id.clone()),
        (
            "vault_secret_id_set",
            args.vault.secret_id.is_some().to_string(),
        ),
        (
            "vault_wrapped_token_set",
            args.vault.wrapped_token.is_some().to_string(),
        ),
        ("vault_db_role", args.vault.db_role.clone()),
        (
            "transit_key",
            format!("{}/{}", args.vault.transit_mount, args.vault.transit_key),
        ),
        ("stripe_api_url", args.stripe_api_url.clone()),
        ("email_from", args.email_from.clone()),
        (
            "email_api_url",
            args.email_api_url
                .clone()
                .unwrap_or_else(|| "none (log only)".to_string()),
        ),
        ("allowed_origins", origins),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "upfront {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }
}
