use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

/// Vault settings shared by every action that touches the database.
#[derive(Debug, Clone)]
pub struct Args {
    pub url: String,
    pub role_id: String,
    pub secret_id: Option<SecretString>,
    pub wrapped_token: Option<SecretString>,
    pub db_role: String,
    pub transit_mount: String,
    pub transit_key: String,
}

impl Args {
    #[must_use]
    pub fn db_creds_path(&self) -> String {
        format!("/v1/database/creds/{}", self.db_role.trim_matches('/'))
    }
}

/// Log in with `AppRole` and fetch dynamic database credentials.
/// # Errors
/// Returns an error if the login or the credentials request fails.
pub async fn login(args: &Args) -> Result<GlobalArgs> {
    let mut globals = GlobalArgs::new(args.url.clone());

    // A wrapped token holds the secret id; otherwise use it directly.
    let secret_id = match (&args.wrapped_token, &args.secret_id) {
        (Some(wrapped), _) => {
            SecretString::from(vault::unwrap(&globals.vault_url, wrapped.expose_secret()).await?)
        }
        (None, Some(secret_id)) => secret_id.clone(),
        (None, None) => return Err(anyhow!("Vault secret-id or wrapped token is required")),
    };

    let (token, _) =
        vault::approle_login(&globals.vault_url, secret_id.expose_secret(), &args.role_id).await?;
    globals.set_token(SecretString::from(token));

    vault::database::database_creds(&mut globals, &args.db_creds_path())
        .await
        .context("Could not get database username and password")?;

    debug!("Global args: {:?}", globals);

    Ok(globals)
}

/// Inject the Vault database credentials into `dsn`.
/// # Errors
/// Returns an error if `dsn` is not a valid URL or cannot carry credentials.
pub fn dsn_with_creds(dsn: &str, globals: &GlobalArgs) -> Result<String> {
    let mut dsn = Url::parse(dsn)?;

    dsn.set_username(&globals.vault_db_username)
        .map_err(|()| anyhow!("Error setting username"))?;

    dsn.set_password(Some(globals.vault_db_password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(dsn.to_string())
}

#[must_use]
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}
