use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("vault-url")
                .long("vault-url")
                .help("Vault approle login URL, example: https://vault.tld:8200/v1/auth/<approle>/login")
                .env("UPFRONT_VAULT_URL")
                .required(true),
        )
        .arg(
            Arg::new("vault-role-id")
                .long("vault-role-id")
                .help("Vault role id")
                .env("UPFRONT_VAULT_ROLE_ID")
                .required(true),
        )
        .arg(
            Arg::new("vault-secret-id")
                .long("vault-secret-id")
                .help("Vault secret id")
                .env("UPFRONT_VAULT_SECRET_ID")
                .conflicts_with("vault-wrapped-token")
                .required_unless_present("vault-wrapped-token"),
        )
        .arg(
            Arg::new("vault-wrapped-token")
                .long("vault-wrapped-token")
                .help("Vault wrapped token holding the secret id")
                .env("UPFRONT_VAULT_WRAPPED_TOKEN"),
        )
        .arg(
            Arg::new("vault-db-role")
                .long("vault-db-role")
                .help("Vault database secrets engine role used for dynamic credentials")
                .env("UPFRONT_VAULT_DB_ROLE")
                .default_value("upfront"),
        )
        .arg(
            Arg::new("vault-transit-mount")
                .long("vault-transit-mount")
                .help("Vault Transit secrets engine mount path")
                .env("UPFRONT_TRANSIT_MOUNT")
                .default_value("transit/upfront"),
        )
        .arg(
            Arg::new("vault-transit-key")
                .long("vault-transit-key")
                .help("Transit key that seals magic-link tokens")
                .env("UPFRONT_TRANSIT_KEY")
                .default_value("magic-link"),
        )
}
