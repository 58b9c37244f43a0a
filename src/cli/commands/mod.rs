pub mod logging;
mod vault;

use crate::upfront::{config::DEFAULT_EMAIL_SUBJECT, payment::DEFAULT_STRIPE_API_URL};
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const PROVISION: &str = "provision";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("upfront")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("UPFRONT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Database connection string. Username/password are injected from Vault DB creds, so they are not required in the DSN.",
                )
                .env("UPFRONT_DSN")
                .required(true),
        )
        .arg(
            Arg::new("stripe-secret-key")
                .long("stripe-secret-key")
                .help("Stripe secret API key, required to serve")
                .env("UPFRONT_STRIPE_SECRET_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("stripe-api-url")
                .long("stripe-api-url")
                .help("Stripe API base URL")
                .env("UPFRONT_STRIPE_API_URL")
                .default_value(DEFAULT_STRIPE_API_URL),
        )
        .arg(
            Arg::new("email-from")
                .long("email-from")
                .help("Sender address of login emails")
                .env("UPFRONT_EMAIL_FROM")
                .default_value("no-reply@upfront.jobs"),
        )
        .arg(
            Arg::new("email-subject")
                .long("email-subject")
                .help("Subject of login emails")
                .env("UPFRONT_EMAIL_SUBJECT")
                .default_value(DEFAULT_EMAIL_SUBJECT),
        )
        .arg(
            Arg::new("email-api-url")
                .long("email-api-url")
                .help("HTTP email API endpoint; login links are only logged when unset")
                .env("UPFRONT_EMAIL_API_URL")
                .requires("email-api-token"),
        )
        .arg(
            Arg::new("email-api-token")
                .long("email-api-token")
                .help("Bearer token for the email API")
                .env("UPFRONT_EMAIL_API_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("allowed-origin")
                .long("allowed-origin")
                .help("Origin allowed to receive magic links, repeat or comma separate; any http(s) origin when unset")
                .env("UPFRONT_ALLOWED_ORIGINS")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .subcommand(
            Command::new(PROVISION)
                .about("Re-run account provisioning for an active job post")
                .arg(
                    Arg::new("resource-id")
                        .long("resource-id")
                        .help("Job id of the active post")
                        .required(true),
                ),
        );

    let command = vault::with_args(command);
    logging::with_args(command)
}
