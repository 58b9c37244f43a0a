//! # Upfront (magic-link authentication & purchase-gated provisioning)
//!
//! `upfront` is the authentication backend of the Upfront job board. Recruiters
//! never pick a password: they sign in with a one-time link mailed to the
//! address that owns their job postings.
//!
//! ## Sign-in (custom challenge)
//!
//! An identity provider drives a three-step custom challenge and calls back
//! into this service at each step:
//!
//! - **define** decides, from the attempt history, whether to issue a
//!   challenge, succeed, or fail. One wrong or expired answer fails the whole
//!   session; the caller has to request a new link.
//! - **create** copies the pending token into the private challenge parameters.
//! - **verify** decrypts the submitted token and checks its subject and expiry.
//!
//! Tokens are JSON claims encrypted with a Vault transit key and base64 encoded.
//! They expire ten minutes after being issued.
//!
//! ## Provisioning
//!
//! When a checkout session is confirmed as paid, the posting moves from
//! `PendingPayment` to `Active` for 90 days and an account is created for the
//! owner's email, at most once per address.

pub mod cli;
pub mod upfront;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
