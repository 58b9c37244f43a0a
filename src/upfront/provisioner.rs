//! Purchase confirmation: activate a paid posting and make sure its owner
//! has an account.

use super::{
    Error,
    clock,
    config::listing_duration,
    error::Upstream,
    identity::{IdentityProvider, NewUser, normalize_email},
    payment::PaymentGateway,
    store::{JobPost, ResourceStore, Status},
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::{Rng, rngs::OsRng};
use regex::Regex;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const PASSWORD_LENGTH: usize = 32;
const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()_+-=[]{}|";

static RESOURCE_ID_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").ok());

#[must_use]
pub fn valid_resource_id(id: &str) -> bool {
    RESOURCE_ID_RE.as_ref().is_some_and(|re| re.is_match(id))
}

/// Random permanent password from the OS CSPRNG. Nobody ever learns it; it
/// only keeps the account out of the forced-password-change state.
#[must_use]
pub fn generate_password() -> SecretString {
    let password: String = (0..PASSWORD_LENGTH)
        .map(|_| char::from(PASSWORD_CHARSET[OsRng.gen_range(0..PASSWORD_CHARSET.len())]))
        .collect();
    SecretString::from(password)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountOutcome {
    Created,
    /// The account was there but still needed its permanent password.
    Completed,
    AlreadyProvisioned,
}

/// Account half of provisioning; also the operator retry path, which never
/// talks to the payment processor.
#[derive(Clone)]
pub struct AccountProvisioner {
    store: Arc<dyn ResourceStore>,
    identity: Arc<dyn IdentityProvider>,
}

#[derive(Clone)]
pub struct Provisioner {
    payments: Arc<dyn PaymentGateway>,
    accounts: AccountProvisioner,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        payments: Arc<dyn PaymentGateway>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            payments,
            accounts: AccountProvisioner::new(store, identity),
        }
    }

    #[must_use]
    pub fn accounts(&self) -> &AccountProvisioner {
        &self.accounts
    }

    /// Confirm payment for posting `resource_id`, activate it and provision its owner.
    ///
    /// # Errors
    /// [`Error::Validation`], [`Error::NotFound`], [`Error::PaymentRequired`],
    /// [`Error::Conflict`], [`Error::Upstream`], or
    /// [`Error::PartialProvisioning`] when the posting is active but the
    /// account step failed.
    pub async fn confirm_purchase(&self, resource_id: &str) -> Result<JobPost, Error> {
        self.confirm_purchase_at(resource_id, clock::now()).await
    }

    /// # Errors
    /// See [`Provisioner::confirm_purchase`].
    #[instrument(skip(self))]
    pub async fn confirm_purchase_at(
        &self,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<JobPost, Error> {
        let post = self.accounts.fetch(resource_id).await?;

        if post.status == Status::Expired {
            return Err(Error::Conflict(format!("job post {resource_id} has expired")));
        }

        let session = self
            .payments
            .checkout_session(&post.session_id)
            .await
            .map_err(|err| Error::upstream(Upstream::PaymentService, err))?;
        if !session.is_paid() {
            warn!(payment_status = ?session.payment_status, "checkout session not paid");
            return Err(Error::PaymentRequired);
        }

        let post = match post.status {
            Status::PendingPayment => self.activate(resource_id, &post, now).await?,
            _ => {
                info!("job post already active");
                post
            }
        };

        match self.accounts.provision_account(&post.login_email).await {
            Ok(outcome) => {
                info!(outcome = ?outcome, "purchase confirmed");
                Ok(post)
            }
            Err(source) => {
                let owner_email = normalize_email(&post.login_email);
                error!(
                    resource_id,
                    owner_email = %owner_email,
                    error = %source,
                    "job post is active but account provisioning failed"
                );
                Err(Error::PartialProvisioning {
                    resource_id: resource_id.to_string(),
                    owner_email,
                    source,
                })
            }
        }
    }

    async fn activate(
        &self,
        resource_id: &str,
        post: &JobPost,
        now: DateTime<Utc>,
    ) -> Result<JobPost, Error> {
        let activated = self
            .accounts
            .store
            .activate(&post.key(), now, now + listing_duration())
            .await
            .map_err(|err| Error::upstream(Upstream::ResourceStore, err))?;

        if let Some(post) = activated {
            return Ok(post);
        }

        // Lost a race with another confirmation, or the row changed under us.
        match self.accounts.fetch(resource_id).await? {
            current if current.status == Status::Active => Ok(current),
            current => Err(Error::Conflict(format!(
                "job post {resource_id} changed to {} during activation",
                current.status
            ))),
        }
    }

    /// See [`AccountProvisioner::reprovision`].
    ///
    /// # Errors
    /// Same as [`AccountProvisioner::reprovision`].
    pub async fn reprovision(&self, resource_id: &str) -> Result<AccountOutcome, Error> {
        self.accounts.reprovision(resource_id).await
    }
}

impl AccountProvisioner {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    /// Re-run account provisioning for an already active posting, without
    /// touching payment or the posting itself.
    ///
    /// # Errors
    /// [`Error::NotFound`], [`Error::Conflict`] if the posting is not active,
    /// [`Error::Upstream`] if the identity provider fails again.
    #[instrument(skip(self))]
    pub async fn reprovision(&self, resource_id: &str) -> Result<AccountOutcome, Error> {
        let post = self.fetch(resource_id).await?;

        if post.status != Status::Active {
            return Err(Error::Conflict(format!(
                "job post {resource_id} is {}, not Active",
                post.status
            )));
        }

        self.provision_account(&post.login_email)
            .await
            .map_err(|err| Error::upstream(Upstream::IdentityProvider, err))
    }

    /// Create the owner's account unless it already exists.
    ///
    /// # Errors
    /// Returns an error if any identity-provider call fails.
    #[instrument(skip(self))]
    pub async fn provision_account(&self, email: &str) -> anyhow::Result<AccountOutcome> {
        let username = normalize_email(email);

        let created = match self.identity.get_user(&username).await? {
            Some(user) if user.password_permanent => {
                info!(owner_email = %username, "user already exists");
                return Ok(AccountOutcome::AlreadyProvisioned);
            }
            Some(_) => false,
            None => self
                .identity
                .create_user(&NewUser::verified(&username))
                .await
                .context("failed to create user")?,
        };

        self.identity
            .set_permanent_password(&username, &generate_password())
            .await
            .context("failed to set permanent password")?;

        Ok(if created {
            AccountOutcome::Created
        } else {
            AccountOutcome::Completed
        })
    }

    async fn fetch(&self, resource_id: &str) -> Result<JobPost, Error> {
        if !valid_resource_id(resource_id) {
            return Err(Error::Validation(format!("invalid job id: {resource_id}")));
        }

        self.store
            .get(resource_id)
            .await
            .map_err(|err| Error::upstream(Upstream::ResourceStore, err))?
            .ok_or_else(|| Error::NotFound(format!("job post {resource_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upfront::{
        payment::PaymentStatus,
        store::ResourceKey,
        test_support::{
            FakePaymentGateway, MemoryIdentityProvider, MemoryResourceStore, lock, pending_post,
        },
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Duration;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    const OWNER: &str = "Owner@Example.com";
    const OWNER_LOWER: &str = "owner@example.com";

    struct Fixture {
        provisioner: Provisioner,
        store: Arc<MemoryResourceStore>,
        payments: Arc<FakePaymentGateway>,
        identity: Arc<MemoryIdentityProvider>,
        created_at: DateTime<Utc>,
    }

    fn fixture(status: PaymentStatus) -> Fixture {
        let store = Arc::new(MemoryResourceStore::default());
        let payments = Arc::new(FakePaymentGateway::default());
        let identity = Arc::new(MemoryIdentityProvider::default());
        let created_at = clock::now() - Duration::hours(1);

        store.insert(pending_post("123", OWNER, "cs_test_123", created_at));
        payments.set_status("cs_test_123", status);

        Fixture {
            provisioner: Provisioner::new(store.clone(), payments.clone(), identity.clone()),
            store,
            payments,
            identity,
            created_at,
        }
    }

    /// Store where another confirmation wins every activation: the conditional
    /// update matches nothing and the row is left in `after`.
    struct RacingStore {
        post: Mutex<JobPost>,
        after: Status,
    }

    impl RacingStore {
        fn new(post: JobPost, after: Status) -> Self {
            Self {
                post: Mutex::new(post),
                after,
            }
        }
    }

    #[async_trait]
    impl ResourceStore for RacingStore {
        async fn get(&self, _id: &str) -> anyhow::Result<Option<JobPost>> {
            Ok(Some(lock(&self.post).clone()))
        }

        async fn count_by_owner(&self, _owner_email: &str) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn activate(
            &self,
            _key: &ResourceKey,
            updated_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> anyhow::Result<Option<JobPost>> {
            let mut post = lock(&self.post);
            post.status = self.after;
            post.updated_at = updated_at;
            if self.after == Status::Active {
                post.expires_at = Some(expires_at);
            }
            Ok(None)
        }
    }

    fn racing(after: Status) -> (Provisioner, Arc<MemoryIdentityProvider>) {
        let store = Arc::new(RacingStore::new(
            pending_post("123", OWNER, "cs_test_123", clock::now() - Duration::hours(1)),
            after,
        ));
        let payments = Arc::new(FakePaymentGateway::default());
        payments.set_status("cs_test_123", PaymentStatus::Paid);
        let identity = Arc::new(MemoryIdentityProvider::default());
        (
            Provisioner::new(store, payments, identity.clone()),
            identity,
        )
    }

    #[test]
    fn password_shape() {
        let password = generate_password();
        let password = password.expose_secret();
        assert_eq!(password.chars().count(), 32);
        assert!(password.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));
        assert_ne!(password, generate_password().expose_secret());
    }

    #[test]
    fn resource_id_validation() {
        assert!(valid_resource_id("123"));
        assert!(valid_resource_id("01J9Z_abc-def"));
        assert!(!valid_resource_id(""));
        assert!(!valid_resource_id("../123"));
        assert!(!valid_resource_id("job/123"));
        assert!(!valid_resource_id(&"a".repeat(129)));
    }

    #[tokio::test]
    async fn paid_pending_post_is_activated_and_owner_provisioned() -> Result<()> {
        let f = fixture(PaymentStatus::Paid);
        let now = clock::now();

        let post = f.provisioner.confirm_purchase_at("123", now).await?;

        assert_eq!(post.pk, "job/123");
        assert_eq!(post.sk, clock::format_timestamp(&f.created_at));
        assert_eq!(post.status, Status::Active);
        assert_eq!(post.updated_at, now);
        assert_eq!(post.expires_at, Some(now + Duration::days(90)));
        assert_eq!(f.identity.create_calls(), 1);
        assert_eq!(f.identity.user_count(), 1);

        let user = f.identity.user(OWNER_LOWER);
        assert!(user.as_ref().is_some_and(|user| user.password_permanent));
        assert_eq!(
            user.as_ref().and_then(|user| user.attribute("email_verified")),
            Some("true")
        );
        assert_eq!(
            f.identity.password(OWNER_LOWER).map(|p| p.len()),
            Some(32)
        );
        Ok(())
    }

    #[tokio::test]
    async fn confirming_twice_is_idempotent() -> Result<()> {
        let f = fixture(PaymentStatus::Paid);
        let now = clock::now();

        let first = f.provisioner.confirm_purchase_at("123", now).await?;
        let second = f
            .provisioner
            .confirm_purchase_at("123", now + Duration::minutes(5))
            .await?;

        assert_eq!(first, second);
        assert_eq!(f.identity.create_calls(), 1);
        assert_eq!(f.store.activate_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn lost_activation_race_returns_the_active_post() -> Result<()> {
        let (provisioner, identity) = racing(Status::Active);

        let post = provisioner.confirm_purchase("123").await?;

        assert_eq!(post.status, Status::Active);
        assert!(post.expires_at.is_some());
        assert_eq!(identity.create_calls(), 1);
        assert!(
            identity
                .user(OWNER_LOWER)
                .is_some_and(|user| user.password_permanent)
        );
        Ok(())
    }

    #[tokio::test]
    async fn post_expired_during_activation_is_a_conflict() {
        let (provisioner, identity) = racing(Status::Expired);

        let result = provisioner.confirm_purchase("123").await;

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(identity.create_calls(), 0);
    }

    #[tokio::test]
    async fn unpaid_session_mutates_nothing() {
        let f = fixture(PaymentStatus::Unpaid);
        let before = f.store.post("123");

        let result = f.provisioner.confirm_purchase("123").await;

        assert!(matches!(result, Err(Error::PaymentRequired)));
        assert_eq!(f.store.post("123"), before);
        assert_eq!(f.store.activate_calls(), 0);
        assert_eq!(f.identity.create_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_post_is_not_found() {
        let f = fixture(PaymentStatus::Paid);

        let result = f.provisioner.confirm_purchase("999").await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(f.payments.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_id_is_rejected() {
        let f = fixture(PaymentStatus::Paid);

        assert!(matches!(
            f.provisioner.confirm_purchase("../admin").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn expired_post_is_a_conflict() {
        let f = fixture(PaymentStatus::Paid);
        let mut post = pending_post("7", OWNER, "cs_test_123", f.created_at);
        post.status = Status::Expired;
        f.store.insert(post);

        assert!(matches!(
            f.provisioner.confirm_purchase("7").await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(f.payments.calls(), 0);
    }

    #[tokio::test]
    async fn payment_outage_is_upstream() {
        let f = fixture(PaymentStatus::Paid);
        f.payments.set_unavailable(true);

        let result = f.provisioner.confirm_purchase("123").await;

        assert!(matches!(
            result,
            Err(Error::Upstream {
                service: Upstream::PaymentService,
                ..
            })
        ));
        assert_eq!(f.store.activate_calls(), 0);
    }

    #[tokio::test]
    async fn existing_owner_is_not_recreated() -> Result<()> {
        let f = fixture(PaymentStatus::Paid);
        f.identity.insert_user(OWNER_LOWER);

        let post = f.provisioner.confirm_purchase("123").await?;

        assert_eq!(post.status, Status::Active);
        assert_eq!(f.identity.create_calls(), 0);
        assert!(f.identity.password(OWNER_LOWER).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn account_failure_after_activation_is_partial() -> Result<()> {
        let f = fixture(PaymentStatus::Paid);
        f.identity.set_fail_create(true);

        let result = f.provisioner.confirm_purchase("123").await;

        match &result {
            Err(Error::PartialProvisioning {
                resource_id,
                owner_email,
                ..
            }) => {
                assert_eq!(resource_id, "123");
                assert_eq!(owner_email, OWNER_LOWER);
            }
            other => anyhow::bail!("expected partial provisioning, got {other:?}"),
        }
        assert_eq!(
            f.store.post("123").map(|post| post.status),
            Some(Status::Active)
        );
        Ok(())
    }

    #[tokio::test]
    async fn reprovision_finishes_a_partial_account() -> Result<()> {
        let f = fixture(PaymentStatus::Paid);
        f.identity.set_fail_password(true);
        assert!(f.provisioner.confirm_purchase("123").await.is_err());
        assert!(
            f.identity
                .user(OWNER_LOWER)
                .is_some_and(|user| !user.password_permanent)
        );

        f.identity.set_fail_password(false);
        let payment_calls = f.payments.calls();

        let outcome = f.provisioner.reprovision("123").await?;

        assert_eq!(outcome, AccountOutcome::Completed);
        assert_eq!(f.payments.calls(), payment_calls);
        assert_eq!(f.identity.create_calls(), 1);
        assert_eq!(
            f.provisioner.reprovision("123").await?,
            AccountOutcome::AlreadyProvisioned
        );
        Ok(())
    }

    #[tokio::test]
    async fn reprovision_requires_an_active_post() {
        let f = fixture(PaymentStatus::Paid);

        assert!(matches!(
            f.provisioner.reprovision("123").await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(f.identity.create_calls(), 0);
    }
}
