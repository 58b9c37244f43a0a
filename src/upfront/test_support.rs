//! In-memory collaborators for unit tests.

use super::{
    email::{EmailMessage, EmailSender},
    identity::{EMAIL_ATTRIBUTE, EMAIL_VERIFIED_ATTRIBUTE, IdentityProvider, NewUser, ProvisionedUser},
    keys::KeyService,
    payment::{CheckoutSession, PaymentGateway, PaymentStatus},
    store::{JobPost, ResourceKey, ResourceStore, Status, format_pk},
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reversible "encryption" tagged with the key name and a counter, so two
/// encryptions of the same plaintext differ like real ciphertexts do.
pub struct FakeKeyService {
    key_name: String,
    sequence: AtomicUsize,
    decrypt_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakeKeyService {
    pub fn new(key_name: &str) -> Self {
        Self {
            key_name: key_name.to_string(),
            sequence: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of tokens minted so far.
    pub fn encrypt_calls(&self) -> usize {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyService for FakeKeyService {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("key service unavailable");
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut ciphertext = format!("fake:{}:{n}:", self.key_name).into_bytes();
        ciphertext.extend_from_slice(plaintext);
        Ok(ciphertext)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("key service unavailable");
        }

        let mut parts = ciphertext.splitn(4, |b| *b == b':');
        let (Some(b"fake"), Some(key), Some(_), Some(plaintext)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("invalid ciphertext");
        };
        if key != self.key_name.as_bytes() {
            bail!("ciphertext was produced by another key");
        }
        Ok(plaintext.to_vec())
    }
}

#[derive(Default)]
pub struct MemoryResourceStore {
    posts: Mutex<HashMap<String, JobPost>>,
    activate_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryResourceStore {
    pub fn insert(&self, post: JobPost) {
        lock(&self.posts).insert(post.pk.clone(), post);
    }

    pub fn post(&self, id: &str) -> Option<JobPost> {
        lock(&self.posts).get(&format_pk(id)).cloned()
    }

    pub fn activate_calls(&self) -> usize {
        self.activate_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("resource store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, id: &str) -> Result<Option<JobPost>> {
        self.check_available()?;
        Ok(self.post(id))
    }

    async fn count_by_owner(&self, owner_email: &str) -> Result<u64> {
        self.check_available()?;
        let count = lock(&self.posts)
            .values()
            .filter(|post| post.login_email.to_lowercase() == owner_email)
            .count();
        Ok(u64::try_from(count)?)
    }

    async fn activate(
        &self,
        key: &ResourceKey,
        updated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<JobPost>> {
        self.check_available()?;
        self.activate_calls.fetch_add(1, Ordering::SeqCst);

        let mut posts = lock(&self.posts);
        let Some(post) = posts.get_mut(&key.pk) else {
            return Ok(None);
        };
        if post.sk != key.sk || post.status != Status::PendingPayment {
            return Ok(None);
        }

        post.status = Status::Active;
        post.updated_at = updated_at;
        post.expires_at = Some(expires_at);
        Ok(Some(post.clone()))
    }
}

#[derive(Default)]
pub struct MemoryIdentityProvider {
    users: Mutex<HashMap<String, ProvisionedUser>>,
    passwords: Mutex<HashMap<String, String>>,
    create_calls: AtomicUsize,
    attribute_writes: AtomicUsize,
    fail_create: AtomicBool,
    fail_password: AtomicBool,
    fail_attribute_update: AtomicBool,
}

impl MemoryIdentityProvider {
    pub fn insert_user(&self, email: &str) {
        let user = ProvisionedUser {
            username: email.to_string(),
            attributes: HashMap::from([
                (EMAIL_ATTRIBUTE.to_string(), email.to_string()),
                (EMAIL_VERIFIED_ATTRIBUTE.to_string(), "true".to_string()),
            ]),
            password_permanent: true,
        };
        lock(&self.users).insert(email.to_string(), user);
    }

    pub fn user(&self, username: &str) -> Option<ProvisionedUser> {
        lock(&self.users).get(username).cloned()
    }

    pub fn user_count(&self) -> usize {
        lock(&self.users).len()
    }

    pub fn password(&self, username: &str) -> Option<String> {
        lock(&self.passwords).get(username).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn attribute_writes(&self) -> usize {
        self.attribute_writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_password(&self, fail: bool) {
        self.fail_password.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_attribute_update(&self, fail: bool) {
        self.fail_attribute_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_user(&self, username: &str) -> Result<Option<ProvisionedUser>> {
        Ok(self.user(username))
    }

    async fn create_user(&self, user: &NewUser) -> Result<bool> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("identity provider unavailable");
        }

        let mut users = lock(&self.users);
        if users.contains_key(&user.username) {
            return Ok(false);
        }
        users.insert(
            user.username.clone(),
            ProvisionedUser {
                username: user.username.clone(),
                attributes: HashMap::from([
                    (EMAIL_ATTRIBUTE.to_string(), user.username.clone()),
                    (
                        EMAIL_VERIFIED_ATTRIBUTE.to_string(),
                        user.email_verified.to_string(),
                    ),
                ]),
                password_permanent: false,
            },
        );
        Ok(true)
    }

    async fn set_permanent_password(&self, username: &str, password: &SecretString) -> Result<()> {
        if self.fail_password.load(Ordering::SeqCst) {
            bail!("identity provider unavailable");
        }
        lock(&self.users)
            .get_mut(username)
            .ok_or_else(|| anyhow!("user {username} not found"))?
            .password_permanent = true;
        lock(&self.passwords).insert(username.to_string(), password.expose_secret().to_string());
        Ok(())
    }

    async fn update_user_attribute(&self, username: &str, name: &str, value: &str) -> Result<()> {
        self.attribute_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_attribute_update.load(Ordering::SeqCst) {
            bail!("identity provider unavailable");
        }
        let mut users = lock(&self.users);
        let user = users
            .get_mut(username)
            .ok_or_else(|| anyhow!("user {username} not found"))?;
        user.attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePaymentGateway {
    sessions: Mutex<HashMap<String, PaymentStatus>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakePaymentGateway {
    pub fn set_status(&self, session_id: &str, status: PaymentStatus) {
        lock(&self.sessions).insert(session_id.to_string(), status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("payment service unavailable");
        }
        let payment_status = lock(&self.sessions)
            .get(session_id)
            .copied()
            .ok_or_else(|| anyhow!("no such checkout session: {session_id}"))?;
        Ok(CheckoutSession {
            id: session_id.to_string(),
            payment_status,
        })
    }
}

#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<EmailMessage> {
        lock(&self.sent).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("mail API rejected message");
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}

/// A pending posting `job/{id}` created at `created_at`.
pub fn pending_post(id: &str, owner: &str, session_id: &str, created_at: DateTime<Utc>) -> JobPost {
    JobPost {
        pk: format_pk(id),
        sk: super::clock::format_timestamp(&created_at),
        job_id: id.to_string(),
        title: "Senior Rust Engineer".to_string(),
        company_name: "Upfront".to_string(),
        login_email: owner.to_string(),
        session_id: session_id.to_string(),
        status: Status::PendingPayment,
        created_at,
        updated_at: created_at,
        expires_at: None,
    }
}
