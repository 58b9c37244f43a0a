//! Job postings: the purchasable resources a recruiter owns.

use super::clock;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, FromRow, PgPool};
use std::{fmt, str::FromStr};
use tracing::{Instrument, info_span, instrument};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Status {
    PendingPayment,
    Active,
    Expired,
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PendingPayment",
            Self::Active => "Active",
            Self::Expired => "Expired",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "PendingPayment" => Ok(Self::PendingPayment),
            "Active" => Ok(Self::Active),
            "Expired" => Ok(Self::Expired),
            other => Err(anyhow!("unknown job post status: {other}")),
        }
    }
}

/// Composite key of a posting: owner-scoped partition key plus the creation
/// timestamp as sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceKey {
    pub pk: String,
    pub sk: String,
}

/// Partition key for a job id, `job/{id}`.
#[must_use]
pub fn format_pk(id: &str) -> String {
    format!("job/{id}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPost {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub title: String,
    pub company_name: String,
    pub login_email: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub status: Status,
    #[serde(with = "clock::rfc3339_seconds")]
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[serde(with = "clock::rfc3339_seconds")]
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
    #[serde(
        with = "clock::rfc3339_seconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    #[schema(value_type = Option<String>)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobPost {
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
        }
    }
}

/// Persistent store of job postings.
///
/// Writes are conditional on the composite key; there is no in-process locking.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a posting by its job id.
    async fn get(&self, id: &str) -> Result<Option<JobPost>>;

    /// Number of postings whose (lowercased) login email equals `owner_email`.
    async fn count_by_owner(&self, owner_email: &str) -> Result<u64>;

    /// Move the posting at `key` from `PendingPayment` to `Active`.
    ///
    /// Returns `None` when no row matched (wrong key or not pending any more).
    async fn activate(
        &self,
        key: &ResourceKey,
        updated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<JobPost>>;

    /// Connectivity check used by the health endpoint.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(FromRow)]
struct JobPostRow {
    pk: String,
    sk: String,
    job_id: String,
    title: String,
    company_name: String,
    login_email: String,
    session_id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobPostRow> for JobPost {
    type Error = anyhow::Error;

    fn try_from(row: JobPostRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            pk: row.pk,
            sk: row.sk,
            job_id: row.job_id,
            title: row.title,
            company_name: row.company_name,
            login_email: row.login_email,
            session_id: row.session_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

const JOB_POST_COLUMNS: &str = "pk, sk, job_id, title, company_name, login_email, session_id, \
     status, created_at, updated_at, expires_at";

/// [`ResourceStore`] over the `job_posts` table.
#[derive(Clone, Debug)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<JobPost>> {
        let query = format!("SELECT {JOB_POST_COLUMNS} FROM job_posts WHERE pk = $1 LIMIT 1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query_as::<_, JobPostRow>(&query)
            .bind(format_pk(id))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch job post")?;

        row.map(JobPost::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn count_by_owner(&self, owner_email: &str) -> Result<u64> {
        let query = "SELECT COUNT(*) FROM job_posts WHERE lower(login_email) = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let count: i64 = sqlx::query_scalar(query)
            .bind(owner_email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count job posts by owner")?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn activate(
        &self,
        key: &ResourceKey,
        updated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<JobPost>> {
        let query = format!(
            "UPDATE job_posts \
             SET status = 'Active', updated_at = $3, expires_at = $4 \
             WHERE pk = $1 AND sk = $2 AND status = 'PendingPayment' \
             RETURNING {JOB_POST_COLUMNS}"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = %query
        );
        let row = sqlx::query_as::<_, JobPostRow>(&query)
            .bind(&key.pk)
            .bind(&key.sk)
            .bind(updated_at)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to activate job post")?;

        row.map(JobPost::try_from).transpose()
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}
