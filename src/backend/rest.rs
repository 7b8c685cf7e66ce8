use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{BackendError, RemoteBackend};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};

const MAX_RETRIES: u32 = 3;
const BACKOFF_MILLIS: &[u64] = &[500, 1_000, 2_000];

/// PostgREST-style HTTP backend (`/rest/v1/{table}`), as exposed by
/// Supabase and similar backend-as-a-service hosts.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, kind: RecordKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table())
    }

    async fn send_upsert(&self, record: &Record) -> std::result::Result<Record, BackendError> {
        let response = self
            .client
            .post(self.table_url(record.kind()))
            .query(&[("on_conflict", "id")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[record])
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut rows: Vec<Record> = response.json().await?;
        rows.pop()
            .ok_or_else(|| BackendError::Decode("upsert returned no rows".into()))
    }

    async fn send_delete(
        &self,
        kind: RecordKind,
        id: Uuid,
    ) -> std::result::Result<(), BackendError> {
        let filter = format!("eq.{id}");
        let response = self
            .client
            .delete(self.table_url(kind))
            .query(&[("id", filter.as_str())])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn upsert(&self, record: &Record) -> std::result::Result<Record, BackendError> {
        retry_throttled(|| self.send_upsert(record)).await
    }

    async fn delete(&self, kind: RecordKind, id: Uuid) -> std::result::Result<(), BackendError> {
        retry_throttled(|| self.send_delete(kind, id)).await
    }
}

async fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Backoff before retry `attempt` (0-based).
fn backoff(attempt: u32) -> Duration {
    let millis = BACKOFF_MILLIS
        .get(attempt as usize)
        .copied()
        .unwrap_or(2_000);
    Duration::from_millis(millis)
}

/// Re-run `op` while the backend answers 429/503, up to `MAX_RETRIES` times.
async fn retry_throttled<T, F, Fut>(mut op: F) -> std::result::Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BackendError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(e) if e.is_throttled() && attempt < MAX_RETRIES => {
                let wait = backoff(attempt);
                log::warn!(
                    "Backend throttled ({e}). Waiting {}ms before retry {}/{MAX_RETRIES}",
                    wait.as_millis(),
                    attempt + 1
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            result => break result,
        }
    }
}
