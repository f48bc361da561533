//! Upstream schedule source.
//!
//! The schedule is published as a manifest naming one or more schedule
//! files. [`HttpManifestSource`] fetches it conditionally and merges the
//! files into an [`EventSnapshot`].

pub mod parse;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{StatusCode, Url};

use crate::domain::EventSnapshot;
use crate::error::BackendError;

pub use parse::{Manifest, ScheduleFile, build_snapshot, duration_str};

/// `If-Modified-Since` date layout.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Source of fresh schedule snapshots.
#[async_trait]
pub trait ManifestSource: fmt::Debug + Send + Sync {
    /// Fetches the schedule if it changed after `if_modified_since`.
    ///
    /// Returns `None` when upstream reports no change. The returned snapshot
    /// has no fingerprint; it is assigned when the snapshot is stored.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Upstream`] if the manifest or a schedule file
    /// cannot be fetched or decoded.
    async fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<Option<EventSnapshot>, BackendError>;
}

/// Manifest source over HTTP.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    manifest_url: String,
    utc_offset: FixedOffset,
}

impl HttpManifestSource {
    /// Creates a source for `manifest_url`, computing presentation fields in
    /// `utc_offset` local time.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Upstream`] if the HTTP client cannot be built.
    pub fn new(
        manifest_url: String,
        utc_offset: FixedOffset,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Upstream(format!("http client: {e}")))?;
        Ok(Self {
            client,
            manifest_url,
            utc_offset,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, BackendError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BackendError::Upstream(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Upstream(format!("{url}: {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Upstream(format!("{url}: {e}")))
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(
        &self,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<Option<EventSnapshot>, BackendError> {
        let base = Url::parse(&self.manifest_url)
            .map_err(|e| BackendError::Upstream(format!("manifest url: {e}")))?;

        let mut request = self.client.get(base.clone());
        if let Some(since) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, since.format(HTTP_DATE).to_string());
        }
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Upstream(format!("manifest: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("manifest not modified");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BackendError::Upstream(format!("manifest: {status}")));
        }

        let modified_at = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));
        if let Some(since) = if_modified_since {
            if modified_at <= since {
                tracing::debug!(%modified_at, %since, "manifest unchanged");
                return Ok(None);
            }
        }

        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| BackendError::Upstream(format!("manifest: {e}")))?;

        let mut files = Vec::with_capacity(manifest.data_files.len());
        for name in &manifest.data_files {
            let url = base
                .join(name)
                .map_err(|e| BackendError::Upstream(format!("data file {name}: {e}")))?;
            files.push(self.get_json::<ScheduleFile>(url).await?);
        }
        tracing::info!(files = files.len(), %modified_at, "fetched schedule");

        Ok(Some(build_snapshot(files, self.utc_offset, modified_at)))
    }
}
