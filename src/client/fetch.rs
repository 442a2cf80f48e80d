//! # Result Fetcher
//!
//! Downloads the finished artifact once the poller reported `Ready`. A non-2xx
//! reply or an empty body is final: retrying would contradict the `Ready`
//! signal, and an empty artifact must never be reported as success.

use log::info;

use crate::client::submit::JobHandle;
use crate::client::transport::{HttpCall, Transport};
use crate::client::Artifact;
use crate::common::config::RelayConfig;
use crate::common::error::{RelayError, Stage};

pub struct ResultFetcher<'a> {
    transport: &'a Transport,
    config: &'a RelayConfig,
}

impl<'a> ResultFetcher<'a> {
    pub fn new(transport: &'a Transport, config: &'a RelayConfig) -> Self {
        Self { transport, config }
    }

    pub async fn fetch(&self, handle: &JobHandle) -> Result<Artifact, RelayError> {
        let call = HttpCall::get(
            Stage::Download,
            self.config.download_url(handle.as_str()),
            self.config.download_timeouts(),
        );
        let reply = self
            .transport
            .call(call)
            .await
            .map_err(|e| RelayError::transport(Stage::Download, e))?;

        if !reply.status.is_success() {
            return Err(RelayError::FetchFailure(format!(
                "download of job {} returned {}: {}",
                handle,
                reply.status,
                reply.snippet()
            )));
        }
        if reply.body.is_empty() {
            return Err(RelayError::FetchFailure(format!(
                "download of job {handle} returned an empty body after ready status"
            )));
        }

        info!("📦 Fetched result for job {} ({} bytes)", handle, reply.body.len());
        Ok(reply.body)
    }
}
