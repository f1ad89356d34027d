//! Message channel to the kernel
//!
//! [`MessageChannel`] is the seam between the engine and whatever carries
//! requests to the kernel. [`CorrelatedChannel`] implements it over any
//! framed transport: requests go out on an mpsc queue, the transport feeds
//! responses back through [`CorrelatedChannel::dispatch`], and each caller is
//! woken by the response carrying its message id.

use crate::error::ChannelError;
use crate::imports::{InvalidImportMap, StepImportData};
use crate::protocol::{KernelRequest, KernelRequestBody, KernelResponse, ReplayRequest};
use crate::types::{EditRequest, MessageId, Step};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Kernel operations consumed by the engine
///
/// Every call is one round trip and may fail; callers never retry on their
/// own.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Apply an edit, returning the confirmed step
    async fn send_edit(&self, request: EditRequest) -> Result<Step, ChannelError>;

    /// Import recipes of a saved analysis
    async fn get_imports_for_analysis(
        &self,
        analysis_name: &str,
    ) -> Result<Vec<StepImportData>, ChannelError>;

    /// Import recipes of the steps currently applied
    async fn get_imports_for_current_steps(&self) -> Result<Vec<StepImportData>, ChannelError>;

    /// Check recipes against the live environment without applying them
    async fn test_imports(
        &self,
        imports: &[StepImportData],
    ) -> Result<InvalidImportMap, ChannelError>;

    /// Join path components the way the kernel's file system does
    async fn get_path_joined(&self, path_parts: &[String]) -> Result<String, ChannelError>;

    /// Re-execute an analysis with new import recipes, returning the new step list
    async fn replay_analysis(&self, request: ReplayRequest) -> Result<Vec<Step>, ChannelError>;
}

type Pending = DashMap<MessageId, oneshot::Sender<Result<serde_json::Value, ChannelError>>>;

/// Id-correlated channel over a framed transport
#[derive(Debug)]
pub struct CorrelatedChannel {
    outbound: mpsc::Sender<KernelRequest>,
    pending: Pending,
    timeout: Duration,
}

impl CorrelatedChannel {
    /// Create channel writing requests to `outbound`
    #[must_use]
    pub fn new(outbound: mpsc::Sender<KernelRequest>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Deliver a response from the transport
    ///
    /// Returns `false` when no caller is waiting for the id (already timed
    /// out, abandoned, or never sent); the response is dropped.
    pub fn dispatch(&self, response: KernelResponse) -> bool {
        let id = response.id;
        match self.pending.remove(&id) {
            Some((_, waiter)) => waiter.send(response.into_result()).is_ok(),
            None => {
                tracing::warn!(message_id = %id, "dropping response with no waiting request");
                false
            }
        }
    }

    /// Fail every outstanding request with [`ChannelError::Disconnected`]
    pub fn close(&self) {
        let ids: Vec<MessageId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                let _ = waiter.send(Err(ChannelError::Disconnected));
            }
        }
    }

    /// Requests still awaiting a response
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn call(&self, body: KernelRequestBody) -> Result<serde_json::Value, ChannelError> {
        let request = KernelRequest::new(body);
        let id = request.id;
        let kind = request.body.kind();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        tracing::debug!(message_id = %id, kind, "sending kernel request");
        self.outbound
            .send(request)
            .await
            .map_err(|_| ChannelError::Disconnected)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Disconnected),
            Err(_) => {
                let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(message_id = %id, kind, millis, "kernel request timed out");
                Err(ChannelError::Timeout { millis })
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        body: KernelRequestBody,
    ) -> Result<T, ChannelError> {
        let value = self.call(body).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Removes a pending entry when its caller goes away
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[async_trait]
impl MessageChannel for CorrelatedChannel {
    async fn send_edit(&self, request: EditRequest) -> Result<Step, ChannelError> {
        self.call_as(KernelRequestBody::Edit(request)).await
    }

    async fn get_imports_for_analysis(
        &self,
        analysis_name: &str,
    ) -> Result<Vec<StepImportData>, ChannelError> {
        self.call_as(KernelRequestBody::GetImportsForAnalysis {
            analysis_name: analysis_name.to_string(),
        })
        .await
    }

    async fn get_imports_for_current_steps(&self) -> Result<Vec<StepImportData>, ChannelError> {
        self.call_as(KernelRequestBody::GetImportsForCurrentSteps)
            .await
    }

    async fn test_imports(
        &self,
        imports: &[StepImportData],
    ) -> Result<InvalidImportMap, ChannelError> {
        self.call_as(KernelRequestBody::TestImports {
            imports: imports.to_vec(),
        })
        .await
    }

    async fn get_path_joined(&self, path_parts: &[String]) -> Result<String, ChannelError> {
        self.call_as(KernelRequestBody::GetPathJoined {
            path_parts: path_parts.to_vec(),
        })
        .await
    }

    async fn replay_analysis(&self, request: ReplayRequest) -> Result<Vec<Step>, ChannelError> {
        self.call_as(KernelRequestBody::ReplayAnalysis(request))
            .await
    }
}
