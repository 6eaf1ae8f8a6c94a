// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Request interception between the application and the network.
//!
//! Reads go through the [`CacheTierManager`]. Writes go straight to the
//! network; if the network is unreachable they are parked in the
//! [`OfflineQueue`] for the sync orchestrator to replay later. A reachable
//! server that refuses a write is reported immediately and never queued.

use std::sync::Arc;

use crate::cache::CacheTierManager;
use crate::error::Result;
use crate::queue::{ActionId, OfflineQueue};
use crate::request::{Network, Request, Response};

/// Result of a request passing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A response from the network or the cache.
    Response(Response),
    /// The request was mutating, the network was unavailable, and it was queued.
    Queued { id: ActionId },
}

pub struct RequestPipeline {
    cache: Arc<CacheTierManager>,
    queue: Arc<OfflineQueue>,
    network: Arc<dyn Network>,
}

impl RequestPipeline {
    pub fn new(
        cache: Arc<CacheTierManager>,
        queue: Arc<OfflineQueue>,
        network: Arc<dyn Network>,
    ) -> Self {
        RequestPipeline {
            cache,
            queue,
            network,
        }
    }

    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if !request.method.is_mutating() {
            return self.cache.fetch(request).await.map(FetchOutcome::Response);
        }

        match self.network.send(request).await {
            Ok(resp) if resp.is_success() => Ok(FetchOutcome::Response(resp)),
            Ok(resp) => Err(resp.into_rejection()),
            Err(e) if e.is_transient() => {
                let id = self.queue.enqueue(request)?;
                tracing::info!(id, url = %request.url, "network unavailable, request queued for replay");
                Ok(FetchOutcome::Queued { id })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
