mod correlate;
mod merge;
mod project;
mod scanner;

use crate::attributes;
use crate::config::SessionConfig;
use crate::query::{self, Domain};
use crate::store::DocumentStore;
use crate::{Error, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Search window and free-text query; timestamps are milliseconds since
/// epoch with `terminated_at >= created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub created_at: i64,
    pub terminated_at: i64,
    #[serde(default)]
    pub query: String,
}

/// One correlated call, projected from its leg set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<i64>,
    pub method: String,
    pub state: String,
    pub caller: String,
    pub callee: String,
    pub call_id: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

pub type CallStream = Pin<Box<dyn Stream<Item = Result<CallSummary>> + Send>>;

/// Entry point for correlated-call searches. One instance serves many
/// sequential or concurrent searches; each search is an independent
/// pull-based stream.
pub struct SessionSearch {
    store: Arc<dyn DocumentStore>,
    config: SessionConfig,
    cancel_token: Option<CancellationToken>,
}

impl SessionSearch {
    pub fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        SessionSearch {
            store,
            config,
            cancel_token: None,
        }
    }

    /// Cancelling the token ends every stream created afterwards, silently.
    /// Dropping a stream cancels its in-flight store reads either way.
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<CallStream> {
        if request.terminated_at < request.created_at {
            return Err(Error::InvalidQuery(format!(
                "window end {} precedes start {}",
                request.terminated_at, request.created_at
            )));
        }

        let catalog = attributes::cached(self.store.as_ref()).await?;
        let predicates = query::parse(&request.query, &catalog);
        let media_query = predicates
            .iter()
            .any(|p| matches!(p.domain(), Domain::Rtp | Domain::Rtcp));
        debug!(
            predicates = predicates.len(),
            media_query, "resolved search query"
        );

        let matched = if media_query {
            scanner::scan_rtpr_index(
                &self.store,
                request.created_at,
                request.terminated_at,
                &predicates,
                self.config.aggregation_timeout,
            )
        } else {
            scanner::scan_sip_index(
                &self.store,
                request.created_at,
                request.terminated_at,
                &predicates,
            )
        };

        Ok(correlate::correlate_stream(
            matched,
            self.store.clone(),
            self.config.clone(),
            request.created_at,
            self.cancel_token.clone(),
        ))
    }
}
