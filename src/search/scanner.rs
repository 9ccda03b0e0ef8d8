use crate::document::RtprReport;
use crate::query::{Domain, Predicate};
use crate::search::merge::merge_by_started_at;
use crate::store::{
    CompareOp, DocumentStore, DocumentStream, Filter, TimeRange, RTPR_RTCP_INDEX, RTPR_RTP_INDEX,
    SIP_CALL_INDEX,
};
use futures::{stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Resolve a SIP-only query to a stream of matching `sip_call_index`
/// documents: window on `created_at` plus every predicate that is not a
/// media-metric one. The `sip.method` axis is ignored here; method
/// filtering happens downstream through the fixed projection label.
pub(crate) fn scan_sip_index(
    store: &Arc<dyn DocumentStore>,
    created_at: i64,
    terminated_at: i64,
    predicates: &[Predicate],
) -> DocumentStream {
    let mut filter = Filter::all()
        .add(Filter::cmp("created_at", CompareOp::Ge, json!(created_at)))
        .add(Filter::cmp("created_at", CompareOp::Le, json!(terminated_at)));
    for predicate in predicates {
        if matches!(predicate.domain(), Domain::Rtp | Domain::Rtcp) || predicate.is_method_axis() {
            continue;
        }
        filter = filter.add(predicate.to_filter());
    }
    store.find(
        SIP_CALL_INDEX,
        TimeRange::new(created_at, terminated_at),
        &filter,
    )
}

/// Resolve a media-metric query: scan the report indexes referenced by the
/// query, merge them by `started_at`, then join each report back to its
/// SIP leg via `call_id` within the aggregation window.
pub(crate) fn scan_rtpr_index(
    store: &Arc<dyn DocumentStore>,
    created_at: i64,
    terminated_at: i64,
    predicates: &[Predicate],
    aggregation_timeout: i64,
) -> DocumentStream {
    let mut collections = Vec::new();
    if predicates.iter().any(|p| p.domain() == Domain::Rtp) {
        collections.push(RTPR_RTP_INDEX);
    }
    if predicates.iter().any(|p| p.domain() == Domain::Rtcp) {
        collections.push(RTPR_RTCP_INDEX);
    }

    let sources: Vec<DocumentStream> = collections
        .into_iter()
        .map(|collection| {
            let mut filter = Filter::all()
                .add(Filter::cmp("started_at", CompareOp::Ge, json!(created_at)))
                .add(Filter::cmp("started_at", CompareOp::Le, json!(terminated_at)));
            for predicate in predicates {
                if predicate.domain() == Domain::Sip {
                    continue;
                }
                filter = filter.add(predicate.to_filter());
            }
            store.find(
                collection,
                TimeRange::new(created_at, terminated_at),
                &filter,
            )
        })
        .collect();

    join_reports_to_legs(store.clone(), merge_by_started_at(sources), aggregation_timeout)
}

struct JoinState {
    reports: DocumentStream,
    store: Arc<dyn DocumentStore>,
    aggregation_timeout: i64,
    done: bool,
}

/// For each report with a `call_id`, take the first SIP leg with that
/// call-id created within `[started_at - aggregation_timeout, started_at]`;
/// reports without a match are dropped.
fn join_reports_to_legs(
    store: Arc<dyn DocumentStore>,
    reports: DocumentStream,
    aggregation_timeout: i64,
) -> DocumentStream {
    let state = JoinState {
        reports,
        store,
        aggregation_timeout,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            let report_doc = match st.reports.next().await {
                Some(Ok(doc)) => doc,
                Some(Err(err)) => {
                    st.done = true;
                    return Some((Err(err), st));
                }
                None => return None,
            };
            let report = match RtprReport::from_document(&report_doc) {
                Ok(report) => report,
                Err(err) => {
                    warn!("skipping report: {}", err);
                    continue;
                }
            };
            let Some(call_id) = report.call_id else {
                continue;
            };

            let window = TimeRange::new(
                report.started_at - st.aggregation_timeout,
                report.started_at,
            );
            let filter = Filter::all()
                .add(Filter::cmp("call_id", CompareOp::Eq, json!(call_id)))
                .add(Filter::cmp("created_at", CompareOp::Ge, json!(window.start)))
                .add(Filter::cmp("created_at", CompareOp::Le, json!(window.end)));
            let mut legs = st.store.find(SIP_CALL_INDEX, window, &filter);
            match legs.next().await {
                Some(Ok(leg)) => return Some((Ok(leg), st)),
                Some(Err(err)) => {
                    st.done = true;
                    return Some((Err(err), st));
                }
                None => continue,
            }
        }
    }))
}
