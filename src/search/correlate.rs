use crate::config::SessionConfig;
use crate::document::SipLeg;
use crate::search::project::project;
use crate::search::CallStream;
use crate::store::{
    CompareOp, DocumentStore, DocumentStream, Filter, TimeRange, SIP_CALL_INDEX,
};
use crate::Result;
use futures::future::BoxFuture;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One logical call under construction: an ordered set of legs keyed by
/// `(created_at, dst_addr)` plus the `(caller, callee)` pairs already used
/// to gate candidate lookups. Built by [`Correlator::correlate`], then
/// frozen once control returns to the outer loop.
pub(crate) struct CorrelatedCall {
    legs: BTreeMap<(i64, String), SipLeg>,
    pairs: HashSet<(String, String)>,
}

impl CorrelatedCall {
    pub(crate) fn new() -> Self {
        CorrelatedCall {
            legs: BTreeMap::new(),
            pairs: HashSet::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.legs.len()
    }

    pub(crate) fn contains(&self, leg: &SipLeg) -> bool {
        self.legs.contains_key(&leg.order_key())
    }

    fn insert(&mut self, leg: SipLeg) {
        self.legs.entry(leg.order_key()).or_insert(leg);
    }

    /// Minimum leg under the `(created_at, dst_addr)` order; the
    /// representative for the projected timestamps and state.
    pub(crate) fn first(&self) -> Option<&SipLeg> {
        self.legs.values().next()
    }

    pub(crate) fn legs(&self) -> impl Iterator<Item = &SipLeg> {
        self.legs.values()
    }
}

pub(crate) struct Correlator {
    store: Arc<dyn DocumentStore>,
    config: SessionConfig,
}

impl Correlator {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        Correlator { store, config }
    }

    /// Grow `call` from `leg` by the three correlation rules, in order:
    /// pair discovery, second sighting of a known pair, cross-call-id
    /// closure. A leg whose pair is known and which is already present (or
    /// no longer fits) is a no-op, which is what breaks recursion cycles.
    pub(crate) fn correlate<'a>(
        &'a self,
        call: &'a mut CorrelatedCall,
        leg: SipLeg,
        processed: &'a HashSet<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pair = (leg.caller.clone(), leg.callee.clone());
            if !call.pairs.contains(&pair) {
                call.pairs.insert(pair);
                let candidates = self.pair_candidates(&leg, processed).await?;
                extend(call, leg, &candidates, &self.config);
                if self.config.use_x_correlation_header {
                    for peer in self.cross_referenced(call, processed).await? {
                        self.correlate(call, peer, processed).await?;
                    }
                }
            } else if call.len() < self.config.max_legs && !call.contains(&leg) {
                call.insert(leg);
                for peer in self.cross_referenced(call, processed).await? {
                    self.correlate(call, peer, processed).await?;
                }
            }
            Ok(())
        })
    }

    /// Legs sharing the caller/callee pair within the aggregation window
    /// around `leg`. Fetched once; `extend` recurses over this single
    /// batch without re-querying.
    async fn pair_candidates(
        &self,
        leg: &SipLeg,
        processed: &HashSet<String>,
    ) -> Result<Vec<SipLeg>> {
        let window = TimeRange::new(
            leg.created_at - self.config.aggregation_timeout,
            leg.created_at + self.config.aggregation_timeout,
        );
        let filter = Filter::all()
            .add(Filter::cmp("caller", CompareOp::Eq, json!(leg.caller)))
            .add(Filter::cmp("callee", CompareOp::Eq, json!(leg.callee)))
            .add(Filter::cmp("created_at", CompareOp::Ge, json!(window.start)))
            .add(Filter::cmp("created_at", CompareOp::Le, json!(window.end)));
        self.fetch_legs(window, &filter, processed).await
    }

    /// Legs whose identifiers touch the call's accumulated call-id /
    /// x-call-id sets, within the aggregation window anchored on the first
    /// leg. When the first leg is still in progress its `created_at`
    /// bounds the window from above.
    async fn cross_referenced(
        &self,
        call: &CorrelatedCall,
        processed: &HashSet<String>,
    ) -> Result<Vec<SipLeg>> {
        let Some(first) = call.first() else {
            return Ok(Vec::new());
        };
        let ids: Vec<Value> = call.legs().map(|l| json!(l.call_id)).collect();
        let xids: Vec<Value> = call
            .legs()
            .filter_map(|l| l.x_call_id.as_ref())
            .map(|x| json!(x))
            .collect();

        let window = TimeRange::new(
            first.created_at - self.config.aggregation_timeout,
            first.terminated_at.unwrap_or(first.created_at) + self.config.aggregation_timeout,
        );
        let identity = if xids.is_empty() {
            Filter::cmp("x_call_id", CompareOp::In, Value::Array(ids))
        } else {
            Filter::any()
                .add(Filter::cmp("x_call_id", CompareOp::In, Value::Array(ids)))
                .add(Filter::cmp(
                    "call_id",
                    CompareOp::In,
                    Value::Array(xids.clone()),
                ))
                .add(Filter::cmp("x_call_id", CompareOp::In, Value::Array(xids)))
        };
        let filter = Filter::all()
            .add(Filter::cmp("created_at", CompareOp::Ge, json!(window.start)))
            .add(Filter::cmp("created_at", CompareOp::Le, json!(window.end)))
            .add(identity);
        self.fetch_legs(window, &filter, processed).await
    }

    async fn fetch_legs(
        &self,
        window: TimeRange,
        filter: &Filter,
        processed: &HashSet<String>,
    ) -> Result<Vec<SipLeg>> {
        let mut docs = self.store.find(SIP_CALL_INDEX, window, filter);
        let mut legs = Vec::new();
        while let Some(item) = docs.next().await {
            match SipLeg::from_document(&item?) {
                Ok(leg) => {
                    if !processed.contains(&leg.call_id) {
                        legs.push(leg);
                    }
                }
                Err(err) => warn!("skipping candidate leg: {}", err),
            }
        }
        Ok(legs)
    }
}

/// Add `leg`, then pull in every candidate adjacent to it in time and
/// topology, recursing over the same batch.
fn extend(call: &mut CorrelatedCall, leg: SipLeg, candidates: &[SipLeg], config: &SessionConfig) {
    if call.len() >= config.max_legs || call.contains(&leg) {
        return;
    }
    let anchor = leg.clone();
    call.insert(leg);
    for candidate in candidates {
        if lifetimes_overlap(&anchor, candidate, config.termination_timeout)
            && endpoints_adjacent(&anchor, candidate)
        {
            extend(call, candidate.clone(), candidates, config);
        }
    }
}

/// With both terminations known, require the lifetimes to overlap; with a
/// call still in progress on either side, fall back to the termination
/// slack on the start times.
fn lifetimes_overlap(left: &SipLeg, right: &SipLeg, termination_timeout: i64) -> bool {
    match (left.terminated_at, right.terminated_at) {
        (Some(left_end), Some(right_end)) => {
            left_end >= right.created_at && left.created_at <= right_end
        }
        _ => (right.created_at - left.created_at).abs() <= termination_timeout,
    }
}

/// Host names take precedence over raw addresses on whichever side carries
/// them; one matching direction is enough.
fn endpoints_adjacent(left: &SipLeg, right: &SipLeg) -> bool {
    let src_match = match &left.src_host {
        Some(src_host) => right.dst_host.as_deref() == Some(src_host.as_str()),
        None => left.src_addr == right.dst_addr,
    };
    let dst_match = match &left.dst_host {
        Some(dst_host) => right.src_host.as_deref() == Some(dst_host.as_str()),
        None => left.dst_addr == right.src_addr,
    };
    src_match || dst_match
}

struct OuterState {
    matched: DocumentStream,
    correlator: Correlator,
    processed: HashSet<String>,
    requested_created_at: i64,
    cancel_token: Option<CancellationToken>,
    done: bool,
}

/// Streaming outer loop: dedup matched documents on call-id, build one
/// correlated call per unprocessed anchor, and emit its projection unless
/// the first leg slipped below the requested lower bound.
pub(crate) fn correlate_stream(
    matched: DocumentStream,
    store: Arc<dyn DocumentStore>,
    config: SessionConfig,
    requested_created_at: i64,
    cancel_token: Option<CancellationToken>,
) -> CallStream {
    let state = OuterState {
        matched,
        correlator: Correlator::new(store, config),
        processed: HashSet::new(),
        requested_created_at,
        cancel_token,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            if st
                .cancel_token
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
            {
                return None;
            }
            let doc = match st.matched.next().await {
                Some(Ok(doc)) => doc,
                Some(Err(err)) => {
                    st.done = true;
                    return Some((Err(err), st));
                }
                None => return None,
            };
            let leg = match SipLeg::from_document(&doc) {
                Ok(leg) => leg,
                Err(err) => {
                    warn!("skipping matched document: {}", err);
                    continue;
                }
            };
            if st.processed.contains(&leg.call_id) {
                continue;
            }

            let mut call = CorrelatedCall::new();
            if let Err(err) = st.correlator.correlate(&mut call, leg, &st.processed).await {
                st.done = true;
                return Some((Err(err), st));
            }
            for leg in call.legs() {
                st.processed.insert(leg.call_id.clone());
            }

            match call.first() {
                Some(first) if first.created_at >= st.requested_created_at => {
                    if let Some(summary) = project(&call) {
                        return Some((Ok(summary), st));
                    }
                }
                // the anchor came from the aggregation window below the
                // user's lower bound; the whole call is discarded
                _ => {}
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leg(call_id: &str, created_at: i64, terminated_at: Option<i64>, src: &str, dst: &str) -> SipLeg {
        SipLeg {
            call_id: call_id.to_string(),
            x_call_id: None,
            caller: "x".to_string(),
            callee: "y".to_string(),
            created_at,
            terminated_at,
            state: "answered".to_string(),
            duration: None,
            error_code: None,
            src_addr: src.to_string(),
            dst_addr: dst.to_string(),
            src_host: None,
            dst_host: None,
        }
    }

    #[test]
    fn test_lifetimes_overlap() {
        let a = leg("a", 1000, Some(2000), "1", "2");
        let b = leg("b", 1500, Some(2500), "2", "3");
        assert!(lifetimes_overlap(&a, &b, 10_000));

        let late = leg("c", 2100, Some(2500), "2", "3");
        assert!(!lifetimes_overlap(&a, &late, 10_000));

        // in-progress legs fall back to the termination slack
        let open = leg("d", 1200, None, "2", "3");
        assert!(lifetimes_overlap(&a, &open, 10_000));
        let far_open = leg("e", 20_000, None, "2", "3");
        assert!(!lifetimes_overlap(&a, &far_open, 10_000));
    }

    #[test]
    fn test_endpoints_adjacent_addr_and_host() {
        let a = leg("a", 1000, Some(2000), "1.1.1.1:5060", "2.2.2.2:5060");
        let b = leg("b", 1500, Some(2500), "2.2.2.2:5060", "3.3.3.3:5060");
        assert!(endpoints_adjacent(&a, &b));

        let unrelated = leg("c", 1500, Some(2500), "8.8.8.8:5060", "9.9.9.9:5060");
        assert!(!endpoints_adjacent(&a, &unrelated));

        // hostnames take precedence over addresses when present
        let mut with_host = a.clone();
        with_host.dst_host = Some("edge.example.com".to_string());
        let mut peer = unrelated.clone();
        peer.src_host = Some("edge.example.com".to_string());
        assert!(endpoints_adjacent(&with_host, &peer));
    }

    #[test]
    fn test_extend_caps_and_dedups() {
        let config = SessionConfig {
            max_legs: 2,
            ..SessionConfig::default()
        };
        let mut call = CorrelatedCall::new();
        let anchor = leg("a", 1000, Some(2000), "1", "2");
        let candidates = vec![
            anchor.clone(),
            leg("b", 1100, Some(2100), "2", "3"),
            leg("c", 1200, Some(2200), "3", "4"),
        ];
        extend(&mut call, anchor, &candidates, &config);
        assert_eq!(call.len(), 2);
        let ids: Vec<_> = call.legs().map(|l| l.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        // re-extending with an already-present leg is a no-op
        extend(&mut call, leg("a", 1000, Some(2000), "1", "2"), &candidates, &config);
        assert_eq!(call.len(), 2);
    }

    #[test]
    fn test_leg_order_is_created_at_then_dst_addr() {
        let config = SessionConfig::default();
        let mut call = CorrelatedCall::new();
        let first = leg("tie-b", 1000, Some(2000), "5", "b");
        let candidates = vec![leg("tie-a", 1000, Some(2000), "b", "a")];
        extend(&mut call, first, &candidates, &config);
        assert_eq!(call.first().unwrap().call_id, "tie-a");
        assert_eq!(
            call.legs().map(|l| l.dst_addr.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn test_correlate_gates_lookups_on_pair() {
        use crate::document::Document;
        use crate::store::MemoryStore;

        let store = MemoryStore::new();
        for (call_id, created_at, src, dst) in
            [("a", 1000_i64, "1", "2"), ("b", 1500, "2", "3")]
        {
            store
                .insert(
                    SIP_CALL_INDEX,
                    created_at,
                    Document::from_value(json!({
                        "call_id": call_id,
                        "caller": "x",
                        "callee": "y",
                        "created_at": created_at,
                        "terminated_at": created_at + 1000,
                        "state": "answered",
                        "src_addr": src,
                        "dst_addr": dst,
                    }))
                    .unwrap(),
                )
                .await
                .unwrap();
        }

        let correlator = Correlator::new(Arc::new(store), SessionConfig::default());
        let mut call = CorrelatedCall::new();
        let processed = HashSet::new();
        correlator
            .correlate(&mut call, leg("a", 1000, Some(2000), "1", "2"), &processed)
            .await
            .unwrap();
        let ids: Vec<_> = call.legs().map(|l| l.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(call.first().unwrap().call_id, "a");
    }
}
