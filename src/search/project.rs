use crate::search::correlate::CorrelatedCall;
use crate::search::CallSummary;
use std::collections::BTreeSet;

/// Every summary carries the same method label: the engine is
/// INVITE-centric and the `sip.method` query axis is suppressed upstream.
const METHOD_LABEL: &str = "INVITE";

/// Collapse a frozen correlated call into one response record. The first
/// leg in leg-order contributes the timestamps, state, duration and error
/// code; participants and call-ids are unioned across the leg set in leg
/// order.
pub(crate) fn project(call: &CorrelatedCall) -> Option<CallSummary> {
    let first = call.first()?;

    let mut callers: Vec<String> = Vec::new();
    let mut callees: Vec<String> = Vec::new();
    let mut call_ids = BTreeSet::new();
    for leg in call.legs() {
        if !callers.contains(&leg.caller) {
            callers.push(leg.caller.clone());
        }
        if !callees.contains(&leg.callee) {
            callees.push(leg.callee.clone());
        }
        call_ids.insert(leg.call_id.clone());
    }

    Some(CallSummary {
        created_at: first.created_at,
        terminated_at: first.terminated_at,
        method: METHOD_LABEL.to_string(),
        state: first.state.clone(),
        caller: callers.join(" - "),
        callee: callees.join(" - "),
        call_id: call_ids,
        duration: first.duration,
        error_code: first.error_code.clone(),
    })
}
