use crate::document::Document;
use crate::sip;
use crate::store::DocumentStore;
use crate::Result;
use serde_json::json;

/// Seed the attribute collections with the descriptors the indexers write
/// in production, so query literals are typed the same way against an
/// embedded store.
pub async fn seed_attributes(store: &dyn DocumentStore) -> Result<()> {
    let descriptors = [
        ("attributes_sip", "sip.caller", "string"),
        ("attributes_sip", "sip.callee", "string"),
        ("attributes_sip", "sip.state", "string"),
        ("attributes_sip", "sip.method", "string"),
        ("attributes_sip", "sip.duration", "integer"),
        ("attributes_sip", "sip.error_code", "string"),
        ("attributes_rtp", "rtp.mos", "float"),
        ("attributes_rtp", "rtp.jitter", "float"),
        ("attributes_rtp", "rtp.packet_loss", "float"),
        ("attributes_rtcp", "rtcp.jitter", "float"),
        ("attributes_rtcp", "rtcp.rtt", "float"),
    ];
    for (collection, name, kind) in descriptors {
        let doc = json!({"name": name, "type": kind});
        store
            .insert(collection, 0, Document::from_value(doc).expect("object literal"))
            .await?;
    }
    Ok(())
}

/// Build a `sip_call_index` document from raw INVITE text plus the
/// transport facts the capture point knows. Returns `None` when the
/// message lacks a Call-ID or parsable From/To.
pub fn invite_leg_document(
    raw: &str,
    created_at: i64,
    state: &str,
    src_addr: &str,
    dst_addr: &str,
) -> Option<Document> {
    let call_id = sip::call_id(raw)?;
    let caller = sip::header_value(raw, "From").and_then(|h| sip::uri_address(&h))?;
    let callee = sip::header_value(raw, "To").and_then(|h| sip::uri_address(&h))?;
    let mut value = json!({
        "call_id": call_id,
        "caller": caller,
        "callee": callee,
        "created_at": created_at,
        "state": state,
        "src_addr": src_addr,
        "dst_addr": dst_addr,
    });
    if let Some(x_call_id) = sip::header_value(raw, "X-Call-ID") {
        value["x_call_id"] = json!(x_call_id);
    }
    Document::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SipLeg;

    const INVITE: &str = "INVITE sip:bob@2.2.2.2 SIP/2.0\r\n\
        Call-ID: leg-1\r\n\
        From: \"Alice\" <sip:alice@1.1.1.1:5060>;tag=a\r\n\
        To: <sip:bob@2.2.2.2>\r\n\
        X-Call-ID: upstream-leg\r\n";

    #[test]
    fn test_invite_leg_document() {
        let doc = invite_leg_document(INVITE, 1000, "ringing", "1.1.1.1:5060", "2.2.2.2:5060")
            .expect("parsable invite");
        let leg = SipLeg::from_document(&doc).expect("complete leg");
        assert_eq!(leg.call_id, "leg-1");
        assert_eq!(leg.caller, "alice@1.1.1.1");
        assert_eq!(leg.callee, "bob@2.2.2.2");
        assert_eq!(leg.x_call_id.as_deref(), Some("upstream-leg"));
        assert_eq!(leg.created_at, 1000);
    }

    #[test]
    fn test_invite_without_call_id() {
        let raw = "INVITE sip:bob@h SIP/2.0\r\nFrom: <sip:a@h>\r\nTo: <sip:b@h>\r\n";
        assert!(invite_leg_document(raw, 0, "ringing", "1:1", "2:2").is_none());
    }
}
