use crate::document::Document;
use crate::store::DocumentStream;
use futures::{stream, StreamExt};
use tracing::warn;

struct MergeSource {
    head: Option<(i64, Document)>,
    inner: Option<DocumentStream>,
}

struct MergeState {
    sources: Vec<MergeSource>,
    done: bool,
}

/// K-way merge of ordered document streams by `started_at`.
///
/// One head per source is buffered; the minimum is emitted and that source
/// advanced. Ties favor the earlier source. Documents without a readable
/// `started_at` are skipped; a source error is terminal for the merge.
pub(crate) fn merge_by_started_at(sources: Vec<DocumentStream>) -> DocumentStream {
    let state = MergeState {
        sources: sources
            .into_iter()
            .map(|inner| MergeSource {
                head: None,
                inner: Some(inner),
            })
            .collect(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        for idx in 0..st.sources.len() {
            while st.sources[idx].head.is_none() {
                let item = match st.sources[idx].inner.as_mut() {
                    Some(inner) => inner.next().await,
                    None => break,
                };
                match item {
                    Some(Ok(doc)) => match doc.get_i64("started_at") {
                        Some(started_at) => st.sources[idx].head = Some((started_at, doc)),
                        None => warn!("skipping report without started_at"),
                    },
                    Some(Err(err)) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                    None => st.sources[idx].inner = None,
                }
            }
        }

        let mut best: Option<(usize, i64)> = None;
        for (idx, source) in st.sources.iter().enumerate() {
            if let Some((started_at, _)) = source.head.as_ref() {
                if best.map(|(_, ts)| *started_at < ts).unwrap_or(true) {
                    best = Some((idx, *started_at));
                }
            }
        }

        match best {
            Some((idx, _)) => {
                let (_, doc) = st.sources[idx].head.take().expect("merge head present");
                Some((Ok(doc), st))
            }
            None => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStream;
    use serde_json::json;

    fn source(times: &[i64], tag: &str) -> DocumentStream {
        let docs: Vec<_> = times
            .iter()
            .map(|t| {
                Ok(Document::from_value(json!({"started_at": t, "source": tag})).unwrap())
            })
            .collect();
        Box::pin(stream::iter(docs))
    }

    async fn collect_tagged(merged: DocumentStream) -> Vec<(i64, String)> {
        merged
            .map(|item| {
                let doc = item.unwrap();
                (
                    doc.get_i64("started_at").unwrap(),
                    doc.get_str("source").unwrap().to_string(),
                )
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_merges_in_started_at_order() {
        let merged = merge_by_started_at(vec![
            source(&[1, 4, 9], "a"),
            source(&[2, 3, 10], "b"),
        ]);
        let items = collect_tagged(merged).await;
        let times: Vec<_> = items.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1, 2, 3, 4, 9, 10]);
    }

    #[tokio::test]
    async fn test_ties_favor_earlier_source() {
        let merged = merge_by_started_at(vec![source(&[5], "a"), source(&[5], "b")]);
        let items = collect_tagged(merged).await;
        assert_eq!(items[0].1, "a");
        assert_eq!(items[1].1, "b");
    }

    #[tokio::test]
    async fn test_empty_and_uneven_sources() {
        let merged = merge_by_started_at(vec![source(&[], "a"), source(&[7], "b")]);
        let items = collect_tagged(merged).await;
        assert_eq!(items, vec![(7, "b".to_string())]);

        let merged = merge_by_started_at(Vec::new());
        assert!(collect_tagged(merged).await.is_empty());
    }

    #[tokio::test]
    async fn test_source_error_is_terminal() {
        let failing: DocumentStream = Box::pin(stream::iter(vec![
            Ok(Document::from_value(json!({"started_at": 1})).unwrap()),
            Err(crate::Error::StoreUnavailable("gone".into())),
        ]));
        let mut merged = merge_by_started_at(vec![failing, source(&[2], "b")]);
        assert!(merged.next().await.unwrap().is_ok());
        assert!(merged.next().await.unwrap().is_err());
        assert!(merged.next().await.is_none());
    }
}
