use crate::document::Document;
use crate::store::{CompareOp, DocumentStore, DocumentStream, Filter, TimeRange};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use futures::stream;
use serde_json::Value;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Connection, Row, SqliteConnection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

const SHARD_DB: &str = "index.db";
const SHARD_DATE_FMT: &str = "%Y%m%d";
const DAY_MS: i64 = 86_400_000;

/// Document store over day-sharded SQLite files.
///
/// Layout: `<root>/<yyyymmdd>/index.db`, one table per physical collection,
/// rows holding the JSON body in insertion order. `find` walks the shard
/// directories overlapping the requested range and concatenates per-shard
/// results, buffering at most one shard's batch at a time.
pub struct SqliteStore {
    root: PathBuf,
}

impl SqliteStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(SqliteStore { root })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn find(&self, collection: &str, range: TimeRange, filter: &Filter) -> DocumentStream {
        if !valid_collection_name(collection) {
            let name = collection.to_string();
            return Box::pin(stream::once(async move {
                Err::<Document, _>(Error::InvalidQuery(format!(
                    "invalid collection name '{}'",
                    name
                )))
            }));
        }

        let mut where_sql = String::new();
        let mut binds = Vec::new();
        compile_filter(filter, &mut where_sql, &mut binds);

        let state = FindState {
            root: self.root.clone(),
            range,
            collection: collection.to_string(),
            where_sql,
            binds,
            shards: None,
            batch: Vec::new().into_iter(),
            done: false,
        };

        Box::pin(stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            loop {
                if let Some(doc) = st.batch.next() {
                    return Some((Ok(doc), st));
                }
                if st.shards.is_none() {
                    match shard_dirs_in_range(&st.root, st.range) {
                        Ok(dirs) => st.shards = Some(dirs.into_iter()),
                        Err(err) => {
                            st.done = true;
                            return Some((Err(err), st));
                        }
                    }
                }
                let shard = st.shards.as_mut().and_then(|s| s.next());
                let Some(dir) = shard else {
                    return None;
                };
                match query_shard(&dir, &st.collection, &st.where_sql, &st.binds).await {
                    Ok(docs) => st.batch = docs.into_iter(),
                    Err(err) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                }
            }
        }))
    }

    async fn list_collection_names(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for dir in shard_dirs_in_range(&self.root, TimeRange::all())? {
            let db_path = dir.join(SHARD_DB);
            if !db_path.exists() {
                continue;
            }
            let mut conn =
                SqliteConnection::connect(&format!("sqlite:{}", db_path.to_string_lossy())).await?;
            let rows = sqlx::query(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name LIKE ? AND name NOT LIKE 'sqlite_%'",
            )
            .bind(format!("{}%", prefix))
            .fetch_all(&mut conn)
            .await?;
            for row in rows {
                let name: String = row.get(0);
                names.insert(name);
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn insert(&self, collection: &str, at_ms: i64, document: Document) -> Result<()> {
        if !valid_collection_name(collection) {
            return Err(Error::InvalidQuery(format!(
                "invalid collection name '{}'",
                collection
            )));
        }
        let date = DateTime::from_timestamp_millis(at_ms)
            .ok_or_else(|| Error::InvalidQuery(format!("timestamp out of range: {}", at_ms)))?
            .date_naive();
        let dir = self.root.join(date.format(SHARD_DATE_FMT).to_string());
        std::fs::create_dir_all(&dir)?;

        let mut conn = SqliteConnectOptions::new()
            .filename(dir.join(SHARD_DB))
            .create_if_missing(true)
            .connect()
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)",
            collection
        ))
        .execute(&mut conn)
        .await?;

        let body = serde_json::to_string(&document)
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        sqlx::query(&format!("INSERT INTO {} (body) VALUES (?)", collection))
            .bind(body)
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

struct FindState {
    root: PathBuf,
    range: TimeRange,
    collection: String,
    where_sql: String,
    binds: Vec<Bind>,
    shards: Option<std::vec::IntoIter<PathBuf>>,
    batch: std::vec::IntoIter<Document>,
    done: bool,
}

#[derive(Debug, Clone)]
enum Bind {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

async fn query_shard(
    dir: &Path,
    collection: &str,
    where_sql: &str,
    binds: &[Bind],
) -> Result<Vec<Document>> {
    let db_path = dir.join(SHARD_DB);
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let mut conn =
        SqliteConnection::connect(&format!("sqlite:{}", db_path.to_string_lossy())).await?;

    let present: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(collection)
            .fetch_optional(&mut conn)
            .await?;
    if present.is_none() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT body FROM {} WHERE {} ORDER BY id ASC",
        collection, where_sql
    );
    let mut query = sqlx::query(&sql);
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Float(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
            Bind::Bool(v) => query.bind(*v),
        };
    }
    let rows = query.fetch_all(&mut conn).await?;

    let mut docs = Vec::with_capacity(rows.len());
    for row in rows {
        let body: String = row.get(0);
        match serde_json::from_str::<Document>(&body) {
            Ok(doc) => docs.push(doc),
            Err(err) => {
                warn!(collection, "skipping undecodable document: {}", err);
            }
        }
    }
    Ok(docs)
}

fn shard_dirs_in_range(root: &Path, range: TimeRange) -> Result<Vec<PathBuf>> {
    let mut shards: Vec<(NaiveDate, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(name, SHARD_DATE_FMT) else {
            continue;
        };
        let day_start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        let day_end = day_start + DAY_MS - 1;
        if day_start <= range.end && day_end >= range.start {
            shards.push((date, path));
        }
    }
    shards.sort_by_key(|(date, _)| *date);
    Ok(shards.into_iter().map(|(_, path)| path).collect())
}

fn compile_filter(filter: &Filter, sql: &mut String, binds: &mut Vec<Bind>) {
    match filter {
        Filter::All(terms) => compile_group(terms, " AND ", "1", sql, binds),
        Filter::Any(terms) => compile_group(terms, " OR ", "0", sql, binds),
        Filter::Cmp { field, op, value } => {
            if !valid_field_path(field) {
                sql.push('0');
                return;
            }
            let expr = format!("json_extract(body, '$.{}')", field);
            match op {
                CompareOp::Eq => {
                    sql.push_str(&format!("{} = ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Ne => {
                    sql.push_str(&format!("{} != ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Gt => {
                    sql.push_str(&format!("{} > ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Lt => {
                    sql.push_str(&format!("{} < ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Ge => {
                    sql.push_str(&format!("{} >= ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Le => {
                    sql.push_str(&format!("{} <= ?", expr));
                    binds.push(bind_value(value));
                }
                CompareOp::Contains => {
                    sql.push_str(&format!("instr(COALESCE({}, ''), ?) > 0", expr));
                    binds.push(Bind::Text(
                        value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
                    ));
                }
                CompareOp::In => match value.as_array() {
                    Some(candidates) if !candidates.is_empty() => {
                        let marks = vec!["?"; candidates.len()].join(", ");
                        sql.push_str(&format!("{} IN ({})", expr, marks));
                        for candidate in candidates {
                            binds.push(bind_value(candidate));
                        }
                    }
                    _ => sql.push('0'),
                },
            }
        }
    }
}

fn compile_group(terms: &[Filter], joiner: &str, empty: &str, sql: &mut String, binds: &mut Vec<Bind>) {
    if terms.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            sql.push_str(joiner);
        }
        compile_filter(term, sql, binds);
    }
    sql.push(')');
}

fn bind_value(value: &Value) -> Bind {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Bind::Int(v)
            } else {
                Bind::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Bind::Text(s.clone()),
        Value::Bool(b) => Bind::Bool(*b),
        other => Bind::Text(other.to_string()),
    }
}

fn valid_collection_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_field_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}
