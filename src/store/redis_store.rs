use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{segments, ChangeCallback, Patch, PatchValue, Snapshot, Store, Subscription};
use crate::error::StoreError;

const APPLY_SCRIPT: &str = r#"
local channel_prefix = ARGV[1]
local docs = {}
for i = 1, #KEYS do
  local raw = redis.call('GET', KEYS[i])
  if raw then docs[i] = cjson.decode(raw) else docs[i] = cjson.null end
end
local i = 2
while i <= #ARGV do
  local k = tonumber(ARGV[i])
  local path = ARGV[i + 1]
  local raw = ARGV[i + 2]
  local value = cjson.null
  if raw ~= '' then value = cjson.decode(raw) end
  if path == '' then
    docs[k] = value
  else
    if type(docs[k]) ~= 'table' then docs[k] = {} end
    local node = docs[k]
    local segs = {}
    for s in string.gmatch(path, '[^/]+') do table.insert(segs, s) end
    for j = 1, #segs - 1 do
      if type(node[segs[j]]) ~= 'table' then node[segs[j]] = {} end
      node = node[segs[j]]
    end
    if value == cjson.null then node[segs[#segs]] = nil else node[segs[#segs]] = value end
  end
  i = i + 3
end
for k = 1, #KEYS do
  if docs[k] == cjson.null or (type(docs[k]) == 'table' and next(docs[k]) == nil) then
    redis.call('DEL', KEYS[k])
  else
    redis.call('SET', KEYS[k], cjson.encode(docs[k]))
  end
  redis.call('PUBLISH', channel_prefix .. KEYS[k], '1')
end
return #KEYS
"#;

// Lua's cjson can't tell an empty array from an empty object and writes
// both back as `{}`, so empty arrays are stored as this string instead.
const EMPTY_ARRAY_MARKER: &str = "\u{1}[]";

/// Cheaply cloneable: every clone shares the same multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    namespace: String,
    script: Arc<redis::Script>,
}

// ─── Key layout ──────────────────────────────────────────────────

/// Where a path lands: which record document, and where inside it.
#[derive(Debug, PartialEq)]
struct Location {
    record_key: String,
    inner: Vec<String>,
}

fn locate(namespace: &str, path: &str) -> Result<Location, StoreError> {
    let segs = segments(path);
    if segs.len() < 2 {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "expected at least <collection>/<id>".into(),
        });
    }
    Ok(Location {
        record_key: format!("{}:{}/{}", namespace, segs[0], segs[1]),
        inner: segs[2..].iter().map(|s| s.to_string()).collect(),
    })
}

fn channel_prefix(namespace: &str) -> String {
    format!("{namespace}:changes:")
}

/// KEYS and ARGV for one `APPLY_SCRIPT` call.
///
/// Each touched record appears once in KEYS, in first-touch order. ARGV is
/// the channel prefix followed by `(key index, inner path, json)` triples;
/// an empty json string deletes.
#[derive(Debug, PartialEq)]
struct ScriptArgs {
    keys: Vec<String>,
    args: Vec<String>,
}

fn script_args(
    namespace: &str,
    entries: Vec<(String, Option<Value>)>,
) -> Result<ScriptArgs, StoreError> {
    let mut index_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut keys: Vec<String> = Vec::new();
    let mut args: Vec<String> = vec![channel_prefix(namespace)];
    for (path, value) in entries {
        let loc = locate(namespace, &path)?;
        let index = match index_of.get(&loc.record_key) {
            Some(i) => *i,
            None => {
                keys.push(loc.record_key.clone());
                index_of.insert(loc.record_key, keys.len());
                keys.len()
            }
        };
        args.push(index.to_string());
        args.push(loc.inner.join("/"));
        args.push(match value {
            Some(v) if !v.is_null() => serde_json::to_string(&mark_empty_arrays(v))?,
            _ => String::new(),
        });
    }
    Ok(ScriptArgs { keys, args })
}

fn mark_empty_arrays(value: Value) -> Value {
    match value {
        Value::Array(items) if items.is_empty() => Value::String(EMPTY_ARRAY_MARKER.into()),
        Value::Array(items) => Value::Array(items.into_iter().map(mark_empty_arrays).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, mark_empty_arrays(v)))
                .collect(),
        ),
        other => other,
    }
}

fn unmark_empty_arrays(value: Value) -> Value {
    match value {
        Value::String(s) if s == EMPTY_ARRAY_MARKER => Value::Array(Vec::new()),
        Value::Array(items) => Value::Array(items.into_iter().map(unmark_empty_arrays).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, unmark_empty_arrays(v)))
                .collect(),
        ),
        other => other,
    }
}

// ─── Store ───────────────────────────────────────────────────────

impl RedisStore {
    /// Opens a `ConnectionManager` that auto-reconnects on failure.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            namespace: namespace.to_string(),
            script: Arc::new(redis::Script::new(APPLY_SCRIPT)),
        })
    }

    async fn apply(&self, entries: Vec<(String, Option<Value>)>) -> Result<(), StoreError> {
        let ScriptArgs { keys, args } = script_args(&self.namespace, entries)?;

        let mut invocation = self.script.prepare_invoke();
        for key in &keys {
            invocation.key(key);
        }
        for arg in &args {
            invocation.arg(arg);
        }
        let mut conn = self.conn.clone();
        let touched: i64 = invocation.invoke_async(&mut conn).await?;
        debug!(touched, "applied patch");
        Ok(())
    }

    async fn read_record(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => Ok(Some(unmark_empty_arrays(serde_json::from_str(&s)?))),
            None => Ok(None),
        }
    }

    /// Whole collection: every `<collection>/<id>` document keyed by id.
    async fn read_collection(&self, collection: &str) -> Result<Snapshot, StoreError> {
        let prefix = format!("{}:{}/", self.namespace, collection);
        let mut conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{prefix}*"))
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut map = Map::new();
        for key in keys {
            if let Some(value) = self.read_record(&key).await? {
                let id = key.trim_start_matches(prefix.as_str()).to_string();
                map.insert(id, value);
            }
        }
        if map.is_empty() {
            Ok(Snapshot::new(None))
        } else {
            Ok(Snapshot::new(Some(Value::Object(map))))
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.apply(vec![(path.to_string(), Some(value))]).await
    }

    async fn update(&self, path: &str, patch: Patch) -> Result<(), StoreError> {
        let entries = patch
            .absolute(path)
            .into_iter()
            .map(|(p, v)| match v {
                PatchValue::Set(v) => (p, Some(v)),
                PatchValue::Delete => (p, None),
            })
            .collect();
        self.apply(entries).await
    }

    async fn read(&self, path: &str) -> Result<Snapshot, StoreError> {
        let segs = segments(path);
        if segs.len() == 1 {
            return self.read_collection(segs[0]).await;
        }
        let loc = locate(&self.namespace, path)?;
        let mut value = self.read_record(&loc.record_key).await?;
        for seg in &loc.inner {
            value = value.and_then(|v| match v {
                Value::Object(mut m) => m.remove(seg.as_str()),
                _ => None,
            });
        }
        Ok(Snapshot::new(value))
    }

    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError> {
        let loc = locate(&self.namespace, path)?;
        let channel = format!("{}{}", channel_prefix(&self.namespace), loc.record_key);

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        let mut messages = Box::pin(pubsub.into_on_message());

        // Attach fires once with the current value.
        on_change(&self.read(path).await?);

        let store = self.clone();
        let path = path.to_string();
        let task = tokio::spawn(async move {
            while messages.next().await.is_some() {
                match store.read(&path).await {
                    Ok(snapshot) => on_change(&snapshot),
                    Err(e) => warn!(path = %path, error = %e, "subscription read failed"),
                }
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }
}
