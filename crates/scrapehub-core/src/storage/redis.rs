use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;

use super::{HistoryStore, StorageError, Versioned};
use crate::history::History;
use crate::source::SourceId;

/// Writes `data` and bumps `version` only if the stored version equals
/// ARGV[1]. Returns the new version, or -1 on mismatch.
const COMPARE_AND_SET: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'version') or '0')
if current ~= tonumber(ARGV[1]) then
  return -1
end
redis.call('HSET', KEYS[1], 'version', current + 1, 'data', ARGV[2])
return current + 1
"#;

/// Histories as Redis hashes `{ version, data }`, one key per source.
pub struct RedisHistoryStore {
    pool: Pool,
    prefix: String,
}

impl RedisHistoryStore {
    pub fn new(pool: Pool) -> Self {
        Self::with_prefix(pool, "scrapehub:history")
    }

    pub fn with_prefix(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn history_key(&self, id: &SourceId) -> String {
        format!("{}:{}", self.prefix, id)
    }
}

/// Maps the `HMGET version data` reply onto a stored history.
fn decode_history(
    key: String,
    version: Option<u64>,
    data: Option<String>,
) -> Result<Option<Versioned<History>>, StorageError> {
    match (version, data) {
        (Some(version), Some(data)) => {
            let value = serde_json::from_str(&data).map_err(|e| StorageError::Corrupt {
                key,
                message: e.to_string(),
            })?;
            Ok(Some(Versioned { version, value }))
        }
        (None, None) => Ok(None),
        _ => Err(StorageError::Corrupt {
            key,
            message: "hash is missing its version or data field".to_string(),
        }),
    }
}

fn backend<E: Into<anyhow::Error>>(err: E) -> StorageError {
    StorageError::Backend(err.into())
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn get_history(&self, id: &SourceId) -> Result<Option<Versioned<History>>, StorageError> {
        let mut conn = self.pool.get().await.map_err(backend)?;
        let key = self.history_key(id);

        let (version, data): (Option<u64>, Option<String>) = cmd("HMGET")
            .arg(&key)
            .arg("version")
            .arg("data")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        decode_history(key, version, data)
    }

    async fn put_history(
        &self,
        id: &SourceId,
        history: &History,
        expected: u64,
    ) -> Result<u64, StorageError> {
        let mut conn = self.pool.get().await.map_err(backend)?;
        let key = self.history_key(id);
        let json = serde_json::to_string(history)?;

        let version: i64 = cmd("EVAL")
            .arg(COMPARE_AND_SET)
            .arg(1)
            .arg(&key)
            .arg(expected)
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        if version < 0 {
            return Err(StorageError::Conflict { key, expected });
        }
        Ok(version as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Snapshot;
    use crate::selector::SelectorSet;
    use chrono::{TimeZone, Utc};

    fn stored_history() -> History {
        let mut history = History::new(
            SourceId::from("s1"),
            SelectorSet::new("tr", vec!["td.name".to_string()]).unwrap(),
        );
        let row = [("td.name".to_string(), "Apple".to_string())].into_iter().collect();
        history.push(Snapshot::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            vec![row],
        ));
        history
    }

    #[test]
    fn test_decode_absent_hash() {
        let decoded = decode_history("k".to_string(), None, None).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_stored_history() {
        let history = stored_history();
        let json = serde_json::to_string(&history).unwrap();

        let decoded = decode_history("k".to_string(), Some(3), Some(json))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.value, history);
    }

    #[test]
    fn test_decode_half_written_hash_is_corrupt() {
        let json = serde_json::to_string(&stored_history()).unwrap();

        let err = decode_history("k".to_string(), None, Some(json)).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref key, .. } if key == "k"));

        let err = decode_history("k".to_string(), Some(1), None).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_bad_json_is_corrupt() {
        let err = decode_history("k".to_string(), Some(1), Some("{not json".to_string()))
            .unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
