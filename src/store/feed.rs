//! JSONL document feed for the in-memory store
//!
//! Each line is one document write:
//!
//! ```text
//! {"op":"set","path":"origin/o1/port/port3/runid/5f3a1b2c/test/ping","data":{"state":"pass"}}
//! {"op":"delete","path":"origin/o1/port/port3"}
//! ```
//!
//! The reader replays the file from the start, then keeps following appended
//! lines (reopening the file when it is rotated).

use super::{MemoryStore, StorePath};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FeedEntry {
    Set { path: String, data: Value },
    Delete { path: String },
}

impl FeedEntry {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Apply this write to the store
    pub fn apply(&self, store: &MemoryStore) {
        match self {
            FeedEntry::Set { path, data } => store.set(&StorePath::parse(path), data.clone()),
            FeedEntry::Delete { path } => store.delete(&StorePath::parse(path)),
        }
    }
}

/// Line reader that follows a growing file
pub struct FeedReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    poll_interval: Duration,
}

impl FeedReader {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            poll_interval,
        }
    }

    /// Open the file at its beginning
    pub async fn open(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            let metadata = file.metadata().await?;
            self.inode = Some(metadata.ino());
        }

        self.file = Some(BufReader::new(file));
        log::info!("📖 Reading feed: {}", self.path.display());
        Ok(())
    }

    /// Next non-empty line, waiting for the file to grow if necessary
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 Feed rotated, reopening: {}", self.path.display());
                self.open().await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Feed not opened",
                ));
            };

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                sleep(self.poll_interval).await;
                continue;
            }

            let line = line.trim();
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }

    async fn detect_rotation(&self) -> std::io::Result<bool> {
        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(&self.path).await?;
            Ok(self.inode.map_or(false, |old| old != metadata.ino()))
        }

        #[cfg(not(unix))]
        {
            Ok(false)
        }
    }
}

/// Background task: replay and follow a feed file into the store
pub async fn feed_task(path: PathBuf, store: Arc<MemoryStore>, poll_interval: Duration) {
    let mut reader = FeedReader::new(path, poll_interval);
    if let Err(e) = reader.open().await {
        log::error!("❌ Failed to open feed: {}", e);
        return;
    }

    let mut applied = 0u64;
    loop {
        match reader.read_line().await {
            Ok(line) => match FeedEntry::parse(&line) {
                Ok(entry) => {
                    entry.apply(&store);
                    applied += 1;
                    log::trace!("Feed entry {} applied", applied);
                }
                Err(e) => log::warn!("⚠️  Skipping malformed feed line ({}): {}", e, line),
            },
            Err(e) => {
                log::error!("❌ Feed read failed after {} entries: {}", applied, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_entries() {
        let set = FeedEntry::parse(r#"{"op":"set","path":"origin/o1","data":{"updated":"x"}}"#).unwrap();
        assert_eq!(
            set,
            FeedEntry::Set {
                path: "origin/o1".to_string(),
                data: json!({"updated": "x"})
            }
        );
        let delete = FeedEntry::parse(r#"{"op":"delete","path":"origin/o1"}"#).unwrap();
        assert_eq!(delete, FeedEntry::Delete { path: "origin/o1".to_string() });
        assert!(FeedEntry::parse(r#"{"op":"merge","path":"origin/o1"}"#).is_err());
    }

    #[tokio::test]
    async fn test_feed_replays_then_follows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("feed.jsonl");

        let mut file = tokio::fs::File::create(&file_path).await.unwrap();
        file.write_all(b"{\"op\":\"set\",\"path\":\"origin/o1\",\"data\":{\"updated\":\"a\"}}\n")
            .await
            .unwrap();
        file.write_all(b"not json\n\n").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let store = Arc::new(MemoryStore::new());
        let task = tokio::spawn(feed_task(
            file_path.clone(),
            store.clone(),
            Duration::from_millis(10),
        ));

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&file_path)
            .await
            .unwrap();
        file.write_all(b"{\"op\":\"set\",\"path\":\"origin/o2\",\"data\":{}}\n")
            .await
            .unwrap();
        file.flush().await.unwrap();
        drop(file);

        let origins = StorePath::parse("origin");
        let mut count = 0;
        for _ in 0..200 {
            count = store.query(&origins, &Default::default()).await.unwrap().len();
            if count == 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(count, 2);
    }
}
