//! Test utilities for courier.
//!
//! Provides fakes, test data factories, and a temporary directory helper
//! for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier::test_utils::*;
//!
//! let dispatcher = ScriptedDispatcher::always(ScriptedReply::Deliver);
//! let kv = make_test_kv();
//! let dir = TestDir::new();
//! dir.create_file("config.toml", &make_test_config_toml("http://127.0.0.1:1"));
//! ```

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::core::dispatch::{
    Delivery, DeliveryReceipt, Dispatch, DispatchAttempt, DispatchFailure, DispatchOutcome,
    FailureKind, ResponseBody,
};
use crate::core::mode::DispatchPath;
use crate::core::models::{ChatMessage, ChatRequest};
use crate::error::{CourierError, Result};
use crate::storage::kv::{KvStore, MemoryKvStore};

// =============================================================================
// Test Data Factories
// =============================================================================

/// A one-message user request.
#[must_use]
pub fn make_test_request(text: &str) -> ChatRequest {
    ChatRequest::new(vec![ChatMessage::user(text)])
}

/// Fresh in-memory store behind the trait object the components take.
#[must_use]
pub fn make_test_kv() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::new())
}

/// A delivery over `path` with an in-memory body.
#[must_use]
pub fn make_test_delivery(path: DispatchPath, body: &str) -> Delivery {
    let now = Utc::now();
    Delivery {
        receipt: DeliveryReceipt {
            path,
            provider: None,
            model: None,
            started_at: now,
            elapsed_ms: 1,
            attempts: vec![DispatchAttempt {
                path,
                provider: None,
                model: None,
                started_at: now,
                duration_ms: 1,
                success: true,
                status: Some(200),
                kind: None,
                error: None,
                retry_after_secs: None,
            }],
        },
        body: ResponseBody::from_bytes(body.as_bytes().to_vec()),
    }
}

/// A combined failure with one attempt per kind (shared first, then direct).
#[must_use]
pub fn make_test_failure(kinds: &[FailureKind]) -> DispatchFailure {
    let now = Utc::now();
    let attempts = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| DispatchAttempt {
            path: if i == 0 && *kind == FailureKind::Unreachable {
                DispatchPath::Shared
            } else {
                DispatchPath::Direct
            },
            provider: None,
            model: None,
            started_at: now,
            duration_ms: 1,
            success: false,
            status: None,
            kind: Some(*kind),
            error: Some(kind.to_string()),
            retry_after_secs: None,
        })
        .collect();
    DispatchFailure {
        started_at: now,
        elapsed_ms: 1,
        attempts,
    }
}

/// Config TOML pointing the shared backend at `shared_url`.
#[must_use]
pub fn make_test_config_toml(shared_url: &str) -> String {
    format!(
        r#"[general]
log_level = "debug"

[shared]
base_url = "{shared_url}"
probe_timeout_ms = 500
chat_timeout_secs = 2
reachability_ttl_ms = 5000

[direct]
timeout_secs = 2

[queue]
max_retries = 3
"#
    )
}

// =============================================================================
// Scripted Dispatcher
// =============================================================================

/// One canned dispatch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Deliver,
    MustQueue,
    Fail(Vec<FailureKind>),
}

impl ScriptedReply {
    /// Shared backend down, no direct path.
    #[must_use]
    pub fn fail_unreachable() -> Self {
        Self::Fail(vec![FailureKind::Unreachable])
    }

    fn outcome(&self) -> DispatchOutcome {
        match self {
            Self::Deliver => {
                DispatchOutcome::Delivered(make_test_delivery(DispatchPath::Shared, "ok"))
            }
            Self::MustQueue => DispatchOutcome::MustQueue,
            Self::Fail(kinds) => DispatchOutcome::Failed(make_test_failure(kinds)),
        }
    }
}

/// [`Dispatch`] fake that replays a script and records every request.
///
/// When the script runs out, the last reply repeats.
#[derive(Debug)]
pub struct ScriptedDispatcher {
    script: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<ScriptedReply>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedDispatcher {
    /// # Panics
    ///
    /// Panics if `script` is empty.
    #[must_use]
    pub fn new(script: Vec<ScriptedReply>) -> Self {
        let last = script.last().cloned().expect("script must not be empty");
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same reply forever.
    #[must_use]
    pub fn always(reply: ScriptedReply) -> Self {
        Self::new(vec![reply])
    }

    /// Requests seen so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatcher {
    async fn send(&self, request: &ChatRequest) -> DispatchOutcome {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.lock().expect("last lock") = reply.clone();
                reply
            }
            None => self.last.lock().expect("last lock").clone(),
        };
        reply.outcome()
    }
}

// =============================================================================
// Failing Store
// =============================================================================

/// In-memory store whose writes start failing after a fixed number succeed.
#[derive(Debug, Default)]
pub struct FailingKvStore {
    inner: MemoryKvStore,
    writes_left: Mutex<usize>,
}

impl FailingKvStore {
    /// Allow `writes` successful `put`/`remove` calls, then fail every write.
    #[must_use]
    pub fn after(writes: usize) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            writes_left: Mutex::new(writes),
        }
    }

    /// Seed a value without spending the write budget.
    #[must_use]
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        Self {
            inner: self.inner.with_entry(key, value),
            writes_left: self.writes_left,
        }
    }

    fn spend(&self, key: &str) -> Result<()> {
        let mut left = self
            .writes_left
            .lock()
            .map_err(|_| CourierError::Storage("budget lock poisoned".to_string()))?;
        if *left == 0 {
            return Err(CourierError::Storage(format!("write {key}: disk full")));
        }
        *left -= 1;
        Ok(())
    }
}

impl KvStore for FailingKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.spend(key)?;
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.spend(key)?;
        self.inner.remove(key)
    }
}

// =============================================================================
// Temporary Directory Helper
// =============================================================================

/// An isolated temporary directory, removed on drop.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with the given content, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_dispatcher_repeats_last_reply() {
        let dispatcher = ScriptedDispatcher::new(vec![
            ScriptedReply::MustQueue,
            ScriptedReply::Deliver,
        ]);
        let request = make_test_request("hi");
        assert!(matches!(
            dispatcher.send(&request).await,
            DispatchOutcome::MustQueue
        ));
        assert!(dispatcher.send(&request).await.is_delivered());
        assert!(dispatcher.send(&request).await.is_delivered());
        assert_eq!(dispatcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_delivery_body_reads_back() {
        let delivery = make_test_delivery(DispatchPath::Direct, "hello");
        assert_eq!(delivery.receipt.path, DispatchPath::Direct);
        assert_eq!(delivery.body.collect_text().await.unwrap(), "hello");
    }

    #[test]
    fn test_dir_round_trip() {
        let dir = TestDir::new();
        dir.create_file("nested/config.toml", "x = 1");
        assert_eq!(dir.read_file("nested/config.toml").unwrap(), "x = 1");
        assert!(dir.file_path("nested").is_dir());
    }

    #[test]
    fn config_fixture_mentions_url() {
        assert!(make_test_config_toml("http://h:1").contains("base_url = \"http://h:1\""));
    }
}
