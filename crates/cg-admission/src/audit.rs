//! Append-only audit trail of admission decisions
//!
//! Each event is one line in the log file:
//!
//! ```text
//! [19.10.2026, 14:03:12] - [KEY] New user (identity: 76561198000000001)
//! ```
//!
//! and is optionally mirrored to a remote notifier. Recording never fails into
//! the caller: file errors are logged and remote delivery runs in its own task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cg_common::Clock;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::notification::{NoOpNotifier, RemoteNotifier};

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y, %H:%M:%S";

#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<AuditInner>,
}

struct AuditInner {
    file: Option<PathBuf>,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
    notifier: Arc<dyn RemoteNotifier>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(
        file: P,
        notifier: Arc<dyn RemoteNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(AuditInner {
                file: Some(file.as_ref().to_path_buf()),
                write_lock: Mutex::new(()),
                notifier,
                clock,
            }),
        }
    }

    /// No log file; events go to tracing and the notifier only
    pub fn without_file(notifier: Arc<dyn RemoteNotifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(AuditInner {
                file: None,
                write_lock: Mutex::new(()),
                notifier,
                clock,
            }),
        }
    }

    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::without_file(Arc::new(NoOpNotifier), clock)
    }

    pub fn file(&self) -> Option<&Path> {
        self.inner.file.as_deref()
    }

    pub fn format_line(&self, message: &str) -> String {
        let stamp = self.inner.clock.now().with_timezone(&Local);
        format!("[{}] - {}\n", stamp.format(TIMESTAMP_FORMAT), message)
    }

    /// Record an event. `remote` replaces `local` in the remote mirror when given.
    pub async fn record(&self, local: &str, remote: Option<&str>) {
        self.record_local(local).await;

        if self.inner.notifier.is_enabled() {
            let notifier = self.inner.notifier.clone();
            let content = remote.unwrap_or(local).to_string();
            tokio::spawn(async move {
                notifier.notify(&content).await;
            });
        }
    }

    /// Record an event in the log file only
    pub async fn record_local(&self, local: &str) {
        info!(target: "audit", event = %local, "Audit event");

        if let Some(file) = &self.inner.file {
            let line = self.format_line(local);
            let _guard = self.inner.write_lock.lock().await;
            if let Err(e) = append(file, line.as_bytes()).await {
                error!(error = %e, file = %file.display(), "Failed to append audit log");
            }
        }
    }

    /// Blocks local appends while the guard is alive
    #[cfg(test)]
    pub(crate) async fn hold_appends(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.write_lock.lock().await
    }

    /// Whole log file, empty when nothing has been recorded yet
    pub async fn read_all(&self) -> std::io::Result<String> {
        let Some(file) = &self.inner.file else {
            return Ok(String::new());
        };
        match tokio::fs::read_to_string(file).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

async fn append(file: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut handle = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .await?;
    handle.write_all(bytes).await?;
    handle.flush().await
}

/// First characters of a key, enough to correlate without leaking it
pub(crate) fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{visible}…")
}
