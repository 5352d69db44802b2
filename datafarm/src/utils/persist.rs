use crate::{error::AgentError, messages::telemetry::analysis::AnalysisResult};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

/// Monotonic photo sequence number kept in a text file, so photo names
/// never repeat across restarts of the agent.
pub struct PhotoCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PhotoCounter {
    /// Counter stored at `path`, the file is created on first use.
    ///
    /// * `path`: counter file.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Last issued number, zero when nothing was issued yet. A corrupted
    /// file restarts the sequence at zero.
    pub async fn current(&self) -> Result<u64, AgentError> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(raw.trim().parse().unwrap_or_else(|_| {
                warn!(path = %self.path.display(), ?raw, "photo counter unreadable, restarting at 0");
                0
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read, increment and write back the counter.
    pub async fn next(&self) -> Result<u64, AgentError> {
        let _guard = self.lock.lock().await;
        let next = self.current().await? + 1;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, next.to_string()).await?;
        Ok(next)
    }
}

/// Append-only `file:ratio%` log of every analysed photo.
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    /// Log stored at `path`.
    ///
    /// * `path`: log file.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result line.
    ///
    /// * `result`: analysis of one photo.
    pub async fn append(&self, result: &AnalysisResult) -> Result<(), AgentError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(result.log_line().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_starts_at_one_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/picture_id.txt");

        let counter = PhotoCounter::new(&path);
        assert_eq!(counter.current().await.unwrap(), 0);
        assert_eq!(counter.next().await.unwrap(), 1);
        assert_eq!(counter.next().await.unwrap(), 2);

        // A fresh counter on the same file carries on the sequence.
        let restarted = PhotoCounter::new(&path);
        assert_eq!(restarted.next().await.unwrap(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_next_never_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let counter = std::sync::Arc::new(PhotoCounter::new(dir.path().join("picture_id.txt")));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.next().await.unwrap() })
            })
            .collect();
        let mut issued: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        issued.sort_unstable();

        assert_eq!(issued, (1..=10).collect::<Vec<_>>());
        assert_eq!(counter.current().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_corrupted_counter_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picture_id.txt");
        std::fs::write(&path, "twelve").unwrap();

        assert_eq!(PhotoCounter::new(&path).next().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_result_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("brightness_result.txt"));

        log.append(&AnalysisResult::new("a.jpg", 1.5)).await.unwrap();
        log.append(&AnalysisResult::new("b.jpg", 12.345_67)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(log.path()).unwrap(),
            "a.jpg:1.5000%\nb.jpg:12.3457%\n"
        );
    }
}
