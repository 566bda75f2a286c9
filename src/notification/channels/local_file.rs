//! 本地文件渠道 - 将通知追加写入 JSONL 文件

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{HighlightError, Result};
use crate::notification::channel::{NotificationChannel, SendResult};
use crate::notification::payload::NotificationPayload;

/// 本地文件渠道 - 每条通知一行 JSON
pub struct LocalFileChannel {
    path: PathBuf,
}

impl LocalFileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认路径：`~/.config/chat-highlight/notifications.jsonl`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("chat-highlight")
            .join("notifications.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一行（带文件锁）
    fn append(&self, payload: &NotificationPayload) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(payload)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock_exclusive()?;
        let written = writeln!(file, "{line}");
        file.unlock()?;
        written
    }

    /// 读取文件中的全部通知，无法解析的行被跳过
    pub fn read_all(path: &Path) -> Vec<NotificationPayload> {
        let Ok(file) = File::open(path) else {
            return Vec::new();
        };
        BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }
}

impl Default for LocalFileChannel {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

#[async_trait]
impl NotificationChannel for LocalFileChannel {
    fn name(&self) -> &str {
        "local_file"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<SendResult> {
        match self.append(payload) {
            Ok(()) => {
                debug!(
                    channel = "local_file",
                    viewer = %payload.viewer,
                    "Notification recorded to local file"
                );
                Ok(SendResult::Sent)
            }
            Err(e) => {
                warn!(
                    channel = "local_file",
                    path = %self.path.display(),
                    error = %e,
                    "Failed to write notification to local file"
                );
                Err(HighlightError::Delivery {
                    viewer: payload.viewer,
                    reason: e.to_string(),
                })
            }
        }
    }
}
