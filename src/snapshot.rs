//! 状态快照 - highlight 与用户设置的 JSON 文件
//!
//! 只用于 CLI 在多次调用之间保留注册信息；运行期状态（冷却、活动、历史）不写入。
//! 读写都在 `state.json.lock` 文件锁下进行。

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{GuildId, HighlightPattern, UserId};
use crate::registry::PatternRegistry;
use crate::settings::{GuildSettings, SettingsStore, ViewerSettings};

/// 单个用户的设置条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsEntry {
    pub guild: GuildId,
    pub user: UserId,
    #[serde(flatten)]
    pub settings: ViewerSettings,
}

/// guild 级设置条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildEntry {
    pub guild: GuildId,
    #[serde(flatten)]
    pub settings: GuildSettings,
}

/// 快照文件内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub patterns: Vec<HighlightPattern>,
    #[serde(default)]
    pub settings: Vec<SettingsEntry>,
    #[serde(default)]
    pub guilds: Vec<GuildEntry>,
}

impl StateFile {
    /// 从内存状态生成快照
    pub fn capture(registry: &PatternRegistry, settings: &SettingsStore) -> Self {
        Self {
            patterns: registry.all(),
            settings: settings
                .entries()
                .into_iter()
                .map(|(guild, user, settings)| SettingsEntry { guild, user, settings })
                .collect(),
            guilds: settings
                .guild_entries()
                .into_iter()
                .map(|(guild, settings)| GuildEntry { guild, settings })
                .collect(),
        }
    }

    /// 载入内存状态，返回因无法编译而跳过的 highlight 数量
    pub fn restore(self, registry: &PatternRegistry, settings: &SettingsStore) -> usize {
        let compiler = registry.compiler();
        let total = self.patterns.len();
        let valid: Vec<HighlightPattern> = self
            .patterns
            .into_iter()
            .filter(|p| match compiler.validate(&p.kind) {
                Ok(()) => true,
                Err(e) => {
                    warn!(owner = %p.owner, pattern = p.text(), error = %e, "Skipping invalid highlight in snapshot");
                    false
                }
            })
            .collect();
        let skipped = total - valid.len();
        registry.load(valid);
        settings.load(
            self.settings
                .into_iter()
                .map(|e| (e.guild, e.user, e.settings))
                .collect(),
        );
        settings.load_guilds(self.guilds.into_iter().map(|e| (e.guild, e.settings)).collect());
        skipped
    }
}

/// 快照文件存储
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 默认路径：`~/.config/chat-highlight/state.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("chat-highlight")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(self.lock_file_path())?;
        Ok(lock_file)
    }

    /// 读取快照（内部使用，不加锁）
    fn read_internal(&self) -> Result<StateFile> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "State file not found, starting empty");
            return Ok(StateFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).with_context(|| format!("Malformed state file {}", self.path.display()))
    }

    /// 写入快照（内部使用，不加锁）
    fn write_internal(&self, state: &StateFile) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// 在共享锁下读取
    pub fn load(&self) -> Result<StateFile> {
        let lock_file = self.open_lock()?;
        lock_file.lock_shared()?;
        let result = self.read_internal();
        let _ = lock_file.unlock();
        result
    }

    /// 在排他锁下执行读-改-写
    pub fn update<F, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut StateFile) -> Result<T>,
    {
        let lock_file = self.open_lock()?;
        lock_file.lock_exclusive()?;

        let result = (|| {
            let mut state = self.read_internal()?;
            let result = operation(&mut state)?;
            self.write_internal(&state)?;
            Ok(result)
        })();

        let _ = lock_file.unlock();
        result
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}
