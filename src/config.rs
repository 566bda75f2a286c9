//! 引擎配置 - 限额、冷却边界、wildcard 参数与各类超时
//!
//! 配置文件位置：`~/.config/chat-highlight/config.json`，
//! 所有字段都有默认值，缺省字段使用默认配置。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 引擎全局配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// 非正则 highlight 最短长度
    pub min_pattern_len: usize,
    /// 非正则 highlight 最长长度
    pub max_pattern_len: usize,
    /// 每个用户的 guild 级 highlight 上限
    pub guild_limit: usize,
    /// 每个用户在单个频道的 highlight 上限
    pub channel_limit: usize,
    /// 每个用户拥有频道级 highlight 的频道数上限
    pub max_channels: usize,
    /// 冷却下限（秒）
    pub cooldown_min_secs: u64,
    /// 冷却上限（秒）
    pub cooldown_max_secs: u64,
    /// 新用户默认冷却（秒）
    pub default_cooldown_secs: u64,
    /// 默认通知颜色
    pub default_colour: u32,
    /// wildcard 相邻字符之间允许的分隔符数量
    pub wildcard_max_bypass: usize,
    /// wildcard 前后允许的额外字符数量
    pub wildcard_affix_allowance: usize,
    /// 正则编译后的大小上限（字节）
    pub regex_size_limit: usize,
    /// 单个 pattern 匹配超时（毫秒）
    pub pattern_timeout_ms: u64,
    /// 图片文字提取整体超时（毫秒）
    pub ocr_timeout_ms: u64,
    /// 通知中附带的历史消息条数
    pub history_limit: usize,
    /// 历史消息单条截断长度
    pub history_chars: usize,
    /// 当前消息截断长度
    pub source_chars: usize,
    /// 投递队列容量
    pub queue_capacity: usize,
    /// 投递队列发送间隔（毫秒）
    pub queue_interval_ms: u64,
    /// 编译缓存容量
    pub matcher_cache_capacity: usize,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            min_pattern_len: 2,
            max_pattern_len: 50,
            guild_limit: 25,
            channel_limit: 10,
            max_channels: 20,
            cooldown_min_secs: 30,
            cooldown_max_secs: 3600,
            default_cooldown_secs: 60,
            default_colour: 3066993,
            wildcard_max_bypass: 5,
            wildcard_affix_allowance: 3,
            regex_size_limit: 1 << 20,
            pattern_timeout_ms: 6_000,
            ocr_timeout_ms: 10_000,
            history_limit: 4,
            history_chars: 200,
            source_chars: 500,
            queue_capacity: 256,
            queue_interval_ms: 3_000,
            matcher_cache_capacity: 4096,
        }
    }
}

impl HighlightConfig {
    /// 默认配置文件路径
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("chat-highlight")
            .join("config.json")
    }

    /// 从默认路径加载，文件不存在时使用默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// 从指定路径加载
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: HighlightConfig = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    /// 修正互相矛盾的边界
    fn normalized(mut self) -> Self {
        if self.cooldown_max_secs < self.cooldown_min_secs {
            self.cooldown_max_secs = self.cooldown_min_secs;
        }
        if self.max_pattern_len < self.min_pattern_len {
            self.max_pattern_len = self.min_pattern_len;
        }
        self.default_cooldown_secs = self.clamp_cooldown(self.default_cooldown_secs);
        self
    }

    /// 把用户冷却限制在全局边界内
    pub fn clamp_cooldown(&self, secs: u64) -> u64 {
        secs.clamp(self.cooldown_min_secs, self.cooldown_max_secs)
    }

    pub fn pattern_timeout(&self) -> Duration {
        Duration::from_millis(self.pattern_timeout_ms)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    pub fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = HighlightConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.guild_limit, 25);
        assert_eq!(config.channel_limit, 10);
        assert_eq!(config.pattern_timeout(), Duration::from_secs(6));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"guild_limit": 5, "cooldown_min_secs": 90}"#).unwrap();

        let config = HighlightConfig::load_from(&path).unwrap();
        assert_eq!(config.guild_limit, 5);
        assert_eq!(config.max_pattern_len, 50);
        // 默认冷却被提升到新的下限
        assert_eq!(config.default_cooldown_secs, 90);
    }

    #[test]
    fn test_clamp_cooldown() {
        let config = HighlightConfig::default();
        assert_eq!(config.clamp_cooldown(1), 30);
        assert_eq!(config.clamp_cooldown(120), 120);
        assert_eq!(config.clamp_cooldown(99_999), 3600);
    }
}
