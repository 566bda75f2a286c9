//! 命令层 - 用户可执行的 highlight 管理操作
//!
//! 所有操作都以 (guild, user) 为单位。注册类操作的错误是用户可见的，
//! 直接把 `HighlightError` 的文本返回给调用方即可。guild 设置了允许角色时，
//! 调用方需先通过 `ensure_allowed`。

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::HighlightConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{HighlightError, Result};
use crate::gate::{MemberDirectory, OpenDirectory};
use crate::model::{
    ActivityKind, ChannelId, EntityId, GuildId, HighlightPattern, IncomingMessage, PatternMode, PatternSetting, RoleId,
    Scope, UserId,
};
use crate::pattern::PatternCompiler;
use crate::registry::{AddRequest, PatternRegistry, RemoveOutcome};
use crate::resolver::MatchSet;
use crate::settings::{GuildSettings, SettingsStore, Toggle, ViewerSettings};

/// dry-run 中单个 highlight 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunLine {
    pub pattern: String,
    pub mode: PatternMode,
    pub matched: Option<String>,
}

impl DryRunLine {
    pub fn render(&self) -> String {
        match &self.matched {
            Some(m) => format!("✅ {} ({}) → \"{}\"", self.pattern, self.mode, m),
            None => format!("❌ {} ({})", self.pattern, self.mode),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportedPattern<'a> {
    text: &'a str,
    mode: PatternMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    setting: Option<PatternSetting>,
}

#[derive(Debug, Serialize)]
struct Export<'a> {
    guild: GuildId,
    user: UserId,
    settings: &'a ViewerSettings,
    highlights: BTreeMap<String, Vec<ExportedPattern<'a>>>,
}

/// highlight 服务门面
pub struct HighlightService {
    config: HighlightConfig,
    registry: Arc<PatternRegistry>,
    settings: Arc<SettingsStore>,
}

impl HighlightService {
    pub fn new(config: HighlightConfig) -> Self {
        let compiler = Arc::new(PatternCompiler::from_config(&config));
        Self {
            registry: Arc::new(PatternRegistry::new(config.clone(), compiler)),
            settings: Arc::new(SettingsStore::new(config.clone())),
            config,
        }
    }

    pub fn config(&self) -> &HighlightConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// 共享本服务注册表与设置的分发器
    pub fn dispatcher(&self, directory: Arc<dyn MemberDirectory>) -> Dispatcher {
        Dispatcher::new(&self.config, Arc::clone(&self.registry), Arc::clone(&self.settings), directory)
    }

    /// 调用者持有的角色是否允许在该 guild 使用 highlight
    pub fn ensure_allowed(&self, guild: GuildId, roles: &[RoleId]) -> Result<()> {
        if self.settings.guild(guild).allows(roles) {
            Ok(())
        } else {
            Err(HighlightError::NotAllowed { guild })
        }
    }

    /// 切换允许使用 highlight 的角色（管理操作）
    pub fn toggle_allowed_roles(&self, guild: GuildId, roles: &[RoleId]) -> BTreeSet<RoleId> {
        self.settings.toggle_roles(guild, roles)
    }

    pub fn guild_settings(&self, guild: GuildId) -> GuildSettings {
        self.settings.guild(guild)
    }

    pub fn add(
        &self,
        owner: UserId,
        guild: GuildId,
        scope: Scope,
        words: Vec<String>,
        mode: PatternMode,
        setting: Option<PatternSetting>,
    ) -> Result<Vec<HighlightPattern>> {
        self.registry.add(AddRequest {
            owner,
            guild,
            scope,
            words,
            mode,
            setting,
        })
    }

    pub fn remove(&self, owner: UserId, guild: GuildId, scope: Scope, words: &[String]) -> RemoveOutcome {
        self.registry.remove(owner, guild, scope, words)
    }

    pub fn list(&self, owner: UserId, guild: GuildId, scope: Scope) -> Vec<HighlightPattern> {
        self.registry.list(owner, guild, scope)
    }

    pub fn list_all(&self, owner: UserId, guild: GuildId) -> BTreeMap<Scope, Vec<HighlightPattern>> {
        self.registry.list_all(owner, guild)
    }

    pub fn clear(&self, owner: UserId, guild: GuildId) -> usize {
        self.registry.clear(owner, guild)
    }

    /// 把一个频道的 highlight 复制到其他频道
    pub fn sync(&self, owner: UserId, guild: GuildId, base: ChannelId, targets: &[ChannelId]) -> Result<usize> {
        self.registry.sync(owner, guild, base, targets)
    }

    pub fn block(&self, owner: UserId, guild: GuildId, entities: &[EntityId]) -> BTreeSet<EntityId> {
        self.settings.block(guild, owner, entities)
    }

    pub fn unblock(&self, owner: UserId, guild: GuildId, entities: &[EntityId]) -> BTreeSet<EntityId> {
        self.settings.unblock(guild, owner, entities)
    }

    /// 设置冷却，返回裁剪后的值
    pub fn set_cooldown(&self, owner: UserId, guild: GuildId, secs: u64) -> u64 {
        self.settings.set_cooldown(guild, owner, secs)
    }

    pub fn set_toggle(&self, owner: UserId, guild: GuildId, toggle: Toggle, enabled: bool) -> ViewerSettings {
        self.settings.set_toggle(guild, owner, toggle, enabled)
    }

    pub fn set_colour(&self, owner: UserId, guild: GuildId, colour: u32) -> ViewerSettings {
        self.settings.set_colour(guild, owner, colour)
    }

    pub fn set_last_seen(&self, owner: UserId, guild: GuildId, kind: ActivityKind, enabled: bool) -> ViewerSettings {
        self.settings.set_last_seen_kind(guild, owner, kind, enabled)
    }

    /// 恢复默认设置（highlight 不受影响）
    pub fn reset_settings(&self, owner: UserId, guild: GuildId) -> ViewerSettings {
        self.settings.reset(guild, owner)
    }

    pub fn set_last_seen_window(
        &self,
        owner: UserId,
        guild: GuildId,
        timeout_secs: Option<u64>,
        category_threshold: Option<usize>,
    ) -> ViewerSettings {
        self.settings
            .set_last_seen_window(guild, owner, timeout_secs, category_threshold)
    }

    pub fn show_settings(&self, owner: UserId, guild: GuildId) -> ViewerSettings {
        self.settings.get(guild, owner)
    }

    /// 导出用户在 guild 内的全部 highlight 与设置（YAML）
    pub fn export(&self, owner: UserId, guild: GuildId) -> anyhow::Result<String> {
        let settings = self.settings.get(guild, owner);
        let all = self.registry.list_all(owner, guild);
        let highlights = all
            .iter()
            .map(|(scope, patterns)| {
                let key = match scope {
                    Scope::Guild => "guild".to_string(),
                    Scope::Channel(id) => format!("channel:{id}"),
                };
                let items = patterns
                    .iter()
                    .map(|p| ExportedPattern {
                        text: p.text(),
                        mode: p.mode(),
                        setting: p.setting,
                    })
                    .collect();
                (key, items)
            })
            .collect();
        let export = Export {
            guild,
            user: owner,
            settings: &settings,
            highlights,
        };
        Ok(serde_yaml::to_string(&export)?)
    }

    /// 用一段文本试跑用户的 highlight，不经过门控也不占用冷却
    pub async fn dry_run(&self, owner: UserId, message: &IncomingMessage) -> Vec<DryRunLine> {
        let matches: MatchSet = self
            .dispatcher(Arc::new(OpenDirectory))
            .preview_matches(owner, message)
            .await;
        self.registry
            .patterns_for(message.guild_id, message.channel_id, owner)
            .into_iter()
            .map(|p| DryRunLine {
                matched: matches
                    .entries()
                    .iter()
                    .find(|e| e.pattern == p.text())
                    .map(|e| e.matched.clone()),
                pattern: p.text().to_string(),
                mode: p.mode(),
            })
            .collect()
    }
}

impl Default for HighlightService {
    fn default() -> Self {
        Self::new(HighlightConfig::default())
    }
}
