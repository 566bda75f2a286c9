//! 用户设置 - 冷却、颜色、屏蔽列表、分类开关与 last-seen 配置
//!
//! 首次读取时返回默认值；只会被重置，不会被删除。guild 级只有允许使用的角色列表。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::config::HighlightConfig;
use crate::model::{ActivityKind, EntityId, GuildId, RoleId, UserId};

/// last-seen 抑制配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastSeenSettings {
    /// 活动有效窗口（秒）
    pub timeout_secs: u64,
    /// 超过多少个不同位置有活动时视为整个 guild 在线
    pub category_threshold: usize,
    pub message: bool,
    pub reaction: bool,
    pub typing: bool,
}

impl Default for LastSeenSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            category_threshold: 2,
            message: true,
            reaction: true,
            typing: true,
        }
    }
}

impl LastSeenSettings {
    /// 该类活动是否计入 last-seen
    pub fn counts(&self, kind: ActivityKind) -> bool {
        match kind {
            ActivityKind::Message => self.message,
            ActivityKind::Reaction => self.reaction,
            ActivityKind::Typing => self.typing,
        }
    }

    pub fn set(&mut self, kind: ActivityKind, enabled: bool) {
        match kind {
            ActivityKind::Message => self.message = enabled,
            ActivityKind::Reaction => self.reaction = enabled,
            ActivityKind::Typing => self.typing = enabled,
        }
    }
}

/// 可开关的内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    Bots,
    Embeds,
    Images,
}

/// 单个用户在单个 guild 的设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerSettings {
    pub cooldown_secs: u64,
    pub colour: u32,
    #[serde(default)]
    pub blocks: BTreeSet<EntityId>,
    #[serde(default)]
    pub bots: bool,
    #[serde(default)]
    pub embeds: bool,
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub last_seen: LastSeenSettings,
}

impl ViewerSettings {
    pub fn defaults(config: &HighlightConfig) -> Self {
        Self {
            cooldown_secs: config.default_cooldown_secs,
            colour: config.default_colour,
            blocks: BTreeSet::new(),
            bots: false,
            embeds: false,
            images: false,
            last_seen: LastSeenSettings::default(),
        }
    }

    pub fn toggle(&self, toggle: Toggle) -> bool {
        match toggle {
            Toggle::Bots => self.bots,
            Toggle::Embeds => self.embeds,
            Toggle::Images => self.images,
        }
    }

    pub fn is_blocked(&self, entity: EntityId) -> bool {
        self.blocks.contains(&entity)
    }
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self::defaults(&HighlightConfig::default())
    }
}

/// guild 级设置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    /// 允许使用 highlight 命令的角色，为空时所有人可用
    #[serde(default)]
    pub allowed_roles: BTreeSet<RoleId>,
}

impl GuildSettings {
    /// 持有任一允许角色，或未设置限制
    pub fn allows(&self, roles: &[RoleId]) -> bool {
        self.allowed_roles.is_empty() || roles.iter().any(|r| self.allowed_roles.contains(r))
    }
}

/// 用户设置存储（内存）
pub struct SettingsStore {
    config: HighlightConfig,
    entries: RwLock<HashMap<(GuildId, UserId), ViewerSettings>>,
    guilds: RwLock<HashMap<GuildId, GuildSettings>>,
}

impl SettingsStore {
    pub fn new(config: HighlightConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            guilds: RwLock::new(HashMap::new()),
        }
    }

    /// 读取设置，未设置时返回默认值
    pub fn get(&self, guild: GuildId, user: UserId) -> ViewerSettings {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(guild, user))
            .cloned()
            .unwrap_or_else(|| ViewerSettings::defaults(&self.config))
    }

    /// 原子地修改设置并返回修改后的值
    pub fn update<F>(&self, guild: GuildId, user: UserId, f: F) -> ViewerSettings
    where
        F: FnOnce(&mut ViewerSettings),
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let settings = entries
            .entry((guild, user))
            .or_insert_with(|| ViewerSettings::defaults(&self.config));
        f(settings);
        settings.cooldown_secs = self.config.clamp_cooldown(settings.cooldown_secs);
        settings.clone()
    }

    /// 设置冷却，返回裁剪后的实际值
    pub fn set_cooldown(&self, guild: GuildId, user: UserId, secs: u64) -> u64 {
        self.update(guild, user, |s| s.cooldown_secs = secs).cooldown_secs
    }

    pub fn set_toggle(&self, guild: GuildId, user: UserId, toggle: Toggle, enabled: bool) -> ViewerSettings {
        self.update(guild, user, |s| match toggle {
            Toggle::Bots => s.bots = enabled,
            Toggle::Embeds => s.embeds = enabled,
            Toggle::Images => s.images = enabled,
        })
    }

    pub fn set_colour(&self, guild: GuildId, user: UserId, colour: u32) -> ViewerSettings {
        self.update(guild, user, |s| s.colour = colour)
    }

    pub fn set_last_seen_kind(&self, guild: GuildId, user: UserId, kind: ActivityKind, enabled: bool) -> ViewerSettings {
        self.update(guild, user, |s| s.last_seen.set(kind, enabled))
    }

    /// 修改 last-seen 窗口与位置阈值，未给出的项保持不变
    pub fn set_last_seen_window(
        &self,
        guild: GuildId,
        user: UserId,
        timeout_secs: Option<u64>,
        category_threshold: Option<usize>,
    ) -> ViewerSettings {
        self.update(guild, user, |s| {
            if let Some(secs) = timeout_secs {
                s.last_seen.timeout_secs = secs;
            }
            if let Some(threshold) = category_threshold {
                s.last_seen.category_threshold = threshold;
            }
        })
    }

    /// 加入屏蔽列表，返回当前屏蔽列表
    pub fn block(&self, guild: GuildId, user: UserId, entities: &[EntityId]) -> BTreeSet<EntityId> {
        self.update(guild, user, |s| s.blocks.extend(entities.iter().copied())).blocks
    }

    /// 移出屏蔽列表，返回当前屏蔽列表
    pub fn unblock(&self, guild: GuildId, user: UserId, entities: &[EntityId]) -> BTreeSet<EntityId> {
        self.update(guild, user, |s| {
            for entity in entities {
                s.blocks.remove(entity);
            }
        })
        .blocks
    }

    /// 恢复默认设置
    pub fn reset(&self, guild: GuildId, user: UserId) -> ViewerSettings {
        self.update(guild, user, |s| *s = ViewerSettings::defaults(&self.config))
    }

    /// 导出所有写入过的条目（快照用）
    pub fn entries(&self) -> Vec<(GuildId, UserId, ViewerSettings)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((g, u), s)| (*g, *u, s.clone()))
            .collect();
        out.sort_by_key(|(g, u, _)| (*g, *u));
        out
    }

    pub fn guild(&self, guild: GuildId) -> GuildSettings {
        self.guilds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&guild)
            .cloned()
            .unwrap_or_default()
    }

    /// 逐个切换角色：已在列表中的移除，否则加入。返回切换后的列表
    pub fn toggle_roles(&self, guild: GuildId, roles: &[RoleId]) -> BTreeSet<RoleId> {
        let mut guilds = self.guilds.write().unwrap_or_else(PoisonError::into_inner);
        let settings = guilds.entry(guild).or_default();
        for role in roles {
            if !settings.allowed_roles.remove(role) {
                settings.allowed_roles.insert(*role);
            }
        }
        settings.allowed_roles.clone()
    }

    pub fn guild_entries(&self) -> Vec<(GuildId, GuildSettings)> {
        let mut out: Vec<_> = self
            .guilds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(g, s)| (*g, s.clone()))
            .collect();
        out.sort_by_key(|(g, _)| *g);
        out
    }

    pub fn load_guilds(&self, entries: Vec<(GuildId, GuildSettings)>) {
        self.guilds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
    }

    /// 载入条目（快照用），冷却会重新裁剪
    pub fn load(&self, entries: Vec<(GuildId, UserId, ViewerSettings)>) {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (guild, user, mut settings) in entries {
            settings.cooldown_secs = self.config.clamp_cooldown(settings.cooldown_secs);
            map.insert((guild, user), settings);
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(HighlightConfig::default())
    }
}
