//! 管理命令 - 在状态快照上执行 highlight 的增删查改
//!
//! 修改类命令在快照排他锁内完成 载入 → 执行 → 写回。用户命令执行前
//! 先检查 guild 的允许角色。

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use std::collections::BTreeSet;

use super::output::{format_output, render_all, render_patterns, render_settings};
use crate::commands::HighlightService;
use crate::config::HighlightConfig;
use crate::model::{ActivityKind, ChannelId, GuildId, PatternMode, PatternSetting, RoleId, Scope, UserId};
use crate::settings::Toggle;
use crate::snapshot::{SnapshotStore, StateFile};

/// 命令作用的 guild 与用户，以及用户持有的角色
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub guild: GuildId,
    pub user: UserId,
    pub roles: &'a [RoleId],
}

/// add 命令参数
#[derive(Debug, Args)]
pub struct AddArgs {
    /// 要添加的文本
    #[arg(required = true)]
    pub words: Vec<String>,

    /// 每个参数作为单独的 highlight（默认合并为一条）
    #[arg(long, short)]
    pub multiple: bool,

    /// 只在指定频道生效
    #[arg(long, short)]
    pub channel: Option<u64>,

    /// 按正则匹配
    #[arg(long, conflicts_with = "wildcard")]
    pub regex: bool,

    /// 按 wildcard 匹配（容忍分隔符与重复字符）
    #[arg(long)]
    pub wildcard: bool,

    /// 同时匹配机器人消息
    #[arg(long, conflicts_with = "images")]
    pub bots: bool,

    /// 同时匹配图片中的文字
    #[arg(long)]
    pub images: bool,
}

impl AddArgs {
    fn mode(&self) -> PatternMode {
        if self.regex {
            PatternMode::Regex
        } else if self.wildcard {
            PatternMode::Wildcard
        } else {
            PatternMode::Literal
        }
    }

    fn setting(&self) -> Option<PatternSetting> {
        if self.bots {
            Some(PatternSetting::Bots)
        } else if self.images {
            Some(PatternSetting::Images)
        } else {
            None
        }
    }

    fn texts(&self) -> Vec<String> {
        if self.multiple {
            self.words.clone()
        } else {
            vec![self.words.join(" ")]
        }
    }
}

/// 开关类设置
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToggleArg {
    Bots,
    Embeds,
    Images,
}

impl From<ToggleArg> for Toggle {
    fn from(arg: ToggleArg) -> Self {
        match arg {
            ToggleArg::Bots => Toggle::Bots,
            ToggleArg::Embeds => Toggle::Embeds,
            ToggleArg::Images => Toggle::Images,
        }
    }
}

/// 计入 last-seen 的活动类型
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActivityArg {
    Message,
    Reaction,
    Typing,
}

impl From<ActivityArg> for ActivityKind {
    fn from(arg: ActivityArg) -> Self {
        match arg {
            ActivityArg::Message => ActivityKind::Message,
            ActivityArg::Reaction => ActivityKind::Reaction,
            ActivityArg::Typing => ActivityKind::Typing,
        }
    }
}

/// last-seen 命令参数
#[derive(Debug, Args)]
pub struct LastSeenArgs {
    /// 开关某类活动
    #[arg(requires = "switch")]
    pub kind: Option<ActivityArg>,

    pub switch: Option<Switch>,

    /// 活动有效窗口（秒）
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 超过多少个位置有活动时视为整个 guild 在线
    #[arg(long)]
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn scope_of(channel: Option<u64>) -> Scope {
    channel.map_or(Scope::Guild, |id| Scope::Channel(ChannelId(id)))
}

/// 解析 `#2ecc71`、`0x2ecc71` 或十进制颜色
pub fn parse_colour(value: &str) -> Result<u32> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix('#').or_else(|| value.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse::<u32>()
    };
    match parsed {
        Ok(colour) if colour <= 0xFF_FF_FF => Ok(colour),
        _ => Err(anyhow!("Invalid colour: {value}")),
    }
}

/// 载入快照构造服务
pub fn load_service(store: &SnapshotStore, config: &HighlightConfig) -> Result<HighlightService> {
    let service = HighlightService::new(config.clone());
    let skipped = store.load()?.restore(service.registry(), service.settings());
    if skipped > 0 {
        tracing::warn!(skipped, "Some highlights in the state file were skipped");
    }
    Ok(service)
}

/// 载入快照并检查调用者的角色
pub fn load_for(store: &SnapshotStore, config: &HighlightConfig, target: Target) -> Result<HighlightService> {
    let service = load_service(store, config)?;
    service.ensure_allowed(target.guild, target.roles)?;
    Ok(service)
}

/// 在排他锁内执行修改并写回快照，操作失败时不写回
fn apply<F>(store: &SnapshotStore, config: &HighlightConfig, operation: F) -> Result<String>
where
    F: FnOnce(&HighlightService) -> Result<String>,
{
    store.update(|state| {
        let service = HighlightService::new(config.clone());
        std::mem::take(state).restore(service.registry(), service.settings());
        let reply = operation(&service)?;
        *state = StateFile::capture(service.registry(), service.settings());
        Ok(reply)
    })
}

/// 以调用者身份执行修改
pub fn mutate<F>(store: &SnapshotStore, config: &HighlightConfig, target: Target, operation: F) -> Result<String>
where
    F: FnOnce(&HighlightService) -> Result<String>,
{
    apply(store, config, |service| {
        service.ensure_allowed(target.guild, target.roles)?;
        operation(service)
    })
}

/// 切换 guild 的允许角色（管理命令，不受角色限制）
pub fn handle_roles(store: &SnapshotStore, config: &HighlightConfig, guild: GuildId, roles: &[u64]) -> Result<String> {
    apply(store, config, |service| {
        let roles: Vec<RoleId> = roles.iter().copied().map(RoleId).collect();
        let current = if roles.is_empty() {
            service.guild_settings(guild).allowed_roles
        } else {
            service.toggle_allowed_roles(guild, &roles)
        };
        if current.is_empty() {
            return Ok("You do not have any allowed roles, everyone can use highlights.".to_string());
        }
        let ids: Vec<String> = current.iter().map(RoleId::to_string).collect();
        Ok(format!("Allowed roles: {}", ids.join(", ")))
    })
}

pub fn handle_add(service: &HighlightService, target: Target, args: &AddArgs) -> Result<String> {
    let added = service.add(
        target.user,
        target.guild,
        scope_of(args.channel),
        args.texts(),
        args.mode(),
        args.setting(),
    )?;
    let words: Vec<String> = added.iter().map(|p| format!("`{}`", p.text())).collect();
    Ok(format!("Added {} highlight(s): {}", added.len(), words.join(", ")))
}

pub fn handle_remove(service: &HighlightService, target: Target, words: &[String], channel: Option<u64>) -> String {
    let outcome = service.remove(target.user, target.guild, scope_of(channel), words);
    let mut reply = format!("Removed {} highlight(s).", outcome.removed.len());
    if !outcome.missing.is_empty() {
        reply.push_str(&format!(" Not found: {}", outcome.missing.join(", ")));
    }
    reply
}

pub fn handle_list(service: &HighlightService, target: Target, channel: Option<u64>, all: bool, json: bool) -> String {
    if all {
        let all = service.list_all(target.user, target.guild);
        let by_label: std::collections::BTreeMap<String, _> =
            all.iter().map(|(scope, p)| (scope_key(*scope), p.clone())).collect();
        if json {
            return format_output(&by_label, true, |_| String::new());
        }
        return render_all(&all);
    }
    let scope = scope_of(channel);
    let patterns = service.list(target.user, target.guild, scope);
    format_output(&patterns, json, |p| render_patterns(scope, p))
}

fn scope_key(scope: Scope) -> String {
    match scope {
        Scope::Guild => "guild".to_string(),
        Scope::Channel(id) => format!("channel:{id}"),
    }
}

pub fn handle_sync(service: &HighlightService, target: Target, base: u64, targets: &[u64]) -> Result<String> {
    let targets: Vec<ChannelId> = targets.iter().copied().map(ChannelId).collect();
    let copied = service.sync(target.user, target.guild, ChannelId(base), &targets)?;
    Ok(format!("Copied the highlights of channel {base} to {copied} channel(s)."))
}

fn render_blocks(blocks: &BTreeSet<u64>) -> String {
    if blocks.is_empty() {
        "Your block list is empty.".to_string()
    } else {
        let ids: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
        format!("Blocked: {}", ids.join(", "))
    }
}

pub fn handle_block(service: &HighlightService, target: Target, ids: &[u64], unblock: bool) -> String {
    let blocks = if unblock {
        service.unblock(target.user, target.guild, ids)
    } else {
        service.block(target.user, target.guild, ids)
    };
    render_blocks(&blocks)
}

pub fn handle_cooldown(service: &HighlightService, target: Target, secs: u64) -> String {
    let applied = service.set_cooldown(target.user, target.guild, secs);
    if applied != secs {
        format!("Cooldown set to {applied}s (clamped from {secs}s).")
    } else {
        format!("Cooldown set to {applied}s.")
    }
}

pub fn handle_toggle(service: &HighlightService, target: Target, toggle: ToggleArg, state: Switch) -> String {
    let settings = service.set_toggle(target.user, target.guild, toggle.into(), state.enabled());
    render_settings(&settings)
}

pub fn handle_last_seen(service: &HighlightService, target: Target, args: &LastSeenArgs) -> String {
    if let (Some(kind), Some(switch)) = (args.kind, args.switch) {
        service.set_last_seen(target.user, target.guild, kind.into(), switch.enabled());
    }
    if args.timeout.is_some() || args.threshold.is_some() {
        service.set_last_seen_window(target.user, target.guild, args.timeout, args.threshold);
    }
    render_settings(&service.show_settings(target.user, target.guild))
}

pub fn handle_colour(service: &HighlightService, target: Target, colour: &str) -> Result<String> {
    let colour = parse_colour(colour)?;
    let settings = service.set_colour(target.user, target.guild, colour);
    Ok(format!("Colour set to #{:06x}.", settings.colour))
}

pub fn handle_reset(service: &HighlightService, target: Target) -> String {
    let settings = service.reset_settings(target.user, target.guild);
    format!("Settings reset to defaults.\n{}", render_settings(&settings))
}

pub fn handle_settings(service: &HighlightService, target: Target, json: bool) -> String {
    let settings = service.show_settings(target.user, target.guild);
    format_output(&settings, json, render_settings)
}
