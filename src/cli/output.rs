//! Output formatting for CLI commands

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{HighlightPattern, PatternSetting, Scope};
use crate::settings::ViewerSettings;

/// Format output as JSON when `--json` is set, otherwise use the text renderer
pub fn format_output<T: Serialize>(data: &T, json: bool, text: impl FnOnce(&T) -> String) -> String {
    if json {
        serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
    } else {
        text(data)
    }
}

fn scope_label(scope: Scope) -> String {
    match scope {
        Scope::Guild => "guild".to_string(),
        Scope::Channel(id) => format!("channel {id}"),
    }
}

fn pattern_line(pattern: &HighlightPattern) -> String {
    let mut line = format!("  - {} ({})", pattern.text(), pattern.mode());
    if let Some(setting) = pattern.setting {
        let label = match setting {
            PatternSetting::Bots => "bots",
            PatternSetting::Images => "images",
        };
        line.push_str(&format!(" [{label}]"));
    }
    line
}

/// 单个作用域的 highlight 列表
pub fn render_patterns(scope: Scope, patterns: &[HighlightPattern]) -> String {
    if patterns.is_empty() {
        return format!("You have no highlights in this {}.", scope);
    }
    let mut out = format!("Highlights ({}):\n", scope_label(scope));
    let lines: Vec<String> = patterns.iter().map(pattern_line).collect();
    out.push_str(&lines.join("\n"));
    out
}

/// 全部作用域的 highlight 列表
pub fn render_all(all: &BTreeMap<Scope, Vec<HighlightPattern>>) -> String {
    if all.is_empty() {
        return "You have no highlights in this guild.".to_string();
    }
    all.iter()
        .map(|(scope, patterns)| render_patterns(*scope, patterns))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// 用户设置
pub fn render_settings(settings: &ViewerSettings) -> String {
    let blocks = if settings.blocks.is_empty() {
        "none".to_string()
    } else {
        settings.blocks.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ")
    };
    [
        format!("Cooldown: {}s", settings.cooldown_secs),
        format!("Colour: #{:06x}", settings.colour),
        format!("Bots: {}", on_off(settings.bots)),
        format!("Embeds: {}", on_off(settings.embeds)),
        format!("Images: {}", on_off(settings.images)),
        format!(
            "Last seen: {}s window, {} locations for guild-wide, message {}, reaction {}, typing {}",
            settings.last_seen.timeout_secs,
            settings.last_seen.category_threshold,
            on_off(settings.last_seen.message),
            on_off(settings.last_seen.reaction),
            on_off(settings.last_seen.typing)
        ),
        format!("Blocked: {blocks}"),
    ]
    .join("\n")
}
