//! 核心数据模型 - ID、highlight 定义、输入消息与活动事件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(UserId);
snowflake!(GuildId);
snowflake!(ChannelId);
snowflake!(MessageId);
snowflake!(RoleId);

/// 屏蔽列表中的实体（用户或频道），平台侧不透明
pub type EntityId = u64;

/// Highlight 的匹配模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    Literal,
    Regex,
    Wildcard,
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternMode::Literal => "literal",
            PatternMode::Regex => "regex",
            PatternMode::Wildcard => "wildcard",
        };
        f.write_str(s)
    }
}

/// 按模式区分的 highlight 内容，每个变体只携带自身需要的字段
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatternKind {
    Literal { text: String },
    Regex { source: String },
    Wildcard { text: String },
}

impl PatternKind {
    pub fn new(mode: PatternMode, text: impl Into<String>) -> Self {
        let text = text.into();
        match mode {
            PatternMode::Literal => PatternKind::Literal { text },
            PatternMode::Regex => PatternKind::Regex { source: text },
            PatternMode::Wildcard => PatternKind::Wildcard { text },
        }
    }

    pub fn mode(&self) -> PatternMode {
        match self {
            PatternKind::Literal { .. } => PatternMode::Literal,
            PatternKind::Regex { .. } => PatternMode::Regex,
            PatternKind::Wildcard { .. } => PatternMode::Wildcard,
        }
    }

    /// 用户注册时的原始文本
    pub fn text(&self) -> &str {
        match self {
            PatternKind::Literal { text } | PatternKind::Wildcard { text } => text,
            PatternKind::Regex { source } => source,
        }
    }
}

/// pattern 级别的额外设置，一个 highlight 最多一个
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSetting {
    /// 匹配机器人发送的消息（含 embed 文本）
    Bots,
    /// 匹配图片中提取的文字
    Images,
}

/// highlight 作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Guild,
    Channel(ChannelId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Guild => f.write_str("guild"),
            Scope::Channel(_) => f.write_str("channel"),
        }
    }
}

/// 已注册的 highlight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightPattern {
    pub owner: UserId,
    pub guild: GuildId,
    pub scope: Scope,
    #[serde(flatten)]
    pub kind: PatternKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<PatternSetting>,
}

impl HighlightPattern {
    pub fn text(&self) -> &str {
        self.kind.text()
    }

    pub fn mode(&self) -> PatternMode {
        self.kind.mode()
    }

    pub fn wants_bots(&self) -> bool {
        self.setting == Some(PatternSetting::Bots)
    }

    pub fn wants_images(&self) -> bool {
        self.setting == Some(PatternSetting::Images)
    }
}

/// embed 字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// 平台无关的 embed 表示
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    /// embed 类型（rich/image/link…），不参与匹配
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub colour: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
}

/// 消息附件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Attachment {
    /// 是否为可做文字提取的图片
    pub fn is_image(&self) -> bool {
        if let Some(ct) = &self.content_type {
            return ct.starts_with("image/");
        }
        let name = self.filename.to_lowercase();
        [".png", ".jpg", ".jpeg"].iter().any(|ext| name.ends_with(ext))
    }
}

/// 平台推送的 guild 消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub guild_id: GuildId,
    #[serde(default)]
    pub guild_name: String,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub category_id: Option<ChannelId>,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub jump_url: String,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// last-seen 使用的位置：有分类时取分类，否则取频道
    pub fn location(&self) -> ChannelId {
        self.category_id.unwrap_or(self.channel_id)
    }
}

/// 活动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Message,
    Reaction,
    Typing,
}

/// 轻量活动信号（打字、反应），只更新 last-seen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub category_id: Option<ChannelId>,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn location(&self) -> ChannelId {
        self.category_id.unwrap_or(self.channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_kind_serde_is_tagged() {
        let pattern = HighlightPattern {
            owner: UserId(1),
            guild: GuildId(2),
            scope: Scope::Channel(ChannelId(3)),
            kind: PatternKind::new(PatternMode::Regex, r"\bfoo\b"),
            setting: Some(PatternSetting::Bots),
        };
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["type"], "regex");
        assert_eq!(json["source"], r"\bfoo\b");
        assert_eq!(json["scope"]["channel"], 3);
        assert_eq!(json["setting"], "bots");

        let back: HighlightPattern = serde_json::from_value(json).unwrap();
        assert_eq!(back, pattern);
    }

    #[test]
    fn test_attachment_image_detection() {
        let by_type = Attachment {
            url: "https://cdn/x".into(),
            filename: "x".into(),
            content_type: Some("image/webp".into()),
        };
        let by_name = Attachment {
            url: "https://cdn/x.JPG".into(),
            filename: "x.JPG".into(),
            content_type: None,
        };
        let text = Attachment {
            url: "https://cdn/x.txt".into(),
            filename: "x.txt".into(),
            content_type: Some("text/plain".into()),
        };
        assert!(by_type.is_image());
        assert!(by_name.is_image());
        assert!(!text.is_image());
    }

    #[test]
    fn test_location_prefers_category() {
        let event = ActivityEvent {
            user_id: UserId(1),
            guild_id: GuildId(1),
            channel_id: ChannelId(10),
            category_id: Some(ChannelId(99)),
            kind: ActivityKind::Typing,
            timestamp: Utc::now(),
        };
        assert_eq!(event.location(), ChannelId(99));
    }
}
