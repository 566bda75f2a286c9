//! 通知 payload - 单个用户收到的一条私信
//!
//! 结构与平台无关：正文一行、标题、历史描述、颜色、时间戳、
//! "Source Message" 字段、页脚以及跳转动作。

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::config::HighlightConfig;
use crate::model::{ChannelId, GuildId, IncomingMessage, MessageId, UserId};
use crate::resolver::MatchSet;
use crate::state::HistoryLine;

/// 之前的历史每行默认保留的字符数
pub const HISTORY_LINE_CHARS: usize = 200;
/// 当前消息默认保留的字符数；超过该长度的源消息改用站内查看
pub const SOURCE_LINE_CHARS: usize = 500;

/// 通知附带的动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JumpAction {
    /// 直接跳转到源消息
    JumpToSource { url: String },
    /// 源消息过长或带附件，提供站内查看（带高亮预览）
    ViewMessage { url: String, preview: String },
}

impl JumpAction {
    /// 根据源消息选择动作
    pub fn for_message(message: &IncomingMessage, highlights: &[String]) -> Self {
        let long = message.content.chars().count() > SOURCE_LINE_CHARS;
        if long || !message.attachments.is_empty() || !message.embeds.is_empty() {
            JumpAction::ViewMessage {
                url: message.jump_url.clone(),
                preview: highlight_preview(&message.content, highlights),
            }
        } else {
            JumpAction::JumpToSource {
                url: message.jump_url.clone(),
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JumpAction::JumpToSource { .. } => "Jump To Source",
            JumpAction::ViewMessage { .. } => "View Message",
        }
    }
}

/// embed 字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
}

/// 一条私信通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub viewer: UserId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// 私信正文
    pub content: String,
    pub title: String,
    /// 频道历史（旧的在前，最后一行是触发的消息）
    pub description: String,
    pub colour: u32,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<PayloadField>,
    pub footer: String,
    pub action: JumpAction,
}

/// payload 构造器，持有历史截断长度
#[derive(Debug, Clone, Copy)]
pub struct PayloadBuilder {
    history_chars: usize,
    source_chars: usize,
}

impl PayloadBuilder {
    pub fn new(history_chars: usize, source_chars: usize) -> Self {
        Self {
            history_chars,
            source_chars,
        }
    }

    pub fn from_config(config: &HighlightConfig) -> Self {
        Self::new(config.history_chars, config.source_chars)
    }

    /// 组装通知
    pub fn build(
        &self,
        viewer: UserId,
        colour: u32,
        message: &IncomingMessage,
        matches: &MatchSet,
        history: &[HistoryLine],
        highlights: &[String],
    ) -> NotificationPayload {
        let plural = if matches.len() > 1 { "s" } else { "" };
        let content = format!(
            "In **{}** #{}, you were mentioned with the highlighted word{} {}.",
            message.guild_name,
            message.channel_name,
            plural,
            matches.format_response()
        );

        let mut lines: Vec<String> = history
            .iter()
            .map(|line| format_history_line(line, self.history_chars))
            .collect();
        lines.push(format_history_line(&HistoryLine::from_message(message), self.source_chars));

        let footer = match matches.format_footer() {
            f if f.is_empty() => "Triggered At".to_string(),
            f => format!("{f} | Triggered At"),
        };

        NotificationPayload {
            viewer,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            message_id: message.id,
            content,
            title: matches.format_title(),
            description: lines.join("\n"),
            colour,
            timestamp: message.timestamp,
            fields: vec![PayloadField {
                name: "Source Message".to_string(),
                value: format!("[Jump To]({})", message.jump_url),
            }],
            footer,
            action: JumpAction::for_message(message, highlights),
        }
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new(HISTORY_LINE_CHARS, SOURCE_LINE_CHARS)
    }
}

impl HistoryLine {
    pub fn from_message(message: &IncomingMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            author: message.author_name.clone(),
            content: message.content.clone(),
        }
    }
}

/// `[12:00:00] **author:** content`，内容按字符截断
pub fn format_history_line(line: &HistoryLine, max_chars: usize) -> String {
    let content: String = line.content.chars().take(max_chars).collect();
    format!("[{}] **{}:** {}", line.timestamp.format("%H:%M:%S"), line.author, content)
}

/// 将 highlight 在原文中的出现加粗加下划线
pub fn highlight_preview(content: &str, highlights: &[String]) -> String {
    let mut preview = content.to_string();
    for highlight in highlights {
        let pattern = format!(r"\b{}\b", regex::escape(highlight));
        if let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() {
            preview = re.replace_all(&preview, "**__${0}__**").into_owned();
        }
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, PatternMode};
    use crate::resolver::{ContentCategory, MatchEntry};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(content: &str) -> IncomingMessage {
        IncomingMessage {
            id: MessageId(7),
            guild_id: GuildId(1),
            guild_name: "Rustaceans".into(),
            channel_id: ChannelId(2),
            channel_name: "general".into(),
            category_id: None,
            author_id: UserId(3),
            author_name: "ferris".into(),
            author_is_bot: false,
            content: content.into(),
            embeds: Vec::new(),
            attachments: Vec::new(),
            jump_url: "https://chat.example/1/2/7".into(),
            timestamp: t(0),
        }
    }

    fn matches(words: &[&str]) -> MatchSet {
        let mut set = MatchSet::new();
        for word in words {
            set.add(MatchEntry {
                matched: word.to_string(),
                pattern: word.to_lowercase(),
                mode: PatternMode::Literal,
                category: ContentCategory::Body,
                stemmed: false,
            });
        }
        set
    }

    #[test]
    fn test_build_payload() {
        let msg = message("Alpha is live");
        let history = vec![HistoryLine {
            timestamp: t(-60),
            author: "crab".into(),
            content: "x".repeat(300),
        }];
        let payload = PayloadBuilder::default().build(UserId(9), 0xff0000, &msg, &matches(&["Alpha"]), &history, &["alpha".into()]);

        assert_eq!(
            payload.content,
            "In **Rustaceans** #general, you were mentioned with the highlighted word \"Alpha\"."
        );
        assert_eq!(payload.title, "Alpha");
        let lines: Vec<&str> = payload.description.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(&"x".repeat(200)));
        assert!(!lines[0].contains(&"x".repeat(201)));
        assert!(lines[1].ends_with("**ferris:** Alpha is live"));
        assert_eq!(payload.fields[0].value, "[Jump To](https://chat.example/1/2/7)");
        assert_eq!(payload.footer, "Triggered At");
        assert_eq!(
            payload.action,
            JumpAction::JumpToSource {
                url: "https://chat.example/1/2/7".into()
            }
        );
    }

    #[test]
    fn test_plural_wording() {
        let payload = PayloadBuilder::default().build(
            UserId(9),
            0,
            &message("alpha beta"),
            &matches(&["alpha", "beta"]),
            &[],
            &[],
        );
        assert!(payload.content.contains("highlighted words \"alpha\" and \"beta\"."));
    }

    #[test]
    fn test_view_message_for_long_or_attachments() {
        let long = message(&"word ".repeat(120));
        assert_eq!(JumpAction::for_message(&long, &[]).label(), "View Message");

        let mut with_file = message("short");
        with_file.attachments.push(Attachment {
            url: "https://cdn/x.png".into(),
            filename: "x.png".into(),
            content_type: None,
        });
        assert_eq!(JumpAction::for_message(&with_file, &[]).label(), "View Message");
        assert_eq!(JumpAction::for_message(&message("short"), &[]).label(), "Jump To Source");
    }

    #[test]
    fn test_highlight_preview() {
        let preview = highlight_preview("Alpha and alphabet", &["alpha".into()]);
        assert_eq!(preview, "**__Alpha__** and alphabet");
        assert_eq!(highlight_preview("c++ rocks", &["c++".into()]), "c++ rocks");
    }
}
