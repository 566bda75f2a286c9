//! MatchResolver - 对单个用户的全部 highlight 做匹配
//!
//! 同一用户的 pattern 彼此独立，并发执行：
//! - Literal 足够廉价，直接在当前任务内匹配
//! - Regex / Wildcard 放到阻塞线程池，并有单独的超时
//!
//! 某个 pattern 超时只会让它自己视为未匹配，不影响其他 pattern。

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::content::NormalizedMessage;
use crate::error::HighlightError;
use crate::model::{HighlightPattern, PatternMode, UserId};
use crate::pattern::{MatchSpan, Matcher, PatternCompiler};
use crate::settings::ViewerSettings;

/// 超过该长度的命中文本不直接展示
const MAX_SHOWN_MATCH_CHARS: usize = 100;
/// format_response 最多展示的条目
const MAX_RESPONSE_ITEMS: usize = 10;
/// 标题最大长度
const MAX_TITLE_CHARS: usize = 50;

/// 命中所在的内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Body,
    Bot,
    Image,
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentCategory::Body => "body",
            ContentCategory::Bot => "bot",
            ContentCategory::Image => "image",
        };
        f.write_str(s)
    }
}

/// 单条命中
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchEntry {
    /// 命中的原文
    pub matched: String,
    /// 来源 highlight 文本
    pub pattern: String,
    pub mode: PatternMode,
    pub category: ContentCategory,
    /// 是否来自词干化文本
    pub stemmed: bool,
}

/// 单个用户对单条消息的命中集合，按 highlight 文本去重
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchSet {
    entries: Vec<MatchEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timed_out: Vec<String>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MatchEntry] {
        &self.entries
    }

    /// 超时的 highlight
    pub fn timed_out(&self) -> &[String] {
        &self.timed_out
    }

    /// 某个 highlight 是否命中
    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.iter().any(|e| e.pattern.trim() == pattern.trim())
    }

    /// 添加命中；同一 highlight 只保留第一次
    pub fn add(&mut self, entry: MatchEntry) -> bool {
        if self.contains(&entry.pattern) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    fn mark_timed_out(&mut self, pattern: &str) {
        self.timed_out.push(pattern.to_string());
    }

    /// 人类可读的命中描述
    pub fn format_response(&self) -> String {
        let items: Vec<String> = self
            .entries
            .iter()
            .take(MAX_RESPONSE_ITEMS)
            .map(|e| {
                let shown = if e.matched.chars().count() >= MAX_SHOWN_MATCH_CHARS {
                    "[EXCEEDED 100 CHAR LIMIT]".to_string()
                } else {
                    e.matched.clone()
                };
                match e.mode {
                    PatternMode::Literal => format!("\"{}\"", e.matched),
                    PatternMode::Wildcard
                        if e.matched.trim().to_lowercase() == e.pattern.trim().to_lowercase() =>
                    {
                        format!("\"{shown}\"")
                    }
                    PatternMode::Wildcard => format!("\"{shown}\" from wildcard `({})`", e.pattern),
                    PatternMode::Regex => format!("\"{shown}\" from regex `({})`", e.pattern),
                }
            })
            .collect();
        humanize_list(&items)
    }

    /// 通知标题：最多两项，加上剩余数量，整体不超过 50 字符
    pub fn format_title(&self) -> String {
        let matches: Vec<&str> = self.entries.iter().map(|e| e.matched.trim()).collect();
        let title = if matches.len() < 3 {
            matches.join(", ")
        } else {
            format!("{} + {} more.", matches[..2].join(", "), matches.len() - 2)
        };
        if title.chars().count() > MAX_TITLE_CHARS {
            let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
            format!("{head}...")
        } else {
            title
        }
    }

    /// 页脚：正文以外的命中来源
    pub fn format_footer(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for entry in &self.entries {
            if entry.category != ContentCategory::Body {
                let label = entry.category.to_string();
                if !parts.contains(&label) {
                    parts.push(label);
                }
            }
        }
        if self.entries.iter().any(|e| e.stemmed) {
            parts.push("stemmed".to_string());
        }
        parts.join(" | ")
    }
}

/// "a"、"a and b"、"a, b, and c"
pub fn humanize_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

/// 拼接后的搜索文本，记录每一段的来源
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchText {
    text: String,
    segments: Vec<(Range<usize>, ContentCategory)>,
}

impl SearchText {
    fn push(&mut self, part: &str, category: ContentCategory) {
        if part.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        let start = self.text.len();
        self.text.push_str(part);
        self.segments.push((start..self.text.len(), category));
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// 偏移所在的分类；落在分隔空格上时归入后一段
    fn category_at(&self, offset: usize) -> ContentCategory {
        self.segments
            .iter()
            .find(|(range, _)| offset < range.end)
            .or(self.segments.last())
            .map(|(_, c)| *c)
            .unwrap_or(ContentCategory::Body)
    }
}

/// 为某个 highlight 构造原始与词干化搜索文本
pub fn search_texts(
    normalized: &NormalizedMessage,
    settings: &ViewerSettings,
    pattern: &HighlightPattern,
) -> (SearchText, SearchText) {
    let bots_allowed = settings.bots || pattern.wants_bots();
    let body = !normalized.author_is_bot || bots_allowed;
    let bot = (normalized.author_is_bot && bots_allowed) || settings.embeds;
    let image = settings.images || pattern.wants_images();

    let mut raw = SearchText::default();
    let mut stemmed = SearchText::default();
    if body {
        raw.push(&normalized.body, ContentCategory::Body);
        stemmed.push(&normalized.stemmed_body, ContentCategory::Body);
    }
    if bot {
        raw.push(&normalized.bot_text, ContentCategory::Bot);
        stemmed.push(&normalized.stemmed_bot, ContentCategory::Bot);
    }
    if image {
        raw.push(&normalized.image_text, ContentCategory::Image);
        stemmed.push(&normalized.stemmed_image, ContentCategory::Image);
    }
    (raw, stemmed)
}

/// 先查原文，再查词干化文本（仅 Literal）
fn evaluate(matcher: &Matcher, raw: &SearchText, stemmed: &SearchText) -> Option<(MatchSpan, ContentCategory, bool)> {
    if let Some(span) = matcher.find(raw.as_str()) {
        let category = raw.category_at(span.start);
        return Some((span, category, false));
    }
    if matcher.mode() == PatternMode::Literal {
        if let Some(span) = matcher.find(stemmed.as_str()) {
            let category = stemmed.category_at(span.start);
            return Some((span, category, true));
        }
    }
    None
}

enum Outcome {
    Hit(MatchEntry),
    Miss,
    TimedOut,
}

/// 匹配解析器
pub struct MatchResolver {
    compiler: Arc<PatternCompiler>,
    timeout: Duration,
}

impl MatchResolver {
    pub fn new(compiler: Arc<PatternCompiler>, timeout: Duration) -> Self {
        Self { compiler, timeout }
    }

    /// 对用户的全部 highlight 求命中集合
    pub async fn resolve(
        &self,
        viewer: UserId,
        settings: &ViewerSettings,
        patterns: &[HighlightPattern],
        normalized: &NormalizedMessage,
    ) -> MatchSet {
        let tasks = patterns
            .iter()
            .map(|pattern| self.resolve_one(viewer, settings, pattern, normalized));
        let outcomes = join_all(tasks).await;

        let mut set = MatchSet::new();
        for (pattern, outcome) in patterns.iter().zip(outcomes) {
            match outcome {
                Outcome::Hit(entry) => {
                    set.add(entry);
                }
                Outcome::TimedOut => set.mark_timed_out(pattern.text()),
                Outcome::Miss => {}
            }
        }
        debug!(viewer = %viewer, patterns = patterns.len(), matches = set.len(), "Resolved highlights");
        set
    }

    async fn resolve_one(
        &self,
        viewer: UserId,
        settings: &ViewerSettings,
        pattern: &HighlightPattern,
        normalized: &NormalizedMessage,
    ) -> Outcome {
        let matcher = match self.compiler.compile(&pattern.kind) {
            Ok(m) => m,
            Err(e) => {
                warn!(viewer = %viewer, pattern = pattern.text(), error = %e, "Skipping uncompilable highlight");
                return Outcome::Miss;
            }
        };
        let (raw, stemmed) = search_texts(normalized, settings, pattern);
        if raw.as_str().is_empty() && stemmed.as_str().is_empty() {
            return Outcome::Miss;
        }

        let found = if matcher.is_cheap() {
            evaluate(&matcher, &raw, &stemmed)
        } else {
            let task = tokio::task::spawn_blocking(move || evaluate(&matcher, &raw, &stemmed));
            match tokio::time::timeout(self.timeout, task).await {
                Ok(Ok(found)) => found,
                Ok(Err(e)) => {
                    warn!(viewer = %viewer, pattern = pattern.text(), error = %e, "Highlight match task failed");
                    None
                }
                Err(_) => {
                    let err = HighlightError::MatchTimeout {
                        pattern: pattern.text().to_string(),
                        timeout: self.timeout,
                    };
                    error!(
                        target: "chat_highlight::alert",
                        viewer = %viewer,
                        mode = %pattern.mode(),
                        error = %err,
                        "Highlight took too long to fetch matches"
                    );
                    return Outcome::TimedOut;
                }
            }
        };

        match found {
            Some((span, category, stemmed)) => Outcome::Hit(MatchEntry {
                matched: span.text,
                pattern: pattern.text().to_string(),
                mode: pattern.mode(),
                category,
                stemmed,
            }),
            None => Outcome::Miss,
        }
    }
}
