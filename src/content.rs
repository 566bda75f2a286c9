//! ContentNormalizer - 从消息中提取可搜索文本
//!
//! 每条消息只构造一次 `NormalizedMessage`，包含：
//! - 正文
//! - embed 派生文本（标题、描述、字段、页脚、作者名，不含链接）
//! - 图片文字（仅在有人订阅图片时提取）
//! - 以上三者的词干化小写版本

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_stemmers::{Algorithm, Stemmer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{ChannelId, Embed, GuildId, IncomingMessage, MessageId, UserId};
use crate::ocr::{ImageSource, TextExtractor};

/// 单条消息的可搜索文本
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub message_id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// 分类或频道
    pub location: ChannelId,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub bot_text: String,
    pub image_text: String,
    pub stemmed_body: String,
    pub stemmed_bot: String,
    pub stemmed_image: String,
}

impl NormalizedMessage {
    /// 只包含正文的消息（dry-run 与测试用）
    pub fn from_text(message: &IncomingMessage) -> Self {
        let bot_text = embed_text(&message.embeds);
        Self {
            message_id: message.id,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            location: message.location(),
            author_id: message.author_id,
            author_is_bot: message.author_is_bot,
            timestamp: message.timestamp,
            stemmed_body: stem_text(&message.content),
            stemmed_bot: stem_text(&bot_text),
            body: message.content.clone(),
            bot_text,
            image_text: String::new(),
            stemmed_image: String::new(),
        }
    }

    fn with_image_text(mut self, text: String) -> Self {
        self.stemmed_image = stem_text(&text);
        self.image_text = text;
        self
    }
}

/// 内容标准化器
pub struct ContentNormalizer {
    extractor: Option<Arc<dyn TextExtractor>>,
    ocr_timeout: Duration,
}

impl ContentNormalizer {
    pub fn new() -> Self {
        Self {
            extractor: None,
            ocr_timeout: Duration::from_secs(10),
        }
    }

    /// 设置图片文字提取器
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// 设置整批图片提取的超时
    pub fn with_ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = timeout;
        self
    }

    /// 标准化消息；`include_images` 为 true 时调用提取器
    pub async fn normalize(&self, message: &IncomingMessage, include_images: bool) -> NormalizedMessage {
        let base = NormalizedMessage::from_text(message);
        if !include_images {
            return base;
        }
        let image_text = self.extract_images(message).await;
        base.with_image_text(image_text)
    }

    async fn extract_images(&self, message: &IncomingMessage) -> String {
        let Some(extractor) = &self.extractor else {
            return String::new();
        };
        let sources = image_sources(message);
        if sources.is_empty() {
            return String::new();
        }

        let tasks = sources.iter().map(|source| {
            let extractor = Arc::clone(extractor);
            async move {
                match extractor.extract(source).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(extractor = extractor.name(), error = %e, "Image text extraction failed");
                        String::new()
                    }
                }
            }
        });

        match tokio::time::timeout(self.ocr_timeout, join_all(tasks)).await {
            Ok(texts) => texts
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => {
                debug!(
                    message_id = %message.id,
                    images = sources.len(),
                    "Image text extraction timed out"
                );
                String::new()
            }
        }
    }
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// 拼接 embed 中的可读文本，跳过链接以及类型、颜色等元数据
pub fn embed_text(embeds: &[Embed]) -> String {
    let mut texts: Vec<&str> = Vec::new();
    for embed in embeds {
        let fields = embed
            .fields
            .iter()
            .flat_map(|f| [Some(f.name.as_str()), Some(f.value.as_str())]);
        let values = [embed.title.as_deref(), embed.description.as_deref()]
            .into_iter()
            .chain(fields)
            .chain([embed.footer.as_deref(), embed.author_name.as_deref()]);
        for value in values.flatten() {
            let value = value.trim();
            if !value.is_empty() && !looks_like_url(value) {
                texts.push(value);
            }
        }
    }
    texts.join(" ")
}

/// 看起来是裸链接
pub fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// 消息中需要做文字提取的图片：图片附件与正文中的图片链接
pub fn image_sources(message: &IncomingMessage) -> Vec<ImageSource> {
    let mut sources: Vec<ImageSource> = message
        .attachments
        .iter()
        .filter(|a| a.is_image())
        .map(|a| ImageSource::Url(a.url.clone()))
        .collect();

    for token in message.content.split_whitespace() {
        let lower = token.to_lowercase();
        let is_image = [".png", ".jpg", ".jpeg"].iter().any(|ext| lower.ends_with(ext));
        if looks_like_url(&lower) && is_image {
            let source = ImageSource::Url(token.to_string());
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
    }
    sources
}

/// 按空白切词并逐词做英文词干化，结果为小写
pub fn stem_text(text: &str) -> String {
    let stemmer = Stemmer::create(Algorithm::English);
    text.split_whitespace()
        .map(|word| stemmer.stem(&word.to_lowercase()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
