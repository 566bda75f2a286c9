//! Dispatcher - 每条 guild 消息的处理入口
//!
//! 1. 记录作者活动
//! 2. 合并 guild 级与频道级 highlight，按用户分组
//! 3. 标准化内容（每条消息一次）
//! 4. 并发处理每个用户：门控 → 匹配 → 占用冷却 → 组装 payload
//! 5. 投递并记录失败
//!
//! 单个用户的失败不影响其他用户。

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::HighlightConfig;
use crate::content::{ContentNormalizer, NormalizedMessage};
use crate::gate::{MemberDirectory, NotificationGate, PresencePolicy};
use crate::model::{ActivityEvent, ActivityKind, HighlightPattern, IncomingMessage, UserId};
use crate::notification::{NotificationChannel, NotificationPayload, PayloadBuilder, SendResult};
use crate::ocr::TextExtractor;
use crate::registry::PatternRegistry;
use crate::resolver::{MatchResolver, MatchSet};
use crate::settings::{SettingsStore, ViewerSettings};
use crate::state::{GuildContext, HistoryLine};

/// 消息分发器
pub struct Dispatcher {
    registry: Arc<PatternRegistry>,
    settings: Arc<SettingsStore>,
    normalizer: ContentNormalizer,
    resolver: MatchResolver,
    gate: NotificationGate,
    payloads: PayloadBuilder,
    /// 为 None 时只返回 payload，不投递
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new(
        config: &HighlightConfig,
        registry: Arc<PatternRegistry>,
        settings: Arc<SettingsStore>,
        directory: Arc<dyn MemberDirectory>,
    ) -> Self {
        Self {
            resolver: MatchResolver::new(registry.compiler(), config.pattern_timeout()),
            registry,
            settings,
            normalizer: ContentNormalizer::new().with_ocr_timeout(config.ocr_timeout()),
            gate: NotificationGate::new(directory, config.cooldown_min_secs),
            payloads: PayloadBuilder::from_config(config),
            channel: None,
        }
    }

    /// 设置投递渠道
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        info!(channel = channel.name(), "Registering notification channel");
        self.channel = Some(channel);
        self
    }

    /// 设置图片文字提取器
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.normalizer = self.normalizer.with_extractor(extractor);
        self
    }

    /// 替换 last-seen 策略
    pub fn with_presence(mut self, presence: Arc<dyn PresencePolicy>) -> Self {
        self.gate = self.gate.with_presence(presence);
        self
    }

    /// 处理一条消息，返回生成的通知（无论是否投递成功）
    pub async fn handle_message(&self, ctx: &GuildContext, message: &IncomingMessage) -> Vec<NotificationPayload> {
        if message.guild_id != ctx.guild_id {
            warn!(
                message_id = %message.id,
                guild_id = %message.guild_id,
                context = %ctx.guild_id,
                "Message routed to the wrong guild context"
            );
            return Vec::new();
        }

        self.record_author(ctx, message);

        let mut viewers = self.registry.patterns_for_message(message.guild_id, message.channel_id);
        viewers.remove(&message.author_id);

        let payloads = if viewers.is_empty() {
            Vec::new()
        } else {
            let candidates: Vec<(UserId, ViewerSettings, Vec<HighlightPattern>)> = viewers
                .into_iter()
                .map(|(viewer, patterns)| (viewer, self.settings.get(message.guild_id, viewer), patterns))
                .collect();
            let include_images = candidates
                .iter()
                .any(|(_, s, patterns)| s.images || patterns.iter().any(|p| p.wants_images()));

            let normalized = self.normalizer.normalize(message, include_images).await;
            let history = ctx.history.recent(message.channel_id);

            let tasks = candidates.iter().map(|(viewer, settings, patterns)| {
                self.evaluate_viewer(ctx, *viewer, settings, patterns, message, &normalized, &history)
            });
            let payloads: Vec<NotificationPayload> = join_all(tasks).await.into_iter().flatten().collect();

            self.deliver(&payloads).await;
            payloads
        };

        ctx.history.push(message.channel_id, HistoryLine::from_message(message));
        debug!(message_id = %message.id, notifications = payloads.len(), "Message dispatched");
        payloads
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_viewer(
        &self,
        ctx: &GuildContext,
        viewer: UserId,
        settings: &ViewerSettings,
        patterns: &[HighlightPattern],
        message: &IncomingMessage,
        normalized: &NormalizedMessage,
        history: &[HistoryLine],
    ) -> Option<NotificationPayload> {
        if !self.gate.should_notify(ctx, viewer, settings, normalized).await.is_eligible() {
            return None;
        }

        let matches = self.resolver.resolve(viewer, settings, patterns, normalized).await;
        if matches.is_empty() {
            return None;
        }

        // 并发的两条消息只有一条能占到冷却
        if !ctx
            .cooldowns
            .try_claim(viewer, message.timestamp, self.gate.effective_cooldown(settings))
        {
            debug!(viewer = %viewer, message_id = %message.id, "Cooldown claimed concurrently");
            return None;
        }

        let highlights: Vec<String> = patterns.iter().map(|p| p.text().to_string()).collect();
        Some(
            self.payloads
                .build(viewer, settings.colour, message, &matches, history, &highlights),
        )
    }

    async fn deliver(&self, payloads: &[NotificationPayload]) {
        let Some(channel) = &self.channel else {
            return;
        };
        for payload in payloads {
            match channel.send(payload).await {
                Ok(SendResult::Failed(reason)) => {
                    warn!(channel = channel.name(), viewer = %payload.viewer, reason = %reason, "Notification delivery failed");
                }
                Ok(result) => {
                    debug!(channel = channel.name(), viewer = %payload.viewer, result = ?result, "Notification handed off");
                }
                Err(e) => {
                    warn!(channel = channel.name(), viewer = %payload.viewer, error = %e, "Notification delivery failed");
                }
            }
        }
    }

    fn record_author(&self, ctx: &GuildContext, message: &IncomingMessage) {
        let settings = self.settings.get(message.guild_id, message.author_id);
        if settings.last_seen.counts(ActivityKind::Message) {
            ctx.activity
                .record(message.author_id, message.location(), message.timestamp);
        }
    }

    /// 轻量活动信号（打字、反应等），只更新 last-seen
    pub fn record_activity(&self, ctx: &GuildContext, event: &ActivityEvent) {
        if event.guild_id != ctx.guild_id {
            return;
        }
        let settings = self.settings.get(event.guild_id, event.user_id);
        if settings.last_seen.counts(event.kind) {
            ctx.activity.record(event.user_id, event.location(), event.timestamp);
        }
    }

    /// 不经过门控、不占用冷却，只看某个用户会命中什么
    pub async fn preview_matches(&self, viewer: UserId, message: &IncomingMessage) -> MatchSet {
        let settings = self.settings.get(message.guild_id, viewer);
        let patterns = self
            .registry
            .patterns_for(message.guild_id, message.channel_id, viewer);
        let include_images = settings.images || patterns.iter().any(|p| p.wants_images());
        let normalized = self.normalizer.normalize(message, include_images).await;
        self.resolver.resolve(viewer, &settings, &patterns, &normalized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::OpenDirectory;
    use crate::model::{ChannelId, GuildId, MessageId, PatternMode, Scope};
    use crate::pattern::PatternCompiler;
    use crate::registry::AddRequest;
    use chrono::{DateTime, Utc};

    const G: GuildId = GuildId(1);
    const CHAN: ChannelId = ChannelId(10);
    const VIEWER: UserId = UserId(100);
    const AUTHOR: UserId = UserId(200);

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (Dispatcher, Arc<PatternRegistry>, Arc<SettingsStore>) {
        let config = HighlightConfig::default();
        let compiler = Arc::new(PatternCompiler::from_config(&config));
        let registry = Arc::new(PatternRegistry::new(config.clone(), compiler));
        let settings = Arc::new(SettingsStore::new(config.clone()));
        let dispatcher = Dispatcher::new(&config, registry.clone(), settings.clone(), Arc::new(OpenDirectory));
        (dispatcher, registry, settings)
    }

    fn add(registry: &PatternRegistry, owner: UserId, word: &str) {
        registry
            .add(AddRequest {
                owner,
                guild: G,
                scope: Scope::Guild,
                words: vec![word.to_string()],
                mode: PatternMode::Literal,
                setting: None,
            })
            .unwrap();
    }

    fn message(id: u64, author: UserId, content: &str, at: DateTime<Utc>) -> IncomingMessage {
        IncomingMessage {
            id: MessageId(id),
            guild_id: G,
            guild_name: "guild".into(),
            channel_id: CHAN,
            channel_name: "general".into(),
            category_id: None,
            author_id: author,
            author_name: format!("user{}", author.0),
            author_is_bot: false,
            content: content.into(),
            embeds: Vec::new(),
            attachments: Vec::new(),
            jump_url: format!("https://chat.example/1/10/{id}"),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_author_never_notifies_self() {
        let (dispatcher, registry, _) = setup();
        add(&registry, VIEWER, "alpha");
        let ctx = GuildContext::new(G, 4);
        let out = dispatcher.handle_message(&ctx, &message(1, VIEWER, "alpha", t(0))).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_history_includes_previous_lines() {
        let (dispatcher, registry, _) = setup();
        add(&registry, VIEWER, "alpha");
        let ctx = GuildContext::new(G, 4);
        for i in 0..5 {
            dispatcher
                .handle_message(&ctx, &message(i, AUTHOR, &format!("line {i}"), t(i as i64)))
                .await;
        }
        let out = dispatcher.handle_message(&ctx, &message(9, AUTHOR, "alpha", t(10))).await;
        assert_eq!(out.len(), 1);
        let lines: Vec<&str> = out[0].description.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("line 1"));
        assert!(lines[4].ends_with("alpha"));
    }

    #[tokio::test]
    async fn test_activity_kinds_respect_settings() {
        let (dispatcher, _, settings) = setup();
        let ctx = GuildContext::new(G, 4);
        settings.set_last_seen_kind(G, VIEWER, ActivityKind::Typing, false);
        let event = ActivityEvent {
            user_id: VIEWER,
            guild_id: G,
            channel_id: CHAN,
            category_id: None,
            kind: ActivityKind::Typing,
            timestamp: t(0),
        };
        dispatcher.record_activity(&ctx, &event);
        assert!(ctx.activity.last_seen(VIEWER, CHAN).is_none());

        dispatcher.record_activity(
            &ctx,
            &ActivityEvent {
                kind: ActivityKind::Reaction,
                ..event
            },
        );
        assert_eq!(ctx.activity.last_seen(VIEWER, CHAN), Some(t(0)));
    }

    #[tokio::test]
    async fn test_preview_ignores_gate() {
        let (dispatcher, registry, _) = setup();
        add(&registry, VIEWER, "alpha");
        let ctx = GuildContext::new(G, 4);
        ctx.activity.record(VIEWER, CHAN, t(0));
        let msg = message(1, AUTHOR, "alpha", t(1));
        assert!(dispatcher.handle_message(&ctx, &msg).await.is_empty());
        assert!(dispatcher.preview_matches(VIEWER, &msg).await.contains("alpha"));
    }

    #[tokio::test]
    async fn test_wrong_guild_is_ignored() {
        let (dispatcher, registry, _) = setup();
        add(&registry, VIEWER, "alpha");
        let ctx = GuildContext::new(GuildId(99), 4);
        assert!(dispatcher.handle_message(&ctx, &message(1, AUTHOR, "alpha", t(0))).await.is_empty());
    }
}
