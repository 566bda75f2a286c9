//! NotificationGate - 决定一次命中是否应该通知用户
//!
//! 按顺序检查：成员身份、冷却、last-seen、频道权限、屏蔽列表。
//! 任何一项不通过即返回 `Skip`，不再检查后续项。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::content::NormalizedMessage;
use crate::model::{ChannelId, GuildId, UserId};
use crate::settings::{LastSeenSettings, ViewerSettings};
use crate::state::{ActivityState, GuildContext};

/// 用户在某个频道的权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPermissions {
    pub read_messages: bool,
    pub read_history: bool,
}

impl ChannelPermissions {
    pub fn all() -> Self {
        Self {
            read_messages: true,
            read_history: true,
        }
    }

    pub fn can_view(&self) -> bool {
        self.read_messages && self.read_history
    }
}

/// 成员目录（由平台侧实现）
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// 用户是否仍是 guild 成员
    async fn is_member(&self, guild: GuildId, user: UserId) -> bool;

    /// 用户在频道中的权限；无法解析时返回 None
    async fn permissions(&self, guild: GuildId, user: UserId, channel: ChannelId) -> Option<ChannelPermissions>;
}

/// 所有人都是成员且拥有全部权限（CLI 与测试用）
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

#[async_trait]
impl MemberDirectory for OpenDirectory {
    async fn is_member(&self, _guild: GuildId, _user: UserId) -> bool {
        true
    }

    async fn permissions(&self, _guild: GuildId, _user: UserId, _channel: ChannelId) -> Option<ChannelPermissions> {
        Some(ChannelPermissions::all())
    }
}

/// 用户是否"在场"，在场时不通知
pub trait PresencePolicy: Send + Sync {
    fn is_present(
        &self,
        activity: &ActivityState,
        viewer: UserId,
        settings: &LastSeenSettings,
        location: ChannelId,
        now: DateTime<Utc>,
    ) -> bool;
}

/// 默认策略
///
/// 窗口内在同一位置（分类或频道）有活动，或在超过 `category_threshold`
/// 个不同位置有活动时视为在场。
#[derive(Debug, Default, Clone, Copy)]
pub struct LastSeenPolicy;

impl PresencePolicy for LastSeenPolicy {
    fn is_present(
        &self,
        activity: &ActivityState,
        viewer: UserId,
        settings: &LastSeenSettings,
        location: ChannelId,
        now: DateTime<Utc>,
    ) -> bool {
        let window = Duration::seconds(settings.timeout_secs as i64);
        let active = activity.active_locations(viewer, now, window);
        active.contains(&location) || active.len() > settings.category_threshold
    }
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotMember,
    Cooldown,
    RecentlyActive,
    MissingPermissions,
    Blocked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NotMember => "not a member",
            SkipReason::Cooldown => "on cooldown",
            SkipReason::RecentlyActive => "recently active",
            SkipReason::MissingPermissions => "cannot view channel",
            SkipReason::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// 门控结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    Skip(SkipReason),
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, GateDecision::Eligible)
    }
}

/// 通知门控
pub struct NotificationGate {
    directory: Arc<dyn MemberDirectory>,
    presence: Arc<dyn PresencePolicy>,
    /// 全局最小冷却（秒）
    cooldown_floor: u64,
}

impl NotificationGate {
    pub fn new(directory: Arc<dyn MemberDirectory>, cooldown_floor: u64) -> Self {
        Self {
            directory,
            presence: Arc::new(LastSeenPolicy),
            cooldown_floor,
        }
    }

    /// 替换在场策略
    pub fn with_presence(mut self, presence: Arc<dyn PresencePolicy>) -> Self {
        self.presence = presence;
        self
    }

    /// 实际生效的冷却：用户设置与全局最小值取大
    pub fn effective_cooldown(&self, settings: &ViewerSettings) -> Duration {
        Duration::seconds(settings.cooldown_secs.max(self.cooldown_floor) as i64)
    }

    pub async fn should_notify(
        &self,
        ctx: &GuildContext,
        viewer: UserId,
        settings: &ViewerSettings,
        message: &NormalizedMessage,
    ) -> GateDecision {
        let decision = self.check(ctx, viewer, settings, message).await;
        if let GateDecision::Skip(reason) = decision {
            trace!(viewer = %viewer, message_id = %message.message_id, reason = %reason, "Skipping viewer");
        }
        decision
    }

    async fn check(
        &self,
        ctx: &GuildContext,
        viewer: UserId,
        settings: &ViewerSettings,
        message: &NormalizedMessage,
    ) -> GateDecision {
        if !self.directory.is_member(ctx.guild_id, viewer).await {
            return GateDecision::Skip(SkipReason::NotMember);
        }

        let now = message.timestamp;
        if ctx.cooldowns.is_cooling(viewer, now, self.effective_cooldown(settings)) {
            return GateDecision::Skip(SkipReason::Cooldown);
        }

        if self
            .presence
            .is_present(&ctx.activity, viewer, &settings.last_seen, message.location, now)
        {
            return GateDecision::Skip(SkipReason::RecentlyActive);
        }

        let permissions = self
            .directory
            .permissions(ctx.guild_id, viewer, message.channel_id)
            .await;
        if !permissions.is_some_and(|p| p.can_view()) {
            return GateDecision::Skip(SkipReason::MissingPermissions);
        }

        if settings.is_blocked(message.author_id.0) || settings.is_blocked(message.channel_id.0) {
            return GateDecision::Skip(SkipReason::Blocked);
        }

        GateDecision::Eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageId;
    use std::collections::HashSet;

    const G: GuildId = GuildId(1);
    const VIEWER: UserId = UserId(10);

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(at: DateTime<Utc>) -> NormalizedMessage {
        NormalizedMessage {
            message_id: MessageId(1),
            guild_id: G,
            channel_id: ChannelId(100),
            location: ChannelId(100),
            author_id: UserId(20),
            author_is_bot: false,
            timestamp: at,
            body: "hello".into(),
            bot_text: String::new(),
            image_text: String::new(),
            stemmed_body: "hello".into(),
            stemmed_bot: String::new(),
            stemmed_image: String::new(),
        }
    }

    struct Directory {
        members: HashSet<UserId>,
        denied: HashSet<ChannelId>,
    }

    #[async_trait]
    impl MemberDirectory for Directory {
        async fn is_member(&self, _guild: GuildId, user: UserId) -> bool {
            self.members.contains(&user)
        }

        async fn permissions(&self, _guild: GuildId, _user: UserId, channel: ChannelId) -> Option<ChannelPermissions> {
            Some(ChannelPermissions {
                read_messages: true,
                read_history: !self.denied.contains(&channel),
            })
        }
    }

    fn open_gate() -> NotificationGate {
        NotificationGate::new(Arc::new(OpenDirectory), 30)
    }

    #[tokio::test]
    async fn test_eligible_by_default() {
        let ctx = GuildContext::new(G, 4);
        let decision = open_gate()
            .should_notify(&ctx, VIEWER, &ViewerSettings::default(), &message(t(0)))
            .await;
        assert!(decision.is_eligible());
    }

    #[tokio::test]
    async fn test_non_member_is_skipped() {
        let gate = NotificationGate::new(
            Arc::new(Directory {
                members: HashSet::new(),
                denied: HashSet::new(),
            }),
            30,
        );
        let ctx = GuildContext::new(G, 4);
        let decision = gate
            .should_notify(&ctx, VIEWER, &ViewerSettings::default(), &message(t(0)))
            .await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::NotMember));
    }

    #[tokio::test]
    async fn test_missing_history_permission_is_skipped() {
        let gate = NotificationGate::new(
            Arc::new(Directory {
                members: [VIEWER].into_iter().collect(),
                denied: [ChannelId(100)].into_iter().collect(),
            }),
            30,
        );
        let ctx = GuildContext::new(G, 4);
        let decision = gate
            .should_notify(&ctx, VIEWER, &ViewerSettings::default(), &message(t(0)))
            .await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::MissingPermissions));
    }

    #[tokio::test]
    async fn test_cooldown_uses_global_floor() {
        let gate = open_gate();
        let ctx = GuildContext::new(G, 4);
        let settings = ViewerSettings {
            cooldown_secs: 10,
            ..ViewerSettings::default()
        };
        assert_eq!(gate.effective_cooldown(&settings), Duration::seconds(30));

        ctx.cooldowns.try_claim(VIEWER, t(0), gate.effective_cooldown(&settings));
        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(20))).await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::Cooldown));
        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(30))).await;
        assert!(decision.is_eligible());
    }

    #[tokio::test]
    async fn test_recent_activity_in_same_location() {
        let gate = open_gate();
        let ctx = GuildContext::new(G, 4);
        ctx.activity.record(VIEWER, ChannelId(100), t(0));
        let settings = ViewerSettings::default();

        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(299))).await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::RecentlyActive));
        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(300))).await;
        assert!(decision.is_eligible());
    }

    #[test]
    fn test_guild_wide_presence_threshold() {
        let activity = ActivityState::new();
        let settings = LastSeenSettings::default();
        activity.record(VIEWER, ChannelId(1), t(0));
        activity.record(VIEWER, ChannelId(2), t(0));
        assert!(!LastSeenPolicy.is_present(&activity, VIEWER, &settings, ChannelId(100), t(10)));
        activity.record(VIEWER, ChannelId(3), t(0));
        assert!(LastSeenPolicy.is_present(&activity, VIEWER, &settings, ChannelId(100), t(10)));
    }

    #[tokio::test]
    async fn test_blocked_author_and_channel() {
        let gate = open_gate();
        let ctx = GuildContext::new(G, 4);
        let mut settings = ViewerSettings::default();
        settings.blocks.insert(20);
        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(0))).await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::Blocked));

        let mut settings = ViewerSettings::default();
        settings.blocks.insert(100);
        let decision = gate.should_notify(&ctx, VIEWER, &settings, &message(t(0))).await;
        assert_eq!(decision, GateDecision::Skip(SkipReason::Blocked));
    }
}
