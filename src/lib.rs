//! Chat Highlight - 聊天消息关键词订阅、匹配与私信通知引擎

pub mod cli;
pub mod commands;
pub mod config;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod model;
pub mod notification;
pub mod ocr;
pub mod pattern;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod snapshot;
pub mod state;

pub use commands::{DryRunLine, HighlightService};
pub use config::HighlightConfig;
pub use content::{ContentNormalizer, NormalizedMessage};
pub use dispatcher::Dispatcher;
pub use error::{HighlightError, Result};
pub use gate::{ChannelPermissions, GateDecision, LastSeenPolicy, MemberDirectory, NotificationGate, OpenDirectory, PresencePolicy, SkipReason};
pub use model::{
    ActivityEvent, ActivityKind, Attachment, ChannelId, Embed, EmbedField, EntityId, GuildId, HighlightPattern,
    IncomingMessage, MessageId, PatternKind, PatternMode, PatternSetting, RoleId, Scope, UserId,
};
pub use notification::{
    DeliveryQueue, DeliverySummary, JumpAction, LocalFileChannel, NotificationChannel, NotificationPayload,
    PayloadBuilder, SendResult, StdoutChannel,
};
pub use ocr::{ImageSource, NoopExtractor, OcrSpaceConfig, OcrSpaceExtractor, TextExtractor};
pub use pattern::{CompileOptions, MatchSpan, Matcher, PatternCompiler};
pub use registry::{merge_patterns, AddRequest, PatternRegistry, RemoveOutcome, ViewerPatterns};
pub use resolver::{humanize_list, ContentCategory, MatchEntry, MatchResolver, MatchSet};
pub use settings::{GuildSettings, LastSeenSettings, SettingsStore, Toggle, ViewerSettings};
pub use snapshot::{SnapshotStore, StateFile};
pub use state::{ActivityState, CooldownState, GuildContext, HistoryBuffer, HistoryLine};
