//! Replay 命令 - 把 JSONL 事件流送入分发器
//!
//! 每行一个事件：
//! ```text
//! {"event":"message","id":1,"guild_id":1,"channel_id":2,"author_id":3,"content":"alpha","timestamp":"..."}
//! {"event":"activity","user_id":4,"guild_id":1,"channel_id":2,"kind":"typing","timestamp":"..."}
//! ```

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::commands::HighlightService;
use crate::gate::OpenDirectory;
use crate::model::{ActivityEvent, GuildId, IncomingMessage};
use crate::notification::{DeliveryQueue, LocalFileChannel, NotificationChannel, StdoutChannel};
use crate::ocr::{OcrSpaceConfig, OcrSpaceExtractor};
use crate::state::GuildContext;

/// replay 命令参数
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSONL 事件文件
    pub events: PathBuf,

    /// 通知写入的 JSONL 文件（默认打印到标准输出）
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// 通过投递队列按固定间隔发送
    #[arg(long)]
    pub paced: bool,

    /// OCR.space API key，设置后提取图片文字
    #[arg(long)]
    pub ocr_key: Option<String>,
}

/// 事件文件中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ReplayEvent {
    Message(IncomingMessage),
    Activity(ActivityEvent),
}

/// 回放统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub messages: usize,
    pub activities: usize,
    pub notifications: usize,
    pub malformed: usize,
}

/// 读取事件文件，无法解析的行计入 malformed
pub fn read_events(path: &Path) -> Result<(Vec<ReplayEvent>, usize)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut events = Vec::new();
    let mut malformed = 0;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                malformed += 1;
                warn!(line = index + 1, error = %e, "Skipping malformed event");
            }
        }
    }
    Ok((events, malformed))
}

pub async fn handle_replay(service: &HighlightService, args: &ReplayArgs) -> Result<ReplaySummary> {
    let (events, malformed) = read_events(&args.events)?;

    let sink: Arc<dyn NotificationChannel> = match &args.out {
        Some(path) => Arc::new(LocalFileChannel::new(path)),
        None => Arc::new(StdoutChannel::new()),
    };
    let queue = args
        .paced
        .then(|| Arc::new(DeliveryQueue::from_config(Arc::clone(&sink), service.config())));
    let channel: Arc<dyn NotificationChannel> = match &queue {
        Some(queue) => Arc::clone(queue) as Arc<dyn NotificationChannel>,
        None => sink,
    };

    let mut dispatcher = service.dispatcher(Arc::new(OpenDirectory)).with_channel(channel);
    if let Some(key) = &args.ocr_key {
        let extractor = OcrSpaceExtractor::new(OcrSpaceConfig::new(key.clone()))?;
        dispatcher = dispatcher.with_extractor(Arc::new(extractor));
    }

    let history_limit = service.config().history_limit;
    let mut contexts: HashMap<GuildId, GuildContext> = HashMap::new();
    let mut summary = ReplaySummary {
        malformed,
        ..ReplaySummary::default()
    };

    for event in &events {
        match event {
            ReplayEvent::Message(message) => {
                let ctx = contexts
                    .entry(message.guild_id)
                    .or_insert_with(|| GuildContext::new(message.guild_id, history_limit));
                summary.messages += 1;
                summary.notifications += dispatcher.handle_message(ctx, message).await.len();
            }
            ReplayEvent::Activity(activity) => {
                let ctx = contexts
                    .entry(activity.guild_id)
                    .or_insert_with(|| GuildContext::new(activity.guild_id, history_limit));
                summary.activities += 1;
                dispatcher.record_activity(ctx, activity);
            }
        }
    }

    drop(dispatcher);
    if let Some(queue) = queue {
        match Arc::try_unwrap(queue) {
            Ok(queue) => {
                let delivery = queue.drain().await;
                info!(sent = delivery.sent, failed = delivery.failed, "Paced delivery finished");
            }
            Err(_) => warn!("Delivery queue still shared, skipping drain"),
        }
    }

    info!(
        messages = summary.messages,
        activities = summary.activities,
        notifications = summary.notifications,
        "Replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PatternMode, Scope, UserId};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replay_writes_notifications() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events.jsonl");
        let out = dir.path().join("out.jsonl");
        fs::write(
            &events,
            [
                r#"{"event":"message","id":1,"guild_id":1,"channel_id":2,"author_id":3,"content":"Alpha is out","timestamp":"2024-01-01T00:00:00Z"}"#,
                r#"not json"#,
                r#"{"event":"activity","user_id":9,"guild_id":1,"channel_id":2,"kind":"typing","timestamp":"2024-01-01T00:00:10Z"}"#,
                r#"{"event":"message","id":2,"guild_id":1,"channel_id":2,"author_id":3,"content":"alpha again","timestamp":"2024-01-01T00:05:00Z"}"#,
            ]
            .join("\n"),
        )
        .unwrap();

        let service = HighlightService::default();
        service
            .add(UserId(9), GuildId(1), Scope::Guild, vec!["alpha".into()], PatternMode::Literal, None)
            .unwrap();

        let args = ReplayArgs {
            events,
            out: Some(out.clone()),
            paced: false,
            ocr_key: None,
        };
        let summary = handle_replay(&service, &args).await.unwrap();
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.activities, 1);
        assert_eq!(summary.malformed, 1);
        // 第二条消息时用户 290 秒前在同一频道打过字
        assert_eq!(summary.notifications, 1);

        let written = LocalFileChannel::read_all(&out);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].title, "Alpha");
    }
}
