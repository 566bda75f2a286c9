//! 标准输出渠道 - CLI 回放时直接打印通知

use async_trait::async_trait;

use crate::error::Result;
use crate::notification::channel::{NotificationChannel, SendResult};
use crate::notification::payload::{JumpAction, NotificationPayload};

/// 以可读文本打印通知
#[derive(Debug, Default)]
pub struct StdoutChannel;

impl StdoutChannel {
    pub fn new() -> Self {
        Self
    }
}

/// 通知的纯文本形式
pub fn render(payload: &NotificationPayload) -> String {
    let mut out = format!("→ {}\n{}\n", payload.viewer, payload.content);
    out.push_str(&format!("  {}\n", payload.title));
    for line in payload.description.lines() {
        out.push_str(&format!("  │ {line}\n"));
    }
    for field in &payload.fields {
        out.push_str(&format!("  {}: {}\n", field.name, field.value));
    }
    let url = match &payload.action {
        JumpAction::JumpToSource { url } | JumpAction::ViewMessage { url, .. } => url,
    };
    out.push_str(&format!("  [{}] {}\n", payload.action.label(), url));
    out.push_str(&format!("  {} {}", payload.footer, payload.timestamp.format("%Y-%m-%d %H:%M:%S")));
    out
}

#[async_trait]
impl NotificationChannel for StdoutChannel {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<SendResult> {
        println!("{}\n", render(payload));
        Ok(SendResult::Sent)
    }
}
