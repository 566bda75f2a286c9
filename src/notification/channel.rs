//! 通知渠道 trait 定义

use async_trait::async_trait;

use super::payload::NotificationPayload;
use crate::error::Result;

/// 发送结果
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// 发送成功
    Sent,
    /// 已进入投递队列
    Queued,
    /// 发送失败
    Failed(String),
}

impl SendResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, SendResult::Failed(_))
    }
}

/// 通知渠道 trait
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// 渠道名称（用于日志）
    fn name(&self) -> &str;

    /// 投递一条通知
    async fn send(&self, payload: &NotificationPayload) -> Result<SendResult>;
}
