//! 投递队列 - 有界队列 + 单个按固定间隔发送的消费者
//!
//! 发送失败只记录日志并丢弃；关闭时未发送的通知直接丢弃并计数。

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{NotificationChannel, SendResult};
use super::payload::NotificationPayload;
use crate::config::HighlightConfig;
use crate::error::{HighlightError, Result};

/// 队列统计
#[derive(Debug, Default)]
pub struct DeliveryStats {
    sent: AtomicUsize,
    failed: AtomicUsize,
    rejected: AtomicUsize,
    discarded: AtomicUsize,
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub sent: usize,
    pub failed: usize,
    /// 队列满时被拒绝的数量
    pub rejected: usize,
    /// 关闭时丢弃的数量
    pub discarded: usize,
}

impl DeliveryStats {
    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// 有界投递队列
pub struct DeliveryQueue {
    tx: mpsc::Sender<NotificationPayload>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    stats: Arc<DeliveryStats>,
    target: String,
}

impl DeliveryQueue {
    /// 启动队列，消费者每发送一条后等待 `interval`
    pub fn start(channel: Arc<dyn NotificationChannel>, capacity: usize, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(DeliveryStats::default());
        let target = channel.name().to_string();
        let worker = tokio::spawn(consume(channel, rx, shutdown_rx, interval, Arc::clone(&stats)));
        info!(channel = %target, capacity, interval_ms = interval.as_millis() as u64, "Delivery queue started");
        Self {
            tx,
            shutdown,
            worker,
            stats,
            target,
        }
    }

    pub fn from_config(channel: Arc<dyn NotificationChannel>, config: &HighlightConfig) -> Self {
        Self::start(channel, config.queue_capacity, config.queue_interval())
    }

    pub fn summary(&self) -> DeliverySummary {
        self.stats.summary()
    }

    /// 等待队列中已有的通知全部发送后关闭
    pub async fn drain(self) -> DeliverySummary {
        let DeliveryQueue {
            tx,
            shutdown,
            worker,
            stats,
            ..
        } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Delivery worker terminated abnormally");
        }
        // 关闭信号必须在消费者退出后才释放
        drop(shutdown);
        stats.summary()
    }

    /// 立即关闭，未发送的通知被丢弃
    pub async fn shutdown(self) -> DeliverySummary {
        let DeliveryQueue {
            tx,
            shutdown,
            worker,
            stats,
            target,
        } = self;
        let _ = shutdown.send(true);
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Delivery worker terminated abnormally");
        }
        let summary = stats.summary();
        info!(
            channel = %target,
            sent = summary.sent,
            failed = summary.failed,
            discarded = summary.discarded,
            "Delivery queue stopped"
        );
        summary
    }
}

async fn consume(
    channel: Arc<dyn NotificationChannel>,
    mut rx: mpsc::Receiver<NotificationPayload>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
    stats: Arc<DeliveryStats>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(p) => p,
                None => break,
            },
        };

        match channel.send(&payload).await {
            Ok(SendResult::Failed(reason)) | Err(HighlightError::Delivery { reason, .. }) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(channel = channel.name(), viewer = %payload.viewer, reason = %reason, "Dropping undeliverable notification");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(channel = channel.name(), viewer = %payload.viewer, error = %e, "Dropping undeliverable notification");
            }
            Ok(_) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                debug!(channel = channel.name(), viewer = %payload.viewer, "Notification delivered");
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        stats.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl NotificationChannel for DeliveryQueue {
    fn name(&self) -> &str {
        &self.target
    }

    /// 入队；队列已满时拒绝并记录
    async fn send(&self, payload: &NotificationPayload) -> Result<SendResult> {
        match self.tx.try_send(payload.clone()) {
            Ok(()) => Ok(SendResult::Queued),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %self.target, viewer = %payload.viewer, "Delivery queue full, dropping notification");
                Ok(SendResult::Failed("queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HighlightError::Delivery {
                viewer: payload.viewer,
                reason: "delivery queue closed".to_string(),
            }),
        }
    }
}
