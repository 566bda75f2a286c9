//! 通知投递层 - payload 构造、渠道抽象与投递队列
//!
//! # 组成
//! 1. `NotificationChannel`：所有渠道实现的统一接口
//! 2. `PayloadBuilder`：把命中结果与频道历史组装成私信
//! 3. `DeliveryQueue`：有界队列，单个消费者按固定间隔发送
//!
//! # 使用示例
//! ```ignore
//! use chat_highlight::notification::{DeliveryQueue, LocalFileChannel};
//!
//! let queue = DeliveryQueue::from_config(Arc::new(LocalFileChannel::default()), &config);
//! queue.send(&payload).await?;
//! let summary = queue.shutdown().await;
//! ```

pub mod channel;
pub mod channels;
pub mod payload;
pub mod queue;

pub use channel::{NotificationChannel, SendResult};
pub use channels::{LocalFileChannel, StdoutChannel};
pub use payload::{highlight_preview, JumpAction, NotificationPayload, PayloadBuilder, PayloadField};
pub use queue::{DeliveryQueue, DeliverySummary};
