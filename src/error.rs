//! 错误类型 - Highlight 引擎的所有失败种类

use std::time::Duration;

use crate::model::{GuildId, Scope, UserId};

/// Highlight 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum HighlightError {
    /// 注册时校验失败（正则无法编译、长度越界、重复）
    #[error("Invalid highlight `{text}`: {reason}")]
    InvalidPattern { text: String, reason: String },

    /// 单个作用域内的 highlight 数量超限
    #[error("Limit of {limit} highlights reached for this {scope}")]
    LimitExceeded { limit: usize, scope: Scope },

    /// 拥有 highlight 的频道数量超限
    #[error("Limit of {limit} channels exceeded")]
    ChannelLimitExceeded { limit: usize },

    /// guild 限定了可用角色，调用者不在其中
    #[error("You are not allowed to use highlights in guild {guild}")]
    NotAllowed { guild: GuildId },

    /// 单个 pattern 匹配超时（仅内部使用，转换为未匹配）
    #[error("Highlight `{pattern}` took longer than {timeout:?} to match")]
    MatchTimeout { pattern: String, timeout: Duration },

    /// 私信投递失败
    #[error("Delivery to {viewer} failed: {reason}")]
    Delivery { viewer: UserId, reason: String },

    /// 图片文字提取失败
    #[error("Text extraction failed: {0}")]
    Extraction(String),
}

impl HighlightError {
    pub(crate) fn invalid(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            text: text.into(),
            reason: reason.into(),
        }
    }

    /// 是否为注册阶段的用户可见错误
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::LimitExceeded { .. }
                | Self::ChannelLimitExceeded { .. }
                | Self::NotAllowed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HighlightError>;
