//! 进程内状态 - 每个 guild 的活动记录、冷却记录与频道历史
//!
//! 状态只在内存中，重启丢失可以接受。所有时间戳只会前进，不会回退。

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::model::{ChannelId, GuildId, UserId};

/// 用户最近活动：user -> (位置 -> 最后活动时间)
#[derive(Debug, Default)]
pub struct ActivityState {
    seen: Mutex<HashMap<UserId, HashMap<ChannelId, DateTime<Utc>>>>,
}

impl ActivityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录活动（只会前进）
    pub fn record(&self, user: UserId, location: ChannelId, at: DateTime<Utc>) {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = seen.entry(user).or_default().entry(location).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }

    /// 某个位置的最后活动时间
    pub fn last_seen(&self, user: UserId, location: ChannelId) -> Option<DateTime<Utc>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .and_then(|m| m.get(&location))
            .copied()
    }

    /// 窗口内有活动的位置
    pub fn active_locations(&self, user: UserId, now: DateTime<Utc>, window: Duration) -> Vec<ChannelId> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(locations) = seen.get(&user) else {
            return Vec::new();
        };
        let mut active: Vec<ChannelId> = locations
            .iter()
            .filter(|(_, at)| now.signed_duration_since(**at) < window)
            .map(|(loc, _)| *loc)
            .collect();
        active.sort();
        active
    }
}

/// 用户最后一次收到通知的时间
#[derive(Debug, Default)]
pub struct CooldownState {
    notified: Mutex<HashMap<UserId, DateTime<Utc>>>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_notified(&self, user: UserId) -> Option<DateTime<Utc>> {
        self.notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .copied()
    }

    /// 是否仍在冷却中（只读检查）
    pub fn is_cooling(&self, user: UserId, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_notified(user)
            .is_some_and(|last| now.signed_duration_since(last) < cooldown)
    }

    /// 检查并占用冷却：不在冷却中时写入 `now` 并返回 true
    ///
    /// 检查与写入在同一把锁内完成，同一窗口内并发的两条消息只有一条能成功。
    pub fn try_claim(&self, user: UserId, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let mut notified = self.notified.lock().unwrap_or_else(PoisonError::into_inner);
        match notified.get(&user) {
            // 早于上次通知的消息同样视为冷却中
            Some(last) if now.signed_duration_since(*last) < cooldown => false,
            _ => {
                notified.insert(user, now);
                true
            }
        }
    }
}

/// 历史中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
}

/// 每个频道最近的消息，用于通知上下文
#[derive(Debug)]
pub struct HistoryBuffer {
    limit: usize,
    lines: Mutex<HashMap<ChannelId, VecDeque<HistoryLine>>>,
}

impl HistoryBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            lines: Mutex::new(HashMap::new()),
        }
    }

    /// 当前消息之前的历史（旧的在前）
    pub fn recent(&self, channel: ChannelId) -> Vec<HistoryLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn push(&self, channel: ChannelId, line: HistoryLine) {
        if self.limit == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = lines.entry(channel).or_default();
        queue.push_back(line);
        while queue.len() > self.limit {
            queue.pop_front();
        }
    }
}

/// 单个 guild 的处理上下文，沿分发调用链显式传递
#[derive(Debug)]
pub struct GuildContext {
    pub guild_id: GuildId,
    pub activity: ActivityState,
    pub cooldowns: CooldownState,
    pub history: HistoryBuffer,
}

impl GuildContext {
    pub fn new(guild_id: GuildId, history_limit: usize) -> Self {
        Self {
            guild_id,
            activity: ActivityState::new(),
            cooldowns: CooldownState::new(),
            history: HistoryBuffer::new(history_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_activity_is_monotonic() {
        let state = ActivityState::new();
        state.record(UserId(1), ChannelId(5), t(100));
        state.record(UserId(1), ChannelId(5), t(50));
        assert_eq!(state.last_seen(UserId(1), ChannelId(5)), Some(t(100)));
    }

    #[test]
    fn test_active_locations_window() {
        let state = ActivityState::new();
        state.record(UserId(1), ChannelId(5), t(0));
        state.record(UserId(1), ChannelId(6), t(250));
        let active = state.active_locations(UserId(1), t(310), Duration::seconds(300));
        assert_eq!(active, vec![ChannelId(6)]);
        assert!(state.active_locations(UserId(2), t(310), Duration::seconds(300)).is_empty());
    }

    #[test]
    fn test_try_claim_blocks_within_window() {
        let state = CooldownState::new();
        let cd = Duration::seconds(60);
        assert!(state.try_claim(UserId(1), t(0), cd));
        assert!(state.is_cooling(UserId(1), t(30), cd));
        assert!(!state.try_claim(UserId(1), t(59), cd));
        assert!(state.try_claim(UserId(1), t(60), cd));
        assert_eq!(state.last_notified(UserId(1)), Some(t(60)));
        // 其他用户不受影响
        assert!(state.try_claim(UserId(2), t(61), cd));
    }

    #[test]
    fn test_try_claim_never_rolls_back() {
        let state = CooldownState::new();
        assert!(state.try_claim(UserId(1), t(500), Duration::zero()));
        assert!(!state.try_claim(UserId(1), t(100), Duration::zero()));
        assert_eq!(state.last_notified(UserId(1)), Some(t(500)));
    }

    #[test]
    fn test_history_buffer_is_bounded() {
        let history = HistoryBuffer::new(2);
        for i in 0..3 {
            history.push(
                ChannelId(1),
                HistoryLine {
                    timestamp: t(i),
                    author: "a".into(),
                    content: format!("m{i}"),
                },
            );
        }
        let lines: Vec<String> = history.recent(ChannelId(1)).into_iter().map(|l| l.content).collect();
        assert_eq!(lines, vec!["m1", "m2"]);
        assert!(history.recent(ChannelId(2)).is_empty());
    }
}
