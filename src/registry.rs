//! Highlight 注册表 - 按 (guild, 作用域, 用户) 存放 highlight
//!
//! 所有修改先在锁外完成整批校验，再在一次写锁内提交；
//! 任何一项失败都不会留下部分写入，读者不会看到写了一半的列表。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::config::HighlightConfig;
use crate::error::{HighlightError, Result};
use crate::model::{ChannelId, GuildId, HighlightPattern, PatternKind, PatternMode, PatternSetting, Scope, UserId};
use crate::pattern::PatternCompiler;

/// `remove` 的参数是否指向该 highlight：正则按原文比较，其余模式存储时已转小写
fn refers_to(pattern: &HighlightPattern, word: &str) -> bool {
    match pattern.kind {
        PatternKind::Regex { .. } => pattern.text() == word,
        _ => pattern.text().eq_ignore_ascii_case(word),
    }
}

/// 每个作用域内：用户 -> 有序 highlight 列表
pub type ViewerPatterns = BTreeMap<UserId, Vec<HighlightPattern>>;

/// 添加请求
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub owner: UserId,
    pub guild: GuildId,
    pub scope: Scope,
    pub words: Vec<String>,
    pub mode: PatternMode,
    pub setting: Option<PatternSetting>,
}

/// 删除结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: Vec<String>,
    /// 本来就没有注册的词
    pub missing: Vec<String>,
}

/// 内存注册表
pub struct PatternRegistry {
    config: HighlightConfig,
    compiler: Arc<PatternCompiler>,
    scopes: RwLock<HashMap<(GuildId, Scope), ViewerPatterns>>,
}

impl PatternRegistry {
    pub fn new(config: HighlightConfig, compiler: Arc<PatternCompiler>) -> Self {
        Self {
            config,
            compiler,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    /// 共享的编译器（匹配阶段复用同一份缓存）
    pub fn compiler(&self) -> Arc<PatternCompiler> {
        Arc::clone(&self.compiler)
    }

    pub fn config(&self) -> &HighlightConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<(GuildId, Scope), ViewerPatterns>> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<(GuildId, Scope), ViewerPatterns>> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 标准化并校验单个词
    fn prepare(&self, word: &str, mode: PatternMode) -> Result<PatternKind> {
        let trimmed = word.trim();
        if trimmed.is_empty() {
            return Err(HighlightError::invalid(word, "highlight cannot be empty"));
        }

        let kind = match mode {
            PatternMode::Regex => PatternKind::new(mode, trimmed),
            _ => {
                let text = trimmed.to_lowercase();
                let len = text.chars().count();
                if len < self.config.min_pattern_len {
                    return Err(HighlightError::invalid(
                        text,
                        format!("must be at least {} characters long", self.config.min_pattern_len),
                    ));
                }
                if len > self.config.max_pattern_len {
                    return Err(HighlightError::invalid(
                        text,
                        format!("cannot be more than {} characters long", self.config.max_pattern_len),
                    ));
                }
                PatternKind::new(mode, text)
            }
        };

        self.compiler.validate(&kind)?;
        Ok(kind)
    }

    /// 添加一批 highlight；任一失败则整批不写入
    pub fn add(&self, request: AddRequest) -> Result<Vec<HighlightPattern>> {
        let mut kinds: Vec<PatternKind> = Vec::new();
        for word in &request.words {
            let kind = self.prepare(word, request.mode)?;
            if !kinds.iter().any(|k| k.text() == kind.text()) {
                kinds.push(kind);
            }
        }

        let key = (request.guild, request.scope);
        let mut scopes = self.write();

        let existing = scopes
            .get(&key)
            .and_then(|v| v.get(&request.owner))
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        if let Some(dup) = kinds
            .iter()
            .find(|k| existing.iter().any(|p| p.text() == k.text()))
        {
            return Err(HighlightError::invalid(
                dup.text(),
                format!("already in your {} highlights", request.scope),
            ));
        }

        let limit = match request.scope {
            Scope::Guild => self.config.guild_limit,
            Scope::Channel(_) => self.config.channel_limit,
        };
        if existing.len() + kinds.len() > limit {
            return Err(HighlightError::LimitExceeded {
                limit,
                scope: request.scope,
            });
        }

        if let Scope::Channel(channel) = request.scope {
            if existing.is_empty() {
                let used = Self::channels_used(&scopes, request.guild, request.owner, channel);
                if used >= self.config.max_channels {
                    return Err(HighlightError::ChannelLimitExceeded {
                        limit: self.config.max_channels,
                    });
                }
            }
        }

        let added: Vec<HighlightPattern> = kinds
            .into_iter()
            .map(|kind| HighlightPattern {
                owner: request.owner,
                guild: request.guild,
                scope: request.scope,
                kind,
                setting: request.setting,
            })
            .collect();

        scopes
            .entry(key)
            .or_default()
            .entry(request.owner)
            .or_default()
            .extend(added.iter().cloned());

        info!(
            owner = %request.owner,
            guild = %request.guild,
            scope = %request.scope,
            count = added.len(),
            "Highlights added"
        );
        Ok(added)
    }

    /// 用户在 guild 内拥有 highlight 的其他频道数量
    fn channels_used(
        scopes: &HashMap<(GuildId, Scope), ViewerPatterns>,
        guild: GuildId,
        owner: UserId,
        except: ChannelId,
    ) -> usize {
        scopes
            .iter()
            .filter(|((g, scope), viewers)| {
                *g == guild
                    && matches!(scope, Scope::Channel(c) if *c != except)
                    && viewers.get(&owner).is_some_and(|v| !v.is_empty())
            })
            .count()
    }

    /// 删除 highlight
    pub fn remove(&self, owner: UserId, guild: GuildId, scope: Scope, words: &[String]) -> RemoveOutcome {
        let mut outcome = RemoveOutcome::default();
        let mut scopes = self.write();
        let list = scopes
            .get_mut(&(guild, scope))
            .and_then(|v| v.get_mut(&owner));

        let Some(list) = list else {
            outcome.missing = words.iter().map(|w| w.trim().to_string()).collect();
            return outcome;
        };

        for word in words {
            let word = word.trim();
            let before = list.len();
            list.retain(|p| !refers_to(p, word));
            if list.len() < before {
                outcome.removed.push(word.to_string());
            } else {
                outcome.missing.push(word.to_string());
            }
        }
        outcome
    }

    /// 清空用户在 guild 内的所有 highlight，返回删除数量
    pub fn clear(&self, owner: UserId, guild: GuildId) -> usize {
        let mut scopes = self.write();
        let mut removed = 0;
        for ((g, _), viewers) in scopes.iter_mut() {
            if *g == guild {
                if let Some(list) = viewers.remove(&owner) {
                    removed += list.len();
                }
            }
        }
        info!(owner = %owner, guild = %guild, removed, "Highlights cleared");
        removed
    }

    /// 把一个频道的 highlight 复制（替换）到其他频道，返回写入的频道数
    pub fn sync(&self, owner: UserId, guild: GuildId, base: ChannelId, targets: &[ChannelId]) -> Result<usize> {
        let mut scopes = self.write();
        let base_list = scopes
            .get(&(guild, Scope::Channel(base)))
            .and_then(|v| v.get(&owner))
            .cloned()
            .unwrap_or_default();
        if base_list.is_empty() {
            return Ok(0);
        }

        let targets: Vec<ChannelId> = {
            let mut t: Vec<ChannelId> = targets.iter().copied().filter(|c| *c != base).collect();
            t.sort();
            t.dedup();
            t
        };

        let mut channels: Vec<ChannelId> = scopes
            .iter()
            .filter_map(|((g, scope), viewers)| match scope {
                Scope::Channel(c) if *g == guild && viewers.get(&owner).is_some_and(|v| !v.is_empty()) => Some(*c),
                _ => None,
            })
            .collect();
        channels.extend(targets.iter().copied());
        channels.sort();
        channels.dedup();
        if channels.len() > self.config.max_channels {
            return Err(HighlightError::ChannelLimitExceeded {
                limit: self.config.max_channels,
            });
        }

        for channel in &targets {
            let copied = base_list
                .iter()
                .cloned()
                .map(|mut p| {
                    p.scope = Scope::Channel(*channel);
                    p
                })
                .collect();
            scopes
                .entry((guild, Scope::Channel(*channel)))
                .or_default()
                .insert(owner, copied);
        }
        Ok(targets.len())
    }

    /// 用户在单个作用域的 highlight
    pub fn list(&self, owner: UserId, guild: GuildId, scope: Scope) -> Vec<HighlightPattern> {
        self.read()
            .get(&(guild, scope))
            .and_then(|v| v.get(&owner))
            .cloned()
            .unwrap_or_default()
    }

    /// 用户在 guild 内所有作用域的 highlight
    pub fn list_all(&self, owner: UserId, guild: GuildId) -> BTreeMap<Scope, Vec<HighlightPattern>> {
        self.read()
            .iter()
            .filter(|((g, _), _)| *g == guild)
            .filter_map(|((_, scope), viewers)| {
                viewers
                    .get(&owner)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*scope, v.clone()))
            })
            .collect()
    }

    /// guild 级 highlight
    pub fn guild_patterns(&self, guild: GuildId) -> ViewerPatterns {
        self.read().get(&(guild, Scope::Guild)).cloned().unwrap_or_default()
    }

    /// 频道级 highlight
    pub fn channel_patterns(&self, guild: GuildId, channel: ChannelId) -> ViewerPatterns {
        self.read()
            .get(&(guild, Scope::Channel(channel)))
            .cloned()
            .unwrap_or_default()
    }

    /// 某个频道内生效的全部 highlight，按用户合并
    pub fn patterns_for_message(&self, guild: GuildId, channel: ChannelId) -> ViewerPatterns {
        merge_patterns(self.guild_patterns(guild), self.channel_patterns(guild, channel))
    }

    /// 单个用户在某个频道内生效的 highlight
    pub fn patterns_for(&self, guild: GuildId, channel: ChannelId, viewer: UserId) -> Vec<HighlightPattern> {
        let mut out = self.list(viewer, guild, Scope::Guild);
        out.extend(self.list(viewer, guild, Scope::Channel(channel)));
        out
    }

    /// 全部 highlight（快照用）
    pub fn all(&self) -> Vec<HighlightPattern> {
        let scopes = self.read();
        let mut keys: Vec<&(GuildId, Scope)> = scopes.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| scopes[k].values().flatten().cloned())
            .collect()
    }

    /// 载入 highlight（快照用），不做限额检查
    pub fn load(&self, patterns: Vec<HighlightPattern>) {
        let mut scopes = self.write();
        for pattern in patterns {
            scopes
                .entry((pattern.guild, pattern.scope))
                .or_default()
                .entry(pattern.owner)
                .or_default()
                .push(pattern);
        }
    }
}

/// 合并 guild 级与频道级 highlight；同一用户两者都保留
pub fn merge_patterns(guild: ViewerPatterns, channel: ViewerPatterns) -> ViewerPatterns {
    let mut merged = guild;
    for (viewer, patterns) in channel {
        merged.entry(viewer).or_default().extend(patterns);
    }
    merged.retain(|_, v| !v.is_empty());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: GuildId = GuildId(1);
    const ALICE: UserId = UserId(10);
    const BOB: UserId = UserId(11);

    fn registry() -> PatternRegistry {
        PatternRegistry::new(HighlightConfig::default(), Arc::new(PatternCompiler::default()))
    }

    fn request(owner: UserId, scope: Scope, words: &[&str], mode: PatternMode) -> AddRequest {
        AddRequest {
            owner,
            guild: G,
            scope,
            words: words.iter().map(|w| w.to_string()).collect(),
            mode,
            setting: None,
        }
    }

    #[test]
    fn test_add_normalizes_words() {
        let reg = registry();
        let added = reg
            .add(request(ALICE, Scope::Guild, &["  Alpha ", "alpha", "Beta"], PatternMode::Literal))
            .unwrap();
        let texts: Vec<&str> = added.iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_regex_keeps_case() {
        let reg = registry();
        let added = reg
            .add(request(ALICE, Scope::Guild, &[r"\Bfoo\S+"], PatternMode::Regex))
            .unwrap();
        assert_eq!(added[0].text(), r"\Bfoo\S+");
    }

    #[test]
    fn test_invalid_regex_leaves_list_unchanged() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["alpha"], PatternMode::Literal)).unwrap();
        let err = reg
            .add(request(ALICE, Scope::Guild, &["ok", "(bad"], PatternMode::Regex))
            .unwrap_err();
        assert!(matches!(err, HighlightError::InvalidPattern { .. }));
        assert_eq!(reg.list(ALICE, G, Scope::Guild).len(), 1);
    }

    #[test]
    fn test_length_bounds() {
        let reg = registry();
        assert!(reg.add(request(ALICE, Scope::Guild, &["a"], PatternMode::Literal)).is_err());
        let long = "x".repeat(51);
        assert!(reg.add(request(ALICE, Scope::Guild, &[&long], PatternMode::Wildcard)).is_err());
        assert!(reg.add(request(ALICE, Scope::Guild, &["ab"], PatternMode::Literal)).is_ok());
    }

    #[test]
    fn test_duplicate_rejected_per_scope() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["alpha"], PatternMode::Literal)).unwrap();
        let err = reg
            .add(request(ALICE, Scope::Guild, &["ALPHA"], PatternMode::Wildcard))
            .unwrap_err();
        assert!(err.to_string().contains("already"));
        // 其他作用域与其他用户不冲突
        reg.add(request(ALICE, Scope::Channel(ChannelId(5)), &["alpha"], PatternMode::Literal))
            .unwrap();
        reg.add(request(BOB, Scope::Guild, &["alpha"], PatternMode::Literal)).unwrap();
    }

    #[test]
    fn test_guild_limit_is_atomic() {
        let reg = registry();
        let words: Vec<String> = (0..24).map(|i| format!("word{i}")).collect();
        let refs: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        reg.add(request(ALICE, Scope::Guild, &refs, PatternMode::Literal)).unwrap();

        let err = reg
            .add(request(ALICE, Scope::Guild, &["one", "two"], PatternMode::Literal))
            .unwrap_err();
        assert!(matches!(err, HighlightError::LimitExceeded { limit: 25, scope: Scope::Guild }));
        assert_eq!(reg.list(ALICE, G, Scope::Guild).len(), 24);

        reg.add(request(ALICE, Scope::Guild, &["one"], PatternMode::Literal)).unwrap();
        assert_eq!(reg.list(ALICE, G, Scope::Guild).len(), 25);
    }

    #[test]
    fn test_channel_count_limit() {
        let config = HighlightConfig {
            max_channels: 2,
            ..HighlightConfig::default()
        };
        let reg = PatternRegistry::new(config, Arc::new(PatternCompiler::default()));
        for c in 1..=2 {
            reg.add(request(ALICE, Scope::Channel(ChannelId(c)), &["alpha"], PatternMode::Literal))
                .unwrap();
        }
        // 已有频道可以继续添加
        reg.add(request(ALICE, Scope::Channel(ChannelId(1)), &["beta"], PatternMode::Literal))
            .unwrap();
        let err = reg
            .add(request(ALICE, Scope::Channel(ChannelId(3)), &["alpha"], PatternMode::Literal))
            .unwrap_err();
        assert!(matches!(err, HighlightError::ChannelLimitExceeded { limit: 2 }));
    }

    #[test]
    fn test_remove_and_clear() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["alpha", "beta"], PatternMode::Literal)).unwrap();
        reg.add(request(ALICE, Scope::Channel(ChannelId(5)), &["gamma"], PatternMode::Literal))
            .unwrap();

        let outcome = reg.remove(ALICE, G, Scope::Guild, &["Alpha".to_string(), "zeta".to_string()]);
        assert_eq!(outcome.removed, vec!["Alpha"]);
        assert_eq!(outcome.missing, vec!["zeta"]);

        assert_eq!(reg.clear(ALICE, G), 2);
        assert!(reg.list_all(ALICE, G).is_empty());
    }

    #[test]
    fn test_remove_regex_is_case_sensitive() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["A", "a"], PatternMode::Regex)).unwrap();
        assert_eq!(reg.list(ALICE, G, Scope::Guild).len(), 2);

        let outcome = reg.remove(ALICE, G, Scope::Guild, &["a".to_string()]);
        assert_eq!(outcome.removed, vec!["a"]);
        let texts: Vec<String> = reg
            .list(ALICE, G, Scope::Guild)
            .iter()
            .map(|p| p.text().to_string())
            .collect();
        assert_eq!(texts, vec!["A"]);
    }

    #[test]
    fn test_patterns_for_message_merges_scopes() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["alpha"], PatternMode::Literal)).unwrap();
        reg.add(request(ALICE, Scope::Channel(ChannelId(5)), &["beta"], PatternMode::Literal))
            .unwrap();
        reg.add(request(BOB, Scope::Channel(ChannelId(6)), &["gamma"], PatternMode::Literal))
            .unwrap();

        let merged = reg.patterns_for_message(G, ChannelId(5));
        assert_eq!(merged.len(), 1);
        let texts: Vec<&str> = merged[&ALICE].iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);

        assert_eq!(reg.patterns_for(G, ChannelId(6), BOB).len(), 1);
    }

    #[test]
    fn test_sync_replaces_targets() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Channel(ChannelId(5)), &["alpha", "beta"], PatternMode::Literal))
            .unwrap();
        reg.add(request(ALICE, Scope::Channel(ChannelId(6)), &["old"], PatternMode::Literal))
            .unwrap();

        let synced = reg.sync(ALICE, G, ChannelId(5), &[ChannelId(6), ChannelId(7), ChannelId(5)]).unwrap();
        assert_eq!(synced, 2);
        let texts: Vec<String> = reg
            .list(ALICE, G, Scope::Channel(ChannelId(6)))
            .into_iter()
            .map(|p| p.text().to_string())
            .collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
        assert_eq!(
            reg.list(ALICE, G, Scope::Channel(ChannelId(7)))[0].scope,
            Scope::Channel(ChannelId(7))
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let reg = registry();
        reg.add(request(ALICE, Scope::Guild, &["alpha"], PatternMode::Literal)).unwrap();
        let other = registry();
        other.load(reg.all());
        assert_eq!(other.list(ALICE, G, Scope::Guild), reg.list(ALICE, G, Scope::Guild));
    }
}
