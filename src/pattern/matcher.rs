//! 匹配器 - 编译后的 highlight，纯函数式查找

use regex::Regex;

use crate::model::PatternMode;

/// 一次命中的位置与文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// 编译后的匹配器
#[derive(Debug)]
pub struct Matcher {
    mode: PatternMode,
    regex: Regex,
    /// 命中文本所在的捕获组，按顺序取第一个参与匹配的（wildcard 需要剥离两侧的分隔字符）
    groups: &'static [&'static str],
}

impl Matcher {
    pub(crate) fn new(mode: PatternMode, regex: Regex) -> Self {
        Self {
            mode,
            regex,
            groups: &[],
        }
    }

    pub(crate) fn with_groups(mut self, groups: &'static [&'static str]) -> Self {
        self.groups = groups;
        self
    }

    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    /// 正则文本（调试用）
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// 查找第一个命中
    pub fn find(&self, haystack: &str) -> Option<MatchSpan> {
        let m = if self.groups.is_empty() {
            self.regex.find(haystack)?
        } else {
            let caps = self.regex.captures(haystack)?;
            self.groups.iter().find_map(|name| caps.name(name))?
        };
        Some(MatchSpan {
            start: m.start(),
            end: m.end(),
            text: m.as_str().to_string(),
        })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.find(haystack).is_some()
    }

    /// 是否足够廉价可以直接在调用方线程执行
    pub fn is_cheap(&self) -> bool {
        self.mode == PatternMode::Literal
    }
}
