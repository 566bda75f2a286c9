//! PatternCompiler - 带缓存的匹配器工厂
//!
//! 同一 (文本, 模式) 只编译一次，缓存按内容寻址，多个用户注册相同
//! 的 highlight 时共享同一个 `Matcher`。

use regex::RegexBuilder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::matcher::Matcher;
use super::wildcard;
use crate::config::HighlightConfig;
use crate::error::{HighlightError, Result};
use crate::model::{PatternKind, PatternMode};

/// wildcard 正则由本模块生成，Unicode 单词类重复多次，编译上限至少为此值
const WILDCARD_SIZE_FLOOR: usize = 8 << 20;

/// 编译参数
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub max_bypass: usize,
    pub affix_allowance: usize,
    pub regex_size_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from(&HighlightConfig::default())
    }
}

impl From<&HighlightConfig> for CompileOptions {
    fn from(config: &HighlightConfig) -> Self {
        Self {
            max_bypass: config.wildcard_max_bypass,
            affix_allowance: config.wildcard_affix_allowance,
            regex_size_limit: config.regex_size_limit,
        }
    }
}

type CacheKey = (String, PatternMode);

/// 带缓存的编译器
pub struct PatternCompiler {
    options: CompileOptions,
    capacity: usize,
    cache: Mutex<HashMap<CacheKey, Arc<Matcher>>>,
}

impl PatternCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self::with_capacity(options, 4096)
    }

    pub fn with_capacity(options: CompileOptions, capacity: usize) -> Self {
        Self {
            options,
            capacity: capacity.max(1),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &HighlightConfig) -> Self {
        Self::with_capacity(CompileOptions::from(config), config.matcher_cache_capacity)
    }

    /// 编译（或从缓存取出）匹配器
    pub fn compile(&self, kind: &PatternKind) -> Result<Arc<Matcher>> {
        let key = (kind.text().to_string(), kind.mode());

        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(matcher) = cache.get(&key) {
                return Ok(Arc::clone(matcher));
            }
        }

        let matcher = Arc::new(self.build(kind)?);

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= self.capacity {
            debug!(entries = cache.len(), "Matcher cache full, clearing");
            cache.clear();
        }
        let entry = cache.entry(key).or_insert(matcher);
        Ok(Arc::clone(entry))
    }

    /// 仅校验能否编译，不写入缓存
    pub fn validate(&self, kind: &PatternKind) -> Result<()> {
        self.build(kind).map(|_| ())
    }

    /// 当前缓存条目数
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn build(&self, kind: &PatternKind) -> Result<Matcher> {
        match kind {
            PatternKind::Literal { text } => {
                let source = format!(r"(?i)\b{}\b", regex::escape(text));
                let regex = RegexBuilder::new(&source)
                    .build()
                    .map_err(|e| HighlightError::invalid(text, e.to_string()))?;
                Ok(Matcher::new(PatternMode::Literal, regex))
            }
            PatternKind::Regex { source } => {
                let regex = RegexBuilder::new(source)
                    .case_insensitive(true)
                    .size_limit(self.options.regex_size_limit)
                    .build()
                    .map_err(|e| HighlightError::invalid(source, error_reason(&e.to_string())))?;
                Ok(Matcher::new(PatternMode::Regex, regex))
            }
            PatternKind::Wildcard { text } => {
                let source = wildcard::build_source(
                    text,
                    self.options.max_bypass,
                    self.options.affix_allowance,
                );
                let regex = RegexBuilder::new(&source)
                    .size_limit(self.options.regex_size_limit.max(WILDCARD_SIZE_FLOOR))
                    .build()
                    .map_err(|e| HighlightError::invalid(text, e.to_string()))?;
                Ok(Matcher::new(PatternMode::Wildcard, regex).with_groups(wildcard::HIT_GROUPS))
            }
        }
    }
}

impl Default for PatternCompiler {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

/// regex 的错误信息是多行的，用户只需要最后一行的原因
fn error_reason(message: &str) -> String {
    message
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(message)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(text: &str) -> PatternKind {
        PatternKind::new(PatternMode::Literal, text)
    }

    #[test]
    fn test_literal_word_boundaries() {
        let compiler = PatternCompiler::default();
        let matcher = compiler.compile(&literal("cat")).unwrap();
        assert_eq!(matcher.find("a CAT sat").unwrap().text, "CAT");
        assert!(!matcher.is_match("category"));
        assert!(!matcher.is_match("concat"));
    }

    #[test]
    fn test_literal_escapes_meta_characters() {
        let compiler = PatternCompiler::default();
        let matcher = compiler.compile(&literal("c++ dev")).unwrap();
        assert!(!matcher.is_match("cc dev"));
        assert!(compiler.compile(&literal("a.b")).unwrap().is_match("see a.b now"));
        assert!(!compiler.compile(&literal("a.b")).unwrap().is_match("see axb now"));
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        let compiler = PatternCompiler::default();
        let matcher = compiler
            .compile(&PatternKind::new(PatternMode::Regex, r"re(d|ed)\w+"))
            .unwrap();
        assert_eq!(matcher.find("REDDIT post").unwrap().text, "REDDIT");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let compiler = PatternCompiler::default();
        let err = compiler
            .validate(&PatternKind::new(PatternMode::Regex, "(unclosed"))
            .unwrap_err();
        match err {
            HighlightError::InvalidPattern { text, reason } => {
                assert_eq!(text, "(unclosed");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(compiler.cached(), 0);
    }

    #[test]
    fn test_compile_is_memoized() {
        let compiler = PatternCompiler::default();
        let a = compiler.compile(&literal("alpha")).unwrap();
        let b = compiler.compile(&literal("alpha")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // 不同模式是不同的缓存条目
        let c = compiler
            .compile(&PatternKind::new(PatternMode::Wildcard, "alpha"))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(compiler.cached(), 2);
    }

    #[test]
    fn test_cache_capacity_bound() {
        let compiler = PatternCompiler::with_capacity(CompileOptions::default(), 2);
        compiler.compile(&literal("one")).unwrap();
        compiler.compile(&literal("two")).unwrap();
        compiler.compile(&literal("three")).unwrap();
        assert!(compiler.cached() <= 2);
    }

    #[test]
    fn test_wildcard_separator_examples() {
        let compiler = PatternCompiler::default();
        let matcher = compiler
            .compile(&PatternKind::new(PatternMode::Wildcard, "spam"))
            .unwrap();
        assert_eq!(matcher.find("s.p.a.m").unwrap().text, "s.p.a.m");
        assert!(matcher.is_match("spaam"));
        assert!(!matcher.is_match("s-p-a-m-m-e-r-i-n-c-h-i-e-f"));
    }

    #[test]
    fn test_wildcard_matches_wherever_literal_does() {
        let compiler = PatternCompiler::default();
        let plain = compiler.compile(&literal("spam")).unwrap();
        let wildcard = compiler
            .compile(&PatternKind::new(PatternMode::Wildcard, "spam"))
            .unwrap();
        for text in ["anti-spam filter", "the spam-filter", "visit spam.com now", "SPAM!"] {
            assert!(plain.is_match(text), "literal should match {text:?}");
            assert_eq!(wildcard.find(text).unwrap().text.to_lowercase(), "spam", "wildcard on {text:?}");
        }
    }

    #[test]
    fn test_wildcard_keeps_non_ascii_letters() {
        let compiler = PatternCompiler::default();
        let matcher = compiler
            .compile(&PatternKind::new(PatternMode::Wildcard, "café"))
            .unwrap();
        assert_eq!(matcher.find("the café opens").unwrap().text, "café");
        assert!(matcher.is_match("CAFE"));
    }
}
