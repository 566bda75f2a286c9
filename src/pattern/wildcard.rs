//! Wildcard 正则构造
//!
//! 由两个分支组成：
//! - 连写分支：目标字符之间只允许同一字符的重复，`.`、`-` 与空白一样算作
//!   单词边界，前后最多多出 `affix_allowance` 个单词字符
//! - 拼写分支：目标字符之间允许最多 `max_bypass` 个分隔符（`_ - . 空格`）
//!   或重复；整段连续的单词/分隔符字符串只能在核心前后多出
//!   `affix_allowance` 个字符，否则视为别的单词
//!
//! 非 ASCII 字符同时接受原字符与其 ASCII 转写（`é` 也匹配 `e`）。

use deunicode::deunicode;

/// 拼写分支中组成一段"单词"的字符（字母数字、下划线、点、连字符）
const TOKEN_CLASS: &str = r"\w.\-";
/// 分隔符
const SEPARATORS: &str = r" _.\-";

/// 连写分支的捕获组
pub const HIT_GROUP: &str = "hit";
/// 拼写分支的捕获组
pub const SPELLED_GROUP: &str = "spelled";
/// 按优先顺序排列的命中捕获组
pub const HIT_GROUPS: &[&str] = &[HIT_GROUP, SPELLED_GROUP];

/// 单个目标字符可接受的写法（已转义，可直接放进字符类）
fn variants(c: char) -> String {
    let mut out = regex::escape(&c.to_string());
    let folded = deunicode(&c.to_string()).to_lowercase();
    let mut chars = folded.chars();
    if let (Some(f), None) = (chars.next(), chars.next()) {
        if f != c {
            out.push_str(&regex::escape(&f.to_string()));
        }
    }
    out
}

fn core(chars: &[char], gap_extra: &str, max_bypass: usize) -> String {
    let mut core = String::new();
    for (i, c) in chars.iter().enumerate() {
        let accepted = variants(*c);
        core.push_str(&format!("[{accepted}]"));
        if i + 1 < chars.len() {
            core.push_str(&format!("[{gap_extra}{accepted}]{{0,{max_bypass}}}"));
        }
    }
    core
}

/// 为 wildcard 文本构造正则源码
pub fn build_source(text: &str, max_bypass: usize, affix_allowance: usize) -> String {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let joined = core(&chars, "", max_bypass);
    let spelled = core(&chars, SEPARATORS, max_bypass);

    format!(
        concat!(
            r"(?i)(?:^|\W)(?P<{g}>\w{{0,{a}}}{joined}\w{{0,{a}}})(?:$|\W)",
            r"|(?:^|[^{t}])(?P<{s}>[{t}]{{0,{a}}}{spelled}[{t}]{{0,{a}}})(?:$|[^{t}])",
        ),
        t = TOKEN_CLASS,
        g = HIT_GROUP,
        s = SPELLED_GROUP,
        a = affix_allowance,
        joined = joined,
        spelled = spelled,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn hit(pattern: &str, haystack: &str) -> Option<String> {
        let re = Regex::new(&build_source(pattern, 5, 3)).unwrap();
        let caps = re.captures(haystack)?;
        HIT_GROUPS
            .iter()
            .find_map(|g| caps.name(g))
            .map(|m| m.as_str().to_string())
    }

    #[test]
    fn test_separators_between_letters() {
        assert_eq!(hit("spam", "no s.p.a.m here"), Some("s.p.a.m".to_string()));
        assert_eq!(hit("spam", "s_p_a_m"), Some("s_p_a_m".to_string()));
        assert_eq!(hit("spam", "s - p - a - m"), Some("s - p - a - m".to_string()));
    }

    #[test]
    fn test_repeated_letters() {
        assert_eq!(hit("spam", "spaam"), Some("spaam".to_string()));
        assert_eq!(hit("spam", "SSSPAM!"), Some("SSSPAM".to_string()));
    }

    #[test]
    fn test_unrelated_letters_rejected() {
        assert_eq!(hit("spam", "sxpxaxm"), None);
        assert_eq!(hit("spam", "s-p-a-m-m-e-r-i-n-c-h-i-e-f"), None);
    }

    #[test]
    fn test_hyphen_and_period_end_a_word() {
        assert_eq!(hit("spam", "anti-spam filter"), Some("spam".to_string()));
        assert_eq!(hit("spam", "the spam-filter"), Some("spam".to_string()));
        assert_eq!(hit("spam", "visit spam.com now"), Some("spam".to_string()));
        assert_eq!(hit("spam", "anti-spammer"), Some("spammer".to_string()));
    }

    #[test]
    fn test_bypass_bound() {
        // 6 个分隔符超过上限
        assert_eq!(hit("ab", "a______b"), None);
        assert_eq!(hit("ab", "a_____b"), Some("a_____b".to_string()));
    }

    #[test]
    fn test_affix_allowance() {
        assert_eq!(hit("spam", "spammer"), Some("spammer".to_string()));
        assert_eq!(hit("spam", "spammers!"), None);
    }

    #[test]
    fn test_non_ascii_letters() {
        assert_eq!(hit("café", "the café opens"), Some("café".to_string()));
        assert_eq!(hit("café", "a cafe visit"), Some("cafe".to_string()));
        assert_eq!(hit("über", "Ü-b-e-r"), Some("Ü-b-e-r".to_string()));
    }
}
