//! Pattern 编译层 - 把 highlight 定义编译为可复用的匹配器
//!
//! 三种模式：
//! - `Literal`：大小写不敏感，按单词边界匹配
//! - `Regex`：用户提供的正则，注册时编译校验
//! - `Wildcard`：允许字符间夹杂分隔符（`s_p_a_m`、`spaam`）

pub mod compiler;
pub mod matcher;
pub mod wildcard;

pub use compiler::{CompileOptions, PatternCompiler};
pub use matcher::{MatchSpan, Matcher};
