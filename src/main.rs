//! Chat Highlight CLI
//!
//! 在本地状态快照上管理 highlight，并回放消息事件查看会产生哪些通知

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use chat_highlight::cli::{
    format_output, handle_add, handle_block, handle_colour, handle_cooldown, handle_last_seen, handle_list, handle_remove,
    handle_replay, handle_reset, handle_roles, handle_settings, handle_sync, handle_toggle, load_for, load_service, mutate,
    AddArgs, LastSeenArgs, ReplayArgs, Switch, Target, ToggleArg,
};
use chat_highlight::{ChannelId, GuildId, HighlightConfig, IncomingMessage, MessageId, RoleId, SnapshotStore, UserId};

#[derive(Parser)]
#[command(name = "hl")]
#[command(about = "Chat Highlight - 关键词订阅与私信通知引擎")]
#[command(version)]
struct Cli {
    /// 状态快照文件（默认 ~/.config/chat-highlight/state.json）
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// 配置文件（默认 ~/.config/chat-highlight/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 操作的 guild
    #[arg(long, short, global = true, default_value = "0")]
    guild: u64,

    /// 操作的用户
    #[arg(long, short, global = true, default_value = "0")]
    user: u64,

    /// 用户持有的角色（逗号分隔）
    #[arg(long, global = true, value_delimiter = ',')]
    roles: Vec<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 添加 highlight
    Add(AddArgs),
    /// 删除 highlight
    Remove {
        #[arg(required = true)]
        words: Vec<String>,
        /// 频道级 highlight 所在频道
        #[arg(long, short)]
        channel: Option<u64>,
    },
    /// 列出 highlight
    List {
        #[arg(long, short, conflicts_with = "all")]
        channel: Option<u64>,
        /// 列出所有作用域
        #[arg(long, short)]
        all: bool,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 清空当前 guild 内的全部 highlight
    Clear {
        /// 跳过确认
        #[arg(long, short)]
        yes: bool,
    },
    /// 把一个频道的 highlight 复制到其他频道
    Sync {
        base: u64,
        #[arg(required = true)]
        targets: Vec<u64>,
    },
    /// 屏蔽用户或频道
    Block {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// 取消屏蔽
    Unblock {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// 设置冷却（秒）
    Cooldown { secs: u64 },
    /// 开关机器人、embed、图片内容的匹配
    Toggle { kind: ToggleArg, switch: Switch },
    /// 设置通知颜色
    Colour { colour: String },
    /// 设置 last-seen：哪些活动计入、窗口与位置阈值
    LastSeen(LastSeenArgs),
    /// 恢复默认设置
    Reset,
    /// 切换允许使用 highlight 的角色，不带参数时查看
    Roles { ids: Vec<u64> },
    /// 查看当前设置
    Settings {
        #[arg(long)]
        json: bool,
    },
    /// 以 YAML 导出 highlight 与设置
    Export,
    /// 用一段文本试跑 highlight
    Matches {
        #[arg(long, short)]
        channel: Option<u64>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// 回放 JSONL 事件文件
    Replay(ReplayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug hl replay events.jsonl
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_highlight=info,hl=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HighlightConfig::load_from(path)?,
        None => HighlightConfig::load()?,
    };
    let store = SnapshotStore::new(cli.state.clone().unwrap_or_else(SnapshotStore::default_path));
    let roles: Vec<RoleId> = cli.roles.iter().copied().map(RoleId).collect();
    let target = Target {
        guild: GuildId(cli.guild),
        user: UserId(cli.user),
        roles: &roles,
    };
    debug!(state = %store.path().display(), guild = cli.guild, user = cli.user, "Starting hl");

    match cli.command {
        Commands::Add(args) => {
            println!("{}", mutate(&store, &config, target, |s| handle_add(s, target, &args))?);
        }
        Commands::Remove { words, channel } => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_remove(s, target, &words, channel)))?);
        }
        Commands::List { channel, all, json } => {
            let service = load_for(&store, &config, target)?;
            println!("{}", handle_list(&service, target, channel, all, json));
        }
        Commands::Clear { yes } => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!("Remove all of your highlights in guild {}?", cli.guild))
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Cancelled.");
                return Ok(());
            }
            let reply = mutate(&store, &config, target, |s| {
                let removed = s.clear(target.user, target.guild);
                Ok(format!("Removed {removed} highlight(s)."))
            })?;
            println!("{reply}");
        }
        Commands::Sync { base, targets } => {
            println!("{}", mutate(&store, &config, target, |s| handle_sync(s, target, base, &targets))?);
        }
        Commands::Block { ids } => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_block(s, target, &ids, false)))?);
        }
        Commands::Unblock { ids } => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_block(s, target, &ids, true)))?);
        }
        Commands::Cooldown { secs } => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_cooldown(s, target, secs)))?);
        }
        Commands::Toggle { kind, switch } => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_toggle(s, target, kind, switch)))?);
        }
        Commands::Colour { colour } => {
            println!("{}", mutate(&store, &config, target, |s| handle_colour(s, target, &colour))?);
        }
        Commands::LastSeen(args) => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_last_seen(s, target, &args)))?);
        }
        Commands::Roles { ids } => {
            println!("{}", handle_roles(&store, &config, target.guild, &ids)?);
        }
        Commands::Reset => {
            println!("{}", mutate(&store, &config, target, |s| Ok(handle_reset(s, target)))?);
        }
        Commands::Settings { json } => {
            let service = load_for(&store, &config, target)?;
            println!("{}", handle_settings(&service, target, json));
        }
        Commands::Export => {
            let service = load_for(&store, &config, target)?;
            print!("{}", service.export(target.user, target.guild)?);
        }
        Commands::Matches { channel, text } => {
            let service = load_for(&store, &config, target)?;
            let message = IncomingMessage {
                id: MessageId(0),
                guild_id: target.guild,
                guild_name: String::new(),
                channel_id: ChannelId(channel.unwrap_or(0)),
                channel_name: String::new(),
                category_id: None,
                author_id: UserId(0),
                author_name: "hl".to_string(),
                author_is_bot: false,
                content: text.join(" "),
                embeds: Vec::new(),
                attachments: Vec::new(),
                jump_url: String::new(),
                timestamp: Utc::now(),
            };
            let lines = service.dry_run(target.user, &message).await;
            if lines.is_empty() {
                println!("You have no highlights here.");
            }
            for line in lines {
                println!("{}", line.render());
            }
        }
        Commands::Replay(args) => {
            let service = load_service(&store, &config)?;
            let summary = handle_replay(&service, &args).await?;
            println!(
                "{}",
                format_output(&summary, false, |s| format!(
                    "Replayed {} message(s) and {} activity event(s): {} notification(s), {} malformed line(s).",
                    s.messages, s.activities, s.notifications, s.malformed
                ))
            );
        }
    }

    Ok(())
}
