//! Sorene CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sorene_core::ipc::{IpcRequest, IpcResponse, SessionReport};
use sorene_core::{Phase, Role, format_size};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sorene", version, about = "Sorene - 局域网加密目录传输")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送目录
    Send {
        /// 要发送的根目录
        root: PathBuf,
        /// 根目录下要发送的条目 (不指定则发送整个目录)
        files: Vec<String>,
        /// 接收端 IPv4 地址
        #[arg(long)]
        host: String,
        /// 持续显示进度直到结束
        #[arg(short, long)]
        follow: bool,
    },
    /// 接收目录
    Receive {
        /// 保存目录 (默认: 守护进程配置的下载目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        follow: bool,
    },
    /// 查看当前状态
    Status {
        #[arg(short, long)]
        follow: bool,
    },
    /// 停止传输
    Stop {
        /// 只停止指定角色 (默认: 全部)
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Send,
    Receive,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Send => Role::Send,
            RoleArg::Receive => Role::Receive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            root,
            files,
            host,
            follow,
        } => {
            // 守护进程的工作目录与 CLI 不同
            let root = std::path::absolute(&root)?;
            println!("📤 发送: {} -> {}", root.display(), host);
            let resp = client::send_request(IpcRequest::Send {
                root: root.to_string_lossy().into_owned(),
                files,
                host,
            })
            .await?;
            finish(resp, follow, Some(Role::Send)).await?;
        }
        Commands::Receive { output, follow } => {
            let output = output.map(std::path::absolute).transpose()?;
            println!("📥 接收模式");
            let resp = client::send_request(IpcRequest::Receive {
                output: output.map(|p| p.to_string_lossy().into_owned()),
            })
            .await?;
            finish(resp, follow, Some(Role::Receive)).await?;
        }
        Commands::Status { follow } => {
            if follow {
                follow_sessions(None).await?;
            } else {
                let resp = client::request(&IpcRequest::Status { role: None }).await?;
                if let IpcResponse::Status { sessions } = resp {
                    if sessions.is_empty() {
                        println!("没有会话");
                    }
                    for report in &sessions {
                        println!("{}", render(report));
                    }
                }
            }
        }
        Commands::Stop { role } => {
            println!("⏹️  停止传输");
            client::send_request(IpcRequest::Stop {
                role: role.map(Role::from),
            })
            .await?;
        }
    }

    Ok(())
}

async fn finish(resp: IpcResponse, follow: bool, role: Option<Role>) -> Result<()> {
    match resp {
        IpcResponse::Error { message } => bail!(message),
        _ if follow => follow_sessions(role).await,
        _ => Ok(()),
    }
}

/// 每秒轮询一次，直到所有会话结束；有会话失败时返回错误
async fn follow_sessions(role: Option<Role>) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let IpcResponse::Status { sessions } =
            client::request(&IpcRequest::Status { role }).await?
        else {
            bail!("unexpected response from daemon");
        };

        if sessions.is_empty() {
            println!("没有会话");
            return Ok(());
        }
        for report in &sessions {
            println!("{}", render(report));
        }

        if sessions.iter().all(|s| s.result.is_some()) {
            let failed = sessions
                .iter()
                .filter(|s| s.result.as_ref().is_some_and(|r| !r.success))
                .count();
            if failed > 0 {
                bail!("{} session(s) failed", failed);
            }
            return Ok(());
        }
    }
}

fn render(report: &SessionReport) -> String {
    let status = &report.status;
    if let Some(result) = &report.result {
        return if result.success {
            format!(
                "✅ [{}] {} 个文件, {} 个目录, {}",
                status.role,
                result.stats.files,
                result.stats.directories,
                format_size(result.stats.bytes as f64)
            )
        } else {
            format!(
                "❌ [{}] {}",
                status.role,
                result.reason.as_deref().unwrap_or("failed")
            )
        };
    }

    match status.phase {
        Phase::Handshake => match &report.local_addr {
            Some(addr) => format!("⏳ [{}] 等待连接 ({})", status.role, addr),
            None => format!("⏳ [{}] 握手中", status.role),
        },
        Phase::Streaming | Phase::Finished => {
            let progress = &status.progress;
            let percent = match progress.permille() {
                Some(p) => format!("{:.1}%", f64::from(p) / 10.0),
                None => format_size(progress.now as f64),
            };
            let label = progress.label.as_deref().unwrap_or("收尾中");
            format!(
                "🔄 [{}] {} {}  {}/s  缓冲 {}/{}",
                status.role,
                percent,
                label,
                format_size(status.rate as f64),
                format_size(status.buffer_used as f64),
                format_size(status.buffer_capacity as f64)
            )
        }
    }
}
