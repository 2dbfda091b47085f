use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kcp-tunnel")]
#[command(author, version, about = "Multiplex TCP connections over a KCP channel", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志详细程度（-v info, -vv debug, -vvv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行服务器模式（接受方）
    Server {
        /// 配置文件路径
        #[arg(short, long, default_value = "server.toml")]
        config: String,
    },
    /// 运行客户端模式（发起方）
    Client {
        /// 配置文件路径
        #[arg(short, long, default_value = "client.toml")]
        config: String,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,

        /// 输出格式 (text, json)
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// 生成示例配置
    Template {
        /// 配置类型 (server, client)
        #[arg(value_parser = ["server", "client"])]
        template_type: String,

        /// 输出文件路径（默认打印到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
}

impl Cli {
    /// 根据 `-v` 次数选择日志过滤级别
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
