use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "s3uploader-rs",
    version,
    about = "Upload finished video clips to S3, verify them, then free the local disk"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch the directory and upload clips (default)
    Run,

    /// Validate the configuration, the directory and bucket access, then exit
    Check,
}

/// Options shared by every command; each one overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Path to the TOML configuration file
    #[arg(
        short = 'c',
        long,
        env = "S3UPLOADER_CONFIG",
        default_value = "s3_uploader_config.toml",
        global = true
    )]
    pub config: PathBuf,

    /// Directory to watch (overrides [local] video_directory)
    #[arg(short = 'd', long, global = true)]
    pub directory: Option<String>,

    /// Target bucket (overrides [s3] bucket_name)
    #[arg(short = 'b', long, global = true)]
    pub bucket: Option<String>,

    /// Log level (overrides [logging] log_level; RUST_LOG wins over both)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Send sd_notify READY/STATUS/WATCHDOG/STOPPING messages
    #[arg(long, global = true)]
    pub notify_systemd: bool,
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
