mod dispatch;
mod fetch;
mod git;
mod job;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dispatch::{ConsoleLogSink, HttpTaskDispatcher, LoggingTaskDispatcher, TaskLogSink};
use dockerizer_build::{
    BuildOrchestrator, Collaborators, CredentialResolver, DockerDaemon, EcrTokenExchange,
    LogSink, PhaseResult, RecipeRenderer, TaskDispatcher,
};
use dockerizer_config::DockerizerConfig;
use fetch::HttpCodeFetcher;
use git::GitCheckout;
use job::JobFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dockerizer")]
#[command(about = "ジョブのソースコードからイメージをビルドしてレジストリに公開する", long_about = None)]
struct Cli {
    /// 設定ファイルのパス
    #[arg(short, long, global = true, env = "DOCKERIZER_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ジョブをビルドしてプッシュ
    Build {
        /// ジョブ定義ファイル (JSON)
        job: PathBuf,
    },
    /// Dockerfile をレンダリングして表示（ソースコードは展開済みであること）
    Render {
        /// ジョブ定義ファイル (JSON)
        job: PathBuf,
    },
    /// 設定された全レジストリにログイン
    Login,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("dockerizer {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config =
        dockerizer_config::load(cli.config.as_deref()).context("設定の読み込みに失敗しました")?;

    match cli.command {
        Commands::Build { job } => {
            if !build(config, &job).await? {
                std::process::exit(1);
            }
        }
        Commands::Render { job } => render(&config, &job)?,
        Commands::Login => login(&config).await?,
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}

fn collaborators(config: &DockerizerConfig) -> anyhow::Result<Collaborators> {
    let daemon = DockerDaemon::connect()
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Dockerに接続できません")?;

    // 送信先が設定されていればログもタスクとして送る
    let (dispatcher, log_sink): (Arc<dyn TaskDispatcher>, Arc<dyn LogSink>) =
        match &config.dispatcher.endpoint {
            Some(endpoint) => {
                let dispatcher: Arc<dyn TaskDispatcher> =
                    Arc::new(HttpTaskDispatcher::new(endpoint));
                let log_sink: Arc<dyn LogSink> = Arc::new(TaskLogSink::new(dispatcher.clone()));
                (dispatcher, log_sink)
            }
            None => {
                let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(LoggingTaskDispatcher);
                let log_sink: Arc<dyn LogSink> = Arc::new(ConsoleLogSink);
                (dispatcher, log_sink)
            }
        };

    Ok(Collaborators {
        daemon: Arc::new(daemon),
        fetcher: Arc::new(HttpCodeFetcher::new(&config.dispatcher.internal_header)),
        vcs: Arc::new(GitCheckout),
        dispatcher,
        log_sink,
        token_exchange: Arc::new(EcrTokenExchange::new()),
    })
}

async fn build(config: DockerizerConfig, job: &Path) -> anyhow::Result<bool> {
    let spec = JobFile::load(job)?.into_spec(&config.build);
    let image = spec.image_reference(&config.registry.host);

    println!("{}", format!("🔨 {} をビルド中...", spec.job_name).blue().bold());
    println!("  イメージ: {}", image.to_string().cyan());

    let orchestrator = BuildOrchestrator::new(config.clone(), collaborators(&config)?);
    let outcome = orchestrator
        .run(&spec)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!();
    if outcome.is_success() {
        println!("{}", format!("✓ {}", outcome).green().bold());
    } else {
        println!("{}", format!("✗ {}", outcome).red().bold());
    }

    Ok(outcome.is_success())
}

fn render(config: &DockerizerConfig, job: &Path) -> anyhow::Result<()> {
    let spec = JobFile::load(job)?.into_spec(&config.build);
    let mut renderer = RecipeRenderer::new(config.build.accelerator_bin.clone());
    let dockerfile = renderer
        .render(&spec)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    print!("{}", dockerfile);
    Ok(())
}

async fn login(config: &DockerizerConfig) -> anyhow::Result<()> {
    let daemon = DockerDaemon::connect()
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Dockerに接続できません")?;
    let resolver =
        CredentialResolver::new(config, Arc::new(daemon), Arc::new(EcrTokenExchange::new()));

    let report = resolver.resolve_all().await;

    println!("{}", "🔑 レジストリ認証".blue().bold());
    print_phase("internal", &config.registry.host, &report.internal);
    let cloud_target = config
        .cloud_registry()
        .map(|c| format!("ecr:{}", c.region))
        .unwrap_or_default();
    print_phase("cloud", &cloud_target, &report.cloud);
    for login in &report.private {
        print_phase("private", &login.host, &login.result);
    }

    Ok(())
}

fn print_phase(phase: &str, target: &str, result: &PhaseResult) {
    let status = match result {
        PhaseResult::Authenticated => "✓ authenticated".green().to_string(),
        PhaseResult::Failed(reason) => format!("✗ {}", reason).red().to_string(),
        PhaseResult::Skipped => "- skipped".dimmed().to_string(),
    };
    println!("  {:<8} {:<40} {}", phase, target, status);
}
