//! parley 命令行入口

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::future::join_all;

use parley::translation::{
    ConfigManager, IncomingMessage, LocalApproximation, MessageContext, OrchestratorConfig,
    ParticipantLanguagePreference, TaskOutcome, TranslationBackend, TranslationResult,
    TranslationService,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Translation orchestration and hierarchical cache pipeline for multilingual chat")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the local approximation backend instead of the HTTP backend
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the language of a text
    Detect {
        text: String,
    },
    /// Translate a text directly, falling back to a degraded result when the backend is down
    Translate {
        /// Source language code
        #[arg(long)]
        from: String,

        /// Target language code
        #[arg(long)]
        to: String,

        text: String,
    },
    /// Run a demo conversation through the full pipeline
    Simulate {
        /// Number of messages to send
        #[arg(short, long, default_value = "3")]
        messages: usize,

        /// Seconds to wait for each translation
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
    /// Write an example configuration file
    ConfigExample {
        path: PathBuf,
    },
    /// Print the supported environment variables
    EnvDocs,
}

#[tokio::main]
async fn main() {
    parley::init_logging();
    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> TranslationResult<()> {
    match cli.command {
        Commands::ConfigExample { path } => {
            ConfigManager::generate_example_config(&path)?;
            println!("示例配置已写入 {}", path.display());
            Ok(())
        }
        Commands::EnvDocs => {
            println!("{}", parley::env::generate_env_docs());
            Ok(())
        }
        Commands::Detect { text } => {
            let service = build_service(cli.config, cli.offline)?;
            let detected = service.detect_language(&text).await;
            println!("{} ({:.2})", detected.language, detected.confidence);
            service.shutdown().await
        }
        Commands::Translate { from, to, text } => {
            let service = build_service(cli.config, cli.offline)?;
            let translation = service.translate_direct(&text, &from, &to).await?;
            println!("{}", translation.translated_text);
            if translation.degraded {
                eprintln!("(降级结果，置信度 {:.2})", translation.confidence);
            }
            service.shutdown().await
        }
        Commands::Simulate { messages, timeout } => {
            let service = build_service(cli.config, cli.offline)?;
            simulate(&service, messages, Duration::from_secs(timeout)).await?;
            service.shutdown().await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> TranslationResult<OrchestratorConfig> {
    let manager = match path {
        Some(path) => ConfigManager::from_file(&path)?,
        None => ConfigManager::new()?,
    };
    Ok(manager.into_config())
}

fn build_service(path: Option<PathBuf>, offline: bool) -> TranslationResult<TranslationService> {
    let config = load_config(path)?;
    if offline {
        let backend: Arc<dyn TranslationBackend> = Arc::new(LocalApproximation::new());
        TranslationService::new(config, backend)
    } else {
        TranslationService::from_config(config)
    }
}

async fn simulate(service: &TranslationService, messages: usize, timeout: Duration) -> TranslationResult<()> {
    let roster = vec![
        ParticipantLanguagePreference::new("alice", "en"),
        ParticipantLanguagePreference::new("bruno", "fr"),
        ParticipantLanguagePreference::new("carla", "es").with_regional("ca"),
        ParticipantLanguagePreference::new("daiki", "ja"),
    ];
    let lines = [
        "Hello everyone, welcome to the call.",
        "Can you see the **agenda** I shared? https://example.com/agenda",
        "Let's start with the quarterly numbers.",
    ];

    let mut events = service.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let marker = if event.translation_failed { " [原文]" } else { "" };
            println!(
                "[{}] {} <- ({}) {}{}",
                event.message_id,
                event.participant_id,
                event.target_language,
                event.translated_content,
                marker
            );
        }
    });

    let mut tickets = Vec::new();
    for index in 0..messages {
        let content = lines[index % lines.len()];
        let message = IncomingMessage::new(&format!("m{}", index + 1), "demo", "alice", content)
            .with_source_language("en");
        let context = if index + 1 == messages {
            MessageContext::live()
        } else {
            MessageContext::default()
        };
        let report = service.submit_message(message, &roster, context).await?;
        println!(
            "提交 {} ({:?}, {:?}, 约 {}ms) -> {:?}",
            report.message_id,
            report.priority,
            report.complexity,
            report.estimated_time_ms,
            report.target_languages()
        );
        tickets.extend(report.tickets);
    }

    let outcomes = join_all(tickets.into_iter().map(|ticket| ticket.wait_timeout(timeout))).await;
    let mut completed = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(TaskOutcome::Completed(_)) => completed += 1,
            Ok(_) | Err(_) => failed += 1,
        }
    }

    // 让事件打印任务处理完剩余事件
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();

    let stats = service.get_stats();
    let cache = service.cache_stats();
    let health = service.get_health();
    println!();
    println!("完成 {} / 失败 {}", completed, failed);
    println!(
        "任务: 新建 {} 合并 {} 重试 {} 投递 {}",
        stats.tasks_created, stats.tasks_coalesced, stats.tasks_retried, stats.deliveries
    );
    println!(
        "缓存: 命中 {:?} 请求 {} 命中率 {:.1}%",
        cache.tier_hits,
        cache.total_requests,
        cache.hit_rate() * 100.0
    );
    println!("健康状态: {:?}", health.overall);
    Ok(())
}
