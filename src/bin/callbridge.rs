use anyhow::Result;
use callbridge::{
    app::{self, AppStateBuilder},
    config::Config,
    handler::middleware::request_log::AccessLogEventFormat,
    preflight, version,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::time::SystemTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Call routing, deduplication and push backend for a mobile calling app",
    long_about = version::get_version_info()
)]
struct Cli {
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.conf.as_deref() {
        Some(path) => {
            println!("Loading config from: {}", path);
            Config::load(path)?
        }
        None => {
            println!("Loading default config");
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };

    println!("Start at {}", Utc::now());
    println!("{}", version::get_version_info());

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        match preflight::validate_start(&config).await {
            Ok(_) => {
                println!("Configuration is valid; the listen address is available.");
                return Ok(());
            }
            Err(err) => {
                eprintln!("Configuration validation failed:");
                for issue in err.issues {
                    eprintln!("- {}: {}", issue.field, issue.message);
                }
                std::process::exit(1);
            }
        }
    }

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }

    let mut _guard_holder = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| anyhow::anyhow!("failed to open log file {}: {}", log_file, e))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _guard_holder = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(SystemTime))
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(AccessLogEventFormat::new(SystemTime)),
            )
            .try_init()?;
    }

    let state = AppStateBuilder::new().config(config).build()?;
    info!(
        http_addr = %state.config.http_addr,
        public_url = %state.config.public_url,
        "starting callbridge"
    );

    let app_future = app::run(state.clone());
    tokio::pin!(app_future);

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?
    };

    #[cfg(unix)]
    {
        tokio::select! {
            result = &mut app_future => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
                state.token.cancel();
                app_future.await?;
            }
            _ = sigterm_stream.recv() => {
                info!("received SIGTERM, shutting down");
                state.token.cancel();
                app_future.await?;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = &mut app_future => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("received CTRL+C, shutting down");
                state.token.cancel();
                app_future.await?;
            }
        }
    }
    Ok(())
}
