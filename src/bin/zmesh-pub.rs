//! zmesh-pub
//!
//! Демонстрационный издатель: открывает сессию, объявляет публикацию на
//! ключе и раз в интервал публикует строку `[   N] <значение>`.

use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use zmesh::{
    error::{bail, ensure, ErrorExt, ResultExt, StatusCode, ZmeshResult},
    init_logging, log_at,
    session::config::CONNECT_KEY,
    DeliveryMode, LoggingConfig, SessionConfig, SessionStatus,
};

/// Аргументы командной строки издателя.
#[derive(Parser, Debug)]
#[command(name = "zmesh-pub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "zmesh publisher - puts a numbered value on a key periodically", long_about = None)]
struct Args {
    /// Ключ публикации (без wildcard)
    #[arg(default_value = "demo/example/zmesh-pub", help = "Ключ, на который публикуются данные")]
    key: String,
    /// Публикуемое значение
    #[arg(default_value = "Pub from Rust!", help = "Значение, добавляемое к номеру")]
    value: String,
    /// Узлы для подключения, JSON-список строк.
    ///
    /// Переменная `ZMESH_CONNECT` читается конфигурацией сессии как список
    /// через запятую, поэтому здесь к окружению не привязана.
    #[arg(short, long, help = "JSON-список узлов, например '[\"tcp/10.0.0.1:7447\"]'")]
    connect: Option<String>,
    #[arg(
        short,
        long,
        default_value = "1000",
        help = "Интервал между публикациями в миллисекундах"
    )]
    interval_ms: u64,
    #[arg(short = 'n', long, help = "Остановиться после N публикаций")]
    count: Option<u64>,
    /// Подписка на тот же ключ в этой же сессии
    #[arg(long, help = "Логировать собственные публикации через локальную подписку")]
    echo: bool,
    #[arg(long, default_value = "info", help = "Уровень логирования")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logging = init_logging(LoggingConfig {
        level: args.log_level.clone(),
        ..Default::default()
    })?;

    if let Err(err) = run(args).await {
        log_at!(
            err.log_level(),
            code = err.status_code().code(),
            error = %err,
            "zmesh-pub failed"
        );
        return Err(err.into());
    }
    Ok(())
}

/// Проверяет аргументы, которые clap не может проверить сам.
fn validate(args: &Args) -> ZmeshResult<()> {
    ensure!(
        args.interval_ms > 0,
        StatusCode::InvalidArgs,
        "--interval-ms must be positive"
    );
    if args.count == Some(0) {
        bail!(StatusCode::InvalidArgs, "--count must be at least 1, got 0");
    }
    ensure!(
        !args.key.contains('*'),
        StatusCode::InvalidArgs,
        "publication key '{}' must not contain wildcards",
        args.key
    );
    Ok(())
}

async fn run(args: Args) -> ZmeshResult<()> {
    validate(&args).context("invalid arguments")?;

    let mut config = SessionConfig::load().context("failed to load session configuration")?;
    if let Some(connect) = &args.connect {
        config.insert_json(CONNECT_KEY, connect).with_context(|| {
            format!("`{CONNECT_KEY}` expects a JSON-serialized list of strings, got `{connect}`")
        })?;
    }

    info!("opening session");
    let session = zmesh::open(config);
    tokio::spawn(log_status(session.status()));

    let key_id = session
        .intern(&args.key)
        .with_context(|| format!("failed to declare key expression '{}'", args.key))?;
    info!(key = %args.key, %key_id, "key expression declared");

    let publication = session
        .declare_publication(key_id)
        .context("unable to declare publication")?;
    info!(%key_id, "publication declared");

    if args.echo {
        session
            .declare_subscription(
                &args.key,
                DeliveryMode::push(|sample| {
                    info!(key = %sample.key_expr, payload = %sample.payload_str(), "echo");
                    Ok(())
                }),
            )
            .context("unable to declare echo subscription")?;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut idx: u64 = 0;
    loop {
        if args.count.is_some_and(|count| idx >= count) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let payload = format!("[{idx:4}] {}", args.value);
        info!(%key_id, payload = %payload, "putting data");
        session.put(publication, payload).context("put failed")?;
        idx += 1;
    }

    session.undeclare(publication).context("undeclare failed")?;
    session.close().context("close failed")?;
    info!(published = idx, "session closed");
    Ok(())
}

async fn log_status(mut status: tokio::sync::broadcast::Receiver<SessionStatus>) {
    loop {
        match status.recv().await {
            Ok(SessionStatus::ConnectFailed { endpoint, reason }) => {
                log_at!(
                    StatusCode::ConnectionFailed.log_level(),
                    %endpoint,
                    %reason,
                    "connect failed"
                );
            }
            Ok(SessionStatus::DeliveryFailed(err)) => {
                log_at!(err.status_code().log_level(), error = %err, "delivery failed");
            }
            Ok(SessionStatus::Closed) => break,
            Ok(other) => info!(status = ?other, "session status"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "status events lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
