use std::{fs, fs::OpenOptions, io, path::PathBuf};

use chrono::Local;
use tracing_appender::non_blocking;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing guards를 보관하는 구조체
/// 이 구조체가 drop되기 전까지 로깅이 계속 작동합니다
pub struct TracingGuards {
    _file: non_blocking::WorkerGuard,
    _stdout: non_blocking::WorkerGuard,
}

/// Tracing 초기화
/// `logs/streams.YYYY-MM-DD.log` 파일과 stdout에 함께 기록합니다
pub fn init_tracing() -> io::Result<TracingGuards> {
    init_tracing_in("logs", "streams")
}

pub fn init_tracing_in(base_dir: &str, prefix: &str) -> io::Result<TracingGuards> {
    let (file_writer, file_guard) = daily_file_writer(base_dir, prefix)?;
    let (stdout_writer, stdout_guard) = non_blocking(io::stdout());

    // RUST_LOG가 없으면 info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // 파일에는 INFO 이상만
    let file_filter = EnvFilter::new("info");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(file_filter),
        )
        .with(fmt::layer().with_writer(stdout_writer).with_ansi(true))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(TracingGuards {
        _file: file_guard,
        _stdout: stdout_guard,
    })
}

/// 날짜별 로그 파일 (`{base_dir}/{prefix}.2025-11-29.log`)
fn daily_file_writer(
    base_dir: &str,
    prefix: &str,
) -> io::Result<(non_blocking::NonBlocking, non_blocking::WorkerGuard)> {
    fs::create_dir_all(base_dir)?;

    let date = Local::now().format("%Y-%m-%d").to_string();
    let mut path = PathBuf::from(base_dir);
    path.push(format!("{prefix}.{date}.log"));

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(non_blocking(file))
}
