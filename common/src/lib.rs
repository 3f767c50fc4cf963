pub mod bandwidth;

pub use bandwidth::{BandwidthCounter, BandwidthSnapshot};

use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Seconds since the UNIX epoch, as stored in the `*_time` columns.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Workspace crates log at `log_level`; dependencies stay quiet.
fn default_directives(log_level: &str) -> String {
    format!("ssnode={0},node={0},relay={0},common={0}", log_level)
}

pub fn init_tracing(
    log_dir: Option<&str>,
    log_file: &str,
    log_level: &str,
    console_port: Option<u16>,
) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    #[cfg(feature = "console")]
    let console_layer = console_port.map(|port| {
        console_subscriber::ConsoleLayer::builder()
            .server_addr((std::net::Ipv4Addr::LOCALHOST, port))
            .spawn()
    });

    #[cfg(not(feature = "console"))]
    let console_layer: Option<tracing_subscriber::layer::Identity> = {
        if console_port.is_some() {
            eprintln!(
                "console_port is configured but node is not built with --features console; tokio-console is disabled"
            );
        }
        None
    };

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_file);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_ansi(false),
            )
            .init();
        info!(log_dir, log_file, "Logging to daily rolling file");
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_ansi(true),
            )
            .init();
        debug!("Logging to stdout");
        None
    }
}
