//! Process-wide logger setup.
//!
//! Components only ever talk to the `log` facade; this is the one place the
//! backend is chosen. Lines carry time, level, thread and source location so
//! interleaved output from the serving thread and the updater task can be told
//! apart.

use chrono::Local;
use log::LevelFilter;
use std::io::Write;

/// Initialize `env_logger`. `RUST_LOG` wins over `level` when both are set.
pub fn init_logging(level: Option<&str>) {
    let default_level = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "{} {:<15} {:<5} {:<30}:{:<5} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                thread.name().unwrap_or("unnamed"),
                record.level(),
                record.module_path().unwrap_or("-"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}
