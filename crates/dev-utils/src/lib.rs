use std::{path::Path, sync::Once};

use tracing_subscriber::{filter::LevelFilter, prelude::*, registry::Registry};

static INIT: Once = Once::new();
static mut GUARD: Option<tracing_chrome::FlushGuard> = None;

/// Installs colored backtraces and, when `DEBUG` is set, a log subscriber.
///
/// `DEBUG` takes a level (`trace`, `debug`, ...), anything else means
/// `debug`. With `DEBUG_CHROME` also set, spans are written to
/// `./log/trace-<time>.json` for chrome://tracing.
pub fn setup_test_log() {
    INIT.call_once(|| {
        color_backtrace::install();
        let Some(level) = std::env::var_os("DEBUG") else {
            return;
        };
        let level = level
            .to_str()
            .and_then(|s| s.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::DEBUG);
        let fmt = tracing_subscriber::fmt::Layer::default()
            .with_test_writer()
            .with_line_number(true)
            .with_file(true)
            .with_filter(level);

        if std::env::var_os("DEBUG_CHROME").is_none() {
            let _ = tracing::subscriber::set_global_default(Registry::default().with(fmt));
            return;
        }

        let time_suffix = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        std::fs::create_dir_all("./log").unwrap();
        let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .include_locations(true)
            .file(Path::new(&format!("./log/trace-{}.json", time_suffix)))
            .build();
        // SAFETY: written once, under `INIT`
        unsafe { GUARD = Some(guard) };
        let _ = tracing::subscriber::set_global_default(
            Registry::default().with(fmt).with(chrome.with_filter(level)),
        );
    });
}
