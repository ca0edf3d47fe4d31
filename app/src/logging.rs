use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::settings::LogConfig;

pub const LOG_ENV: &str = "SIPPAK_LOG";
pub const LOG_STYLE_ENV: &str = "SIPPAK_LOG_STYLE";

/// 0 is off, 1 error .. 5 trace; anything above stays at trace.
pub fn level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// `SIPPAK_LOG` and `SIPPAK_LOG_STYLE` override what the flags ask for.
pub fn init(config: &LogConfig) {
    let _ = builder(config).try_init();
}

pub fn builder(config: &LogConfig) -> Builder {
    let style = if config.color { "always" } else { "never" };
    let env = Env::default()
        .filter_or(LOG_ENV, level_filter(config.verbosity).as_str())
        .write_style_or(LOG_STYLE_ENV, style);

    let mut builder = Builder::from_env(env);
    if config.time {
        builder.format_timestamp_micros();
    } else {
        builder.format_timestamp(None);
    }
    builder
        .format_level(config.level)
        .format_module_path(config.sender)
        .format_target(false);

    if !config.level && !config.time && !config.sender {
        // No decorations requested: bare message lines.
        builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    }
    builder
}
