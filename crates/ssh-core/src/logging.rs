//! Filter selection for the tracing subscriber installed by the binary.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Filter directive for `level`; russh stays at warn below debug.
pub fn filter_directive(level: LevelFilter) -> String {
    let name = level_to_str(level);
    if level < LevelFilter::DEBUG {
        format!("{name},russh=warn")
    } else {
        name.to_string()
    }
}

/// Level the binary starts with: `debug` with `--debug`, `info` otherwise.
pub fn initial_level(debug: bool) -> LevelFilter {
    if debug { LevelFilter::DEBUG } else { LevelFilter::INFO }
}

/// `--debug` wins over `RUST_LOG`, which wins over the `info` default.
pub fn env_filter(debug: bool) -> EnvFilter {
    let directive = filter_directive(initial_level(debug));
    if debug {
        return EnvFilter::new(directive);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "off",
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_keep_russh_at_warn() {
        assert_eq!(filter_directive(LevelFilter::INFO), "info,russh=warn");
        assert_eq!(filter_directive(LevelFilter::WARN), "warn,russh=warn");
        assert_eq!(filter_directive(LevelFilter::DEBUG), "debug");
        assert_eq!(filter_directive(LevelFilter::TRACE), "trace");
    }

    #[test]
    fn debug_flag_selects_debug_level() {
        assert_eq!(initial_level(true), LevelFilter::DEBUG);
        assert_eq!(initial_level(false), LevelFilter::INFO);
    }
}
