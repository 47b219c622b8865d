use std::io::Write;

use env_logger::{Builder, Target};
use log::{LevelFilter, SetLoggerError};

/// `--debug` wins over `-q`; every `-q` drops one level from Info.
pub fn level(quiet: u8, debug: bool) -> LevelFilter {
    if debug {
        return LevelFilter::Debug;
    }
    match quiet {
        0 => LevelFilter::Info,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Error,
        _ => LevelFilter::Off,
    }
}

/// Installs the process-wide logger on stderr. `RUST_LOG` still overrides
/// the level chosen on the command line.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{:>5} {}", record.level(), record.args()))
        .target(Target::Stderr)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quieter_with_each_flag() {
        assert_eq!(level(0, false), LevelFilter::Info);
        assert_eq!(level(1, false), LevelFilter::Warn);
        assert_eq!(level(2, false), LevelFilter::Error);
        assert_eq!(level(7, false), LevelFilter::Off);
    }

    #[test]
    fn debug_overrides_quiet() {
        assert_eq!(level(3, true), LevelFilter::Debug);
    }
}
