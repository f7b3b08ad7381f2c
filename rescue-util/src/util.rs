use log::*;
#[cfg(feature = "main")]
use std::path::Path;
use std::str::FromStr;
use std::env;

/// The log level, `RUST_LOG` taking precedence over the command line
pub fn log_level(level_arg: &str) -> Result<LevelFilter, String> {
    let level = env::var("RUST_LOG").unwrap_or(level_arg.to_string());
    LevelFilter::from_str(level.trim()).map_err(|_| format!("invalid log level {}", level))
}

/// Abort on panic.
/// Use this instead of `panic = abort` in Cargo.toml, which doesn't show
/// nice backtraces.
pub fn abort_on_panic() {
    let old = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        old(info);
        std::process::abort();
    }));
}

/// Log to stderr, and to `logfile` if given.
///
/// Standard output is left to the command's results.
#[cfg(feature = "main")]
pub fn setup_logging(
    who: &str,
    level_arg: &str,
    logfile: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    use fern::colors::{Color, ColoredLevelConfig};

    let level = log_level(level_arg)?;

    // console
    let who_clone = who.to_string();
    let colors = ColoredLevelConfig::new().info(Color::Green).error(Color::Red).warn(Color::Yellow);
    let console_config = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}/{} {}] {}",
                tstamp(),
                who_clone,
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .level_for("hyper", LevelFilter::Info)
        .level_for("reqwest", LevelFilter::Info)
        .chain(std::io::stderr());

    let mut dispatch = fern::Dispatch::new().chain(console_config);

    // file
    if let Some(logfile) = logfile {
        let who_clone = who.to_string();
        let file_config = fern::Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{} {}/{} {}] {}",
                    tstamp(),
                    who_clone,
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(fern::log_file(logfile)?);
        dispatch = dispatch.chain(file_config);
    }

    dispatch.apply()?;
    Ok(())
}

// Would prefer to use now_local but https://rustsec.org/advisories/RUSTSEC-2020-0071
#[cfg(feature = "main")]
pub fn tstamp() -> String {
    use time::{macros::format_description, OffsetDateTime};

    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_test() {
        if env::var("RUST_LOG").is_err() {
            assert_eq!(log_level("debug").unwrap(), LevelFilter::Debug);
            assert_eq!(log_level("WARN").unwrap(), LevelFilter::Warn);
            assert!(log_level("loud").is_err());
        }
    }

    #[cfg(feature = "main")]
    #[test]
    fn tstamp_test() {
        let ts = tstamp();
        // 2024-01-02 03:04:05.678
        assert_eq!(ts.len(), 23);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[19..20], ".");
    }

    #[cfg(feature = "main")]
    #[test]
    fn setup_logging_test() {
        let dir = tempfile::tempdir().unwrap();
        let logfile = dir.path().join("lnrescue.log");
        setup_logging("lnrescue", "info", Some(&logfile)).unwrap();
        info!("logging to {}", logfile.display());
        assert!(logfile.exists());
        // the logger can only be installed once
        assert!(setup_logging("lnrescue", "info", None).is_err());
    }
}
