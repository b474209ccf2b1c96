// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Wires up log4rs: a console appender plus, when a log file is configured,
//! a size-rolling file appender.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::{Log, LogLevel};
use crate::error::{Error, ErrorKind};

const LOG_FILE_SIZE: u64 = 16 * 1024 * 1024;
const ROLLER_PATTERN: &str = ".{}.gz";
const ROLLER_COUNT: u32 = 10;

const STDOUT_NAME: &str = "stdout";
const ROLLER_NAME: &str = "roller";

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::Off,
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// # Errors
///
/// Returns error if the configured log file path is invalid or log4rs
/// itself fails to initialize.
pub fn init_log(log_conf: &Log) -> Result<(), Error> {
    let log_level = level_filter(log_conf.log_level());

    let mut builder = LogConfig::builder();
    let mut roots = Vec::new();

    if log_conf.console_log() {
        let stdout = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("{d} {h({l})} - {m}{n}")))
            .build();
        builder = builder.appender(Appender::builder().build(STDOUT_NAME, Box::new(stdout)));
        roots.push(STDOUT_NAME);
    }

    if let Some(log_file) = log_conf.log_file() {
        let roller_pattern = log_file.to_str().ok_or_else(|| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("invalid log file path: {log_file:?}"),
            )
        })?;
        let roller_pattern = format!("{roller_pattern}{ROLLER_PATTERN}");
        let roller = FixedWindowRoller::builder()
            .build(&roller_pattern, ROLLER_COUNT)
            .map_err(|err| {
                Error::from_string(ErrorKind::LoggerError, format!("roller init failed: {err}"))
            })?;
        let policy = Box::new(CompoundPolicy::new(
            Box::new(SizeTrigger::new(LOG_FILE_SIZE)),
            Box::new(roller),
        ));
        let file_appender = RollingFileAppender::builder()
            .build(log_file, policy)
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::LoggerError,
                    format!("file appender init failed: {err}"),
                )
            })?;
        builder = builder.appender(Appender::builder().build(ROLLER_NAME, Box::new(file_appender)));
        roots.push(ROLLER_NAME);
    }

    let config = builder
        .build(Root::builder().appenders(roots).build(log_level))
        .map_err(|err| {
            Error::from_string(ErrorKind::LoggerError, format!("log4rs config failed: {err}"))
        })?;

    log4rs::init_config(config)
        .map_err(|err| Error::from_string(ErrorKind::LoggerError, format!("log4rs init failed: {err}")))?;
    Ok(())
}
