// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Logging
//!
//! Components never log through process-wide state directly: each one is handed a
//! [`log::Log`] implementation when it's built and writes its records there. Use
//! [`GlobalLogger`] to forward to whatever backend was installed with the `log` crate (for example
//! `env_logger`), or pass any other implementation to capture the records separately.

use std::sync::Arc;

use log::{Log, Metadata, Record};

/// Shared handle to an injected logger
pub type LoggerHandle = Arc<dyn Log>;

/// Forwards every record to the logger installed in the `log` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalLogger;

impl GlobalLogger {
    /// Return a shareable handle to the global logger
    pub fn handle() -> LoggerHandle {
        Arc::new(GlobalLogger)
    }
}

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            log::logger().log(record)
        }
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

macro_rules! log_internal {
    ($logger:expr, $lvl:expr, $($arg:tt)+) => {{
        let metadata = log::Metadata::builder()
            .level($lvl)
            .target(module_path!())
            .build();
        if $logger.enabled(&metadata) {
            $logger.log(
                &log::Record::builder()
                    .metadata(metadata)
                    .args(format_args!($($arg)+))
                    .module_path(Some(module_path!()))
                    .file(Some(file!()))
                    .line(Some(line!()))
                    .build(),
            );
        }
    }};
}

macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        log_internal!($logger, log::Level::Error, $($arg)+)
    };
}

macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        log_internal!($logger, log::Level::Info, $($arg)+)
    };
}

macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        log_internal!($logger, log::Level::Debug, $($arg)+)
    };
}

macro_rules! log_trace {
    ($logger:expr, $($arg:tt)+) => {
        log_internal!($logger, log::Level::Trace, $($arg)+)
    };
}
