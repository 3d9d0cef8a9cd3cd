// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fastrace::collector::{Config as TraceConfig, ConsoleReporter};
use serde::{Deserialize, Serialize};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "resp_cache_rs=debug".
    pub level: String,
    pub output: LogOutput,
    /// Emit one JSON object per event instead of the plain formatter.
    pub json: bool,
    /// Required when `output` is `file`.
    pub file: Option<LogFileConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogFileConfig {
    pub path: String,
    #[serde(default)]
    pub rotation_frequency: Option<RotationFreq>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

/// Installs the global tracing subscriber. The returned guard must stay
/// alive for the whole process; dropping it stops the non-blocking writer.
pub fn init_logger(cfg: &LoggingConfig) -> Result<WorkerGuard> {
    let (writer, guard) = make_writer(cfg)?;

    fastrace::set_reporter(ConsoleReporter, TraceConfig::default());
    let compat_layer = fastrace_tracing::FastraceCompatLayer::new();

    let env_filter = EnvFilter::try_new(&cfg.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    if cfg.json {
        let json_layer = fmt::layer().with_writer(writer).with_ansi(false).json();
        let subscriber = Registry::default()
            .with(env_filter)
            .with(compat_layer)
            .with(json_layer);
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set global default subscriber")?;
    } else {
        let plain_layer = fmt::layer().with_writer(writer).with_ansi(false);
        let subscriber = Registry::default()
            .with(env_filter)
            .with(compat_layer)
            .with(plain_layer);
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set global default subscriber")?;
    }

    Ok(guard)
}

fn make_writer(cfg: &LoggingConfig) -> Result<(BoxMakeWriter, WorkerGuard)> {
    Ok(match cfg.output {
        LogOutput::Stdout => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::Stderr => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::File => {
            let fcfg = cfg
                .file
                .clone()
                .context("logging.file is required for output=file")?;
            let path = PathBuf::from(&fcfg.path);
            let dir = path.parent().unwrap_or_else(|| Path::new(""));

            let rotation = match fcfg.rotation_frequency.unwrap_or(RotationFreq::Never) {
                RotationFreq::Minutely => Rotation::MINUTELY,
                RotationFreq::Hourly => Rotation::HOURLY,
                RotationFreq::Daily => Rotation::DAILY,
                RotationFreq::Never => Rotation::NEVER,
            };

            let file_appender = RollingFileAppender::new(
                rotation,
                dir,
                path.file_name().unwrap_or_default(),
            );
            let (w, g) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(w), g)
        },
    })
}
