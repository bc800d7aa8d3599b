use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use indicatif::ProgressStyle;
use std::fs::File;
use std::io::IsTerminal;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::filter::{IndicatifFilter, hide_indicatif_span_fields};
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::{
    Registry,
    fmt::format::{Format, PrettyFields},
    layer::SubscriberExt,
};
use tracing_subscriber::{filter::filter_fn, prelude::*};

pub const LOG_DIR_NAME: &str = "text-analyzer";

pub fn loading_spinner() -> ProgressStyle {
    ProgressStyle::with_template("{span_child_prefix} {spinner:.green} {wide_msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[derive(Parser, Debug)]
#[clap(group = ArgGroup::new("logging"))]
pub struct LoggingOpts {
    /// A level of verbosity, and can be used multiple times
    #[arg(short, long, action = clap::ArgAction::Count, global(true))]
    pub verbose: u8,

    #[arg(
        long,
        global(true),
        default_value = "auto",
        env = "ANALYZER_OUTPUT_PROGRESS"
    )]
    /// Set the progress output. Use plain to disable the loading spinner.
    pub progress: LoggingProgress,

    #[arg(skip = LevelFilter::WARN)]
    default_level: LevelFilter,
}

#[derive(ValueEnum, Debug, Copy, Clone)]
pub enum LoggingProgress {
    /// Determine output format based on execution context
    Auto,
    /// Standard output, no spinner
    Plain,
    /// Show a spinner while an analysis is loading
    Tty,
}

impl LoggingProgress {
    pub fn is_tty(&self) -> bool {
        match self {
            LoggingProgress::Auto => std::io::stdout().is_terminal(),
            LoggingProgress::Plain => false,
            LoggingProgress::Tty => true,
        }
    }
}

impl LoggingOpts {
    pub fn to_level_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => self.default_level,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Installs the global subscriber. Console output is driven by the
    /// `user` and `always` targets, everything is written to the log file.
    pub fn configure_logging(
        &self,
        run_id: &str,
        prefix: &str,
    ) -> Result<(tracing_appender::non_blocking::WorkerGuard, String)> {
        let log_dir = std::env::temp_dir().join(LOG_DIR_NAME);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Unable to create log dir {}", log_dir.display()))?;

        let file_path: PathBuf = log_dir.join(format!("analyzer-{}-{}.log", prefix, run_id));
        let (non_blocking, guard) = tracing_appender::non_blocking(strip_ansi_escapes::Writer::new(
            File::create(&file_path)
                .with_context(|| format!("Unable to create {}", file_path.display()))?,
        ));

        let file_output = tracing_subscriber::fmt::layer()
            .event_format(Format::default().pretty())
            .with_ansi(false)
            .with_writer(non_blocking);

        let indicatif_layer = IndicatifLayer::new()
            .with_span_field_formatter(hide_indicatif_span_fields(DefaultFields::new()))
            .with_progress_style(loading_spinner());
        let indicatif_writer = indicatif_layer.get_stdout_writer();

        let is_tty_output = self.progress.is_tty();

        let level_filter = self.to_level_filter();
        let console_output = tracing_subscriber::fmt::layer()
            .event_format(
                Format::default()
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .with_writer(indicatif_writer)
            .fmt_fields(PrettyFields::new())
            .with_filter(filter_fn(move |metadata| match metadata.target() {
                "user" => level_filter >= *metadata.level(),
                "always" => true,
                _ => false,
            }));

        let progress_layer = if is_tty_output {
            Some(indicatif_layer.with_filter(IndicatifFilter::new(false)))
        } else {
            None
        };

        let subscriber = Registry::default()
            .with(console_output)
            .with(progress_layer)
            .with(file_output);

        tracing::subscriber::set_global_default(subscriber)
            .context("setting default subscriber failed")?;

        Ok((guard, file_path.display().to_string()))
    }
}
