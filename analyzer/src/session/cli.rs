use crate::analysis::prelude::{AnalysisState, AnalysisWorkflow, InMemoryHistory, RunOutcome};
use crate::remote::prelude::HttpAnalysisClient;
use crate::shared::prelude::{AnalysisKind, AnalysisRecord, FoundConfig};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{Span, debug, error, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// The text to analyze
    text: String,

    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Debug, Args, Clone, Copy)]
struct SelectionArgs {
    /// What to count
    #[arg(long, short, value_enum, default_value = "vowels")]
    kind: AnalysisKind,

    /// Send the text to the analysis API instead of counting locally
    #[arg(long)]
    online: bool,
}

/// The pieces a command works with, built once from the loaded config.
pub struct AnalyzerSession {
    workflow: AnalysisWorkflow,
    state: Arc<AnalysisState>,
    max_input_length: usize,
}

impl AnalyzerSession {
    pub fn from_config(config: &FoundConfig) -> Result<Self> {
        let client = HttpAnalysisClient::new(&config.api_base_url)?;
        debug!("Online analyses go to {}", client.endpoint());

        let state = Arc::new(AnalysisState::new());
        let workflow = AnalysisWorkflow::new(
            Arc::new(client),
            Arc::new(InMemoryHistory::new(config.history_capacity)),
            state.clone(),
            config.min_loading_duration,
        );

        Ok(Self {
            workflow,
            state,
            max_input_length: config.max_input_length,
        })
    }

    async fn analyze(&self, text: &str, kind: AnalysisKind, online: bool) -> RunOutcome {
        let mut spinner = LoadingSpinner::new(kind);
        let outcome = follow_loading(
            self.workflow.run(text, kind, online, self.max_input_length),
            self.state.subscribe_loading(),
            &mut spinner,
        )
        .await;
        debug!("Loading spinner shown {} time(s)", spinner.times_shown);

        report_outcome(&outcome);
        outcome
    }

    async fn print_history(&self) {
        let records = self.workflow.history().records().await;
        if records.is_empty() {
            info!(target: "always", "History is empty");
            return;
        }
        for record in records {
            print_record(&record);
        }
    }
}

/// A spinner that is visible while the analysis state reports loading.
struct LoadingSpinner {
    message: String,
    span: Option<Span>,
    times_shown: usize,
}

impl LoadingSpinner {
    fn new(kind: AnalysisKind) -> Self {
        Self {
            message: format!("Counting {} ...", kind.label()),
            span: None,
            times_shown: 0,
        }
    }

    fn update(&mut self, loading: bool) {
        if !loading {
            self.span = None;
            return;
        }
        if self.span.is_some() {
            return;
        }

        let span = info_span!("analysis", "indicatif.pb_show" = true);
        span.pb_set_message(&self.message);
        span.in_scope(|| debug!("Analysis is loading"));
        self.span = Some(span);
        self.times_shown += 1;
    }

    fn is_shown(&self) -> bool {
        self.span.is_some()
    }
}

/// Drives `work` to completion, showing `spinner` whenever `loading` flips on.
async fn follow_loading<F>(
    work: F,
    mut loading: watch::Receiver<bool>,
    spinner: &mut LoadingSpinner,
) -> F::Output
where
    F: Future,
{
    tokio::pin!(work);
    let output = loop {
        tokio::select! {
            output = &mut work => break output,
            Ok(()) = loading.changed() => {
                let is_loading = *loading.borrow_and_update();
                spinner.update(is_loading);
            }
        }
    };
    spinner.update(false);
    output
}

fn print_record(record: &AnalysisRecord) {
    info!(
        target: "always",
        "{} {} {} \"{}\"",
        record.timestamp.format("%H:%M:%S"),
        record.mode.to_string().dimmed(),
        record.kind.label().dimmed(),
        record.text
    );
    for line in record.result.format().lines() {
        info!(target: "always", "    {}", line);
    }
}

fn report_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Blocked(reason) => warn!(target: "always", "{}", reason),
        RunOutcome::Promoted(record) => {
            info!(target: "user", "Already analyzed, showing the previous result");
            print_result(record);
        }
        RunOutcome::Completed(record) => print_result(record),
    }
}

fn print_result(record: &AnalysisRecord) {
    let text = record.result.format();
    if record.result.is_error() {
        error!(target: "always", "{}", text.red());
    } else {
        for line in text.lines() {
            info!(target: "always", "{}", line);
        }
    }
}

pub async fn analyze_root(session: &AnalyzerSession, args: &AnalyzeArgs) -> Result<i32> {
    let outcome = session
        .analyze(&args.text, args.selection.kind, args.selection.online)
        .await;
    Ok(if outcome.is_success() { 0 } else { 1 })
}

pub async fn session_root(session: &AnalyzerSession, args: &SessionArgs) -> Result<i32> {
    run_session(session, args.selection, BufReader::new(tokio::io::stdin())).await
}

#[derive(Debug, PartialEq)]
enum Directive {
    Analyze(String),
    Kind(AnalysisKind),
    Online(bool),
    History,
    Quit,
    Unknown(String),
}

impl Directive {
    fn parse(line: &str) -> Option<Self> {
        let Some(directive) = line.strip_prefix(':') else {
            return if line.is_empty() {
                None
            } else {
                Some(Directive::Analyze(line.to_string()))
            };
        };

        let mut parts = directive.split_whitespace();
        let parsed = match (parts.next(), parts.next()) {
            (Some("kind"), Some(kind)) => match <AnalysisKind as FromStr>::from_str(kind) {
                Ok(kind) => Directive::Kind(kind),
                Err(_) => Directive::Unknown(line.to_string()),
            },
            (Some("online"), None) => Directive::Online(true),
            (Some("offline"), None) => Directive::Online(false),
            (Some("history"), None) => Directive::History,
            (Some("quit"), None) | (Some("q"), None) => Directive::Quit,
            _ => Directive::Unknown(line.to_string()),
        };
        Some(parsed)
    }
}

async fn run_session<T>(session: &AnalyzerSession, selection: SelectionArgs, input: T) -> Result<i32>
where
    T: AsyncRead,
    T: AsyncBufReadExt,
    T: Unpin,
{
    let mut kind = selection.kind;
    let mut online = selection.online;
    let mut lines = input.lines();

    info!(target: "user", "Enter text to analyze, `:history` to list past analyses, `:quit` to exit");

    while let Some(line) = lines.next_line().await? {
        let Some(directive) = Directive::parse(&line) else {
            continue;
        };
        debug!("Session directive {:?}", directive);

        match directive {
            Directive::Analyze(text) => {
                session.analyze(&text, kind, online).await;
            }
            Directive::Kind(new_kind) => {
                kind = new_kind;
                info!(target: "always", "Counting {}", kind.label());
            }
            Directive::Online(new_online) => {
                online = new_online;
                info!(target: "always", "Analyses now run {}", if online { "online" } else { "offline" });
            }
            Directive::History => session.print_history().await,
            Directive::Quit => break,
            Directive::Unknown(line) => warn!(target: "always", "Unknown directive `{}`", line),
        }
    }

    Ok(0)
}
