use mockall::automock;
use std::fmt::{Display, Formatter};
use tokio::sync::watch;
use tracing::debug;

/// Why an analysis can not be started right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    InProgress,
    EmptyInput,
    TooLong { max_length: usize },
    Duplicate,
}

impl Display for BlockReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::InProgress => write!(f, "Analysis in progress..."),
            BlockReason::EmptyInput => write!(f, "Input cannot be empty."),
            BlockReason::TooLong { max_length } => write!(
                f,
                "Input exceeds maximum character limit of {}.",
                max_length
            ),
            BlockReason::Duplicate => write!(f, "This analysis is already in the history."),
        }
    }
}

/// Loading beats empty input beats over-length input.
pub fn check_input(is_loading: bool, input: &str, max_length: usize) -> Option<BlockReason> {
    if is_loading {
        return Some(BlockReason::InProgress);
    }
    if input.trim().is_empty() {
        return Some(BlockReason::EmptyInput);
    }
    if input.chars().count() > max_length {
        return Some(BlockReason::TooLong { max_length });
    }
    None
}

#[automock]
pub trait StateTracker: Send + Sync {
    fn set_loading(&self, loading: bool);
    fn set_error(&self, message: Option<String>);
    fn is_loading(&self) -> bool;
    fn error_message(&self) -> Option<String>;

    fn clear_error(&self) {
        self.set_error(None);
    }

    /// Text explaining why the analyze action is disabled, empty when it is
    /// enabled.
    fn tooltip_for(&self, input: &str, max_length: usize) -> String {
        check_input(self.is_loading(), input, max_length)
            .map(|reason| reason.to_string())
            .unwrap_or_default()
    }
}

/// Observable loading flag and last error message. Subscribers are only
/// woken when a value actually changes.
#[derive(Debug)]
pub struct AnalysisState {
    loading: watch::Sender<bool>,
    error_message: watch::Sender<Option<String>>,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisState {
    pub fn new() -> Self {
        let (loading, _) = watch::channel(false);
        let (error_message, _) = watch::channel(None);
        Self {
            loading,
            error_message,
        }
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.error_message.subscribe()
    }
}

impl StateTracker for AnalysisState {
    fn set_loading(&self, loading: bool) {
        let changed = self.loading.send_if_modified(|current| {
            if *current == loading {
                return false;
            }
            *current = loading;
            true
        });
        if changed {
            debug!("Loading state set to: {}", loading);
        }
    }

    fn set_error(&self, message: Option<String>) {
        let changed = self.error_message.send_if_modified(|current| {
            if *current == message {
                return false;
            }
            *current = message.clone();
            true
        });
        if changed {
            debug!("Error message set to: {:?}", message);
        }
    }

    fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    fn error_message(&self) -> Option<String> {
        self.error_message.borrow().clone()
    }
}
