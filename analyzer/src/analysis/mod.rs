mod counter;
mod history;
mod state;
mod workflow;

pub mod prelude {
    pub use super::counter::{count, normalize_keys};
    pub use super::history::{
        HistoryStore, InMemoryHistory, MockHistoryStore, format_result, is_error,
    };
    pub use super::state::{
        AnalysisState, BlockReason, MockStateTracker, StateTracker, check_input,
    };
    pub use super::workflow::{AnalysisWorkflow, RunOutcome, Submission};
}
