mod cli;

pub mod prelude {
    pub use super::cli::{AnalyzeArgs, AnalyzerSession, SessionArgs, analyze_root, session_root};
}
