mod config_load;
mod logging;
mod models;

pub mod prelude {
    pub use super::config_load::{
        ConfigError, ConfigFile, ConfigOptions, DEFAULT_API_BASE_URL, DEFAULT_MAX_INPUT_LENGTH,
        DEFAULT_MIN_LOADING_DURATION_MS, FoundConfig, RUN_ID_ENV_VAR, default_config_path,
    };
    pub use super::logging::{LoggingOpts, LoggingProgress, loading_spinner};
    pub use super::models::{
        AnalysisKey, AnalysisKind, AnalysisMode, AnalysisRecord, AnalysisRecordBuilder,
        AnalysisRecordBuilderError, AnalysisResult, CharacterCounts, NO_RELEVANT_CHARACTERS,
        PendingAnalysis,
    };
}
