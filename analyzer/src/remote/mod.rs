use crate::shared::prelude::{AnalysisKind, CharacterCounts};
use async_trait::async_trait;
use mockall::automock;

mod error;
mod http;

pub mod prelude {
    pub use super::error::{GENERIC_ONLINE_FAILURE, TransportError};
    pub use super::http::HttpAnalysisClient;
    pub use super::{AnalysisClient, MockAnalysisClient};
}

use error::TransportError;

/// Runs an analysis somewhere else. One call is one request, there is no
/// retry and no caching. Keys may come back in any case.
#[automock]
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn fetch(&self, text: &str, kind: AnalysisKind)
    -> Result<CharacterCounts, TransportError>;
}
