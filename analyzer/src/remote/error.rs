use thiserror::Error;

pub const GENERIC_ONLINE_FAILURE: &str = "An error occurred during online analysis.";

/// A failed remote analysis. `status` follows HTTP, with `0` meaning the
/// server could not be reached at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.status, .message))]
pub struct TransportError {
    pub status: u16,
    pub message: Option<String>,
}

impl TransportError {
    pub fn new(status: u16, message: Option<String>) -> Self {
        Self { status, message }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        Self::new(0, Some(reason.into()))
    }

    pub fn is_connection_error(&self) -> bool {
        self.status == 0
    }

    pub fn user_message(&self) -> String {
        describe(&self.status, &self.message)
    }
}

fn describe(status: &u16, message: &Option<String>) -> String {
    match *status {
        0 => "Could not connect to the server. Please check your internet connection.".to_string(),
        400..=499 => message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
            format!(
                "Request failed with status {}. Invalid input or resource not found.",
                status
            )
        }),
        500..=599 => {
            "Server error: Something went wrong on our end. Please try again later.".to_string()
        }
        status => format!("An unexpected HTTP error occurred (Status: {}).", status),
    }
}
