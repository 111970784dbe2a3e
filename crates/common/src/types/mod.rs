use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    pub status: &'static str,
}

/// Envelope returned by every handled request that has no file payload,
/// including authentication and read failures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
    pub status: u16,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self { message: message.into(), status }
    }
}

/// Envelope for a successful object read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileResponse {
    pub content: String,
    pub status: u16,
}
