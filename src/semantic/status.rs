//! Status indicator updates

use serde::{Deserialize, Serialize};

/// Colour class of the status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Neutral,
    ActiveScan,
    DataActive,
    Error,
}

/// Replaces the status indicator's text and colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    pub tone: StatusTone,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>, tone: StatusTone) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }

    pub fn standby() -> Self {
        Self::new("STATUS: STANDBY", StatusTone::Neutral)
    }

    pub fn initiated() -> Self {
        Self::new("STATUS: SESSION INITIATED", StatusTone::ActiveScan)
    }

    /// Latest phase marker from the tool
    pub fn scanning(marker: &str) -> Self {
        Self::new(format!("KERNEL: {}", marker), StatusTone::ActiveScan)
    }

    pub fn data_active() -> Self {
        Self::new("STATUS: DATA STREAM ACTIVE", StatusTone::DataActive)
    }

    pub fn completed(exit_code: Option<i32>) -> Self {
        let code = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Self::new(format!("SESSION COMPLETED: {}", code), StatusTone::Neutral)
    }

    pub fn terminated() -> Self {
        Self::new("STATUS: SESSION TERMINATED", StatusTone::Error)
    }

    pub fn fault() -> Self {
        Self::new("STATUS: FAULT", StatusTone::Error)
    }
}

impl Default for StatusUpdate {
    fn default() -> Self {
        Self::standby()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_texts() {
        assert_eq!(StatusUpdate::scanning("Scanning layers").text, "KERNEL: Scanning layers");
        assert_eq!(StatusUpdate::completed(Some(0)).text, "SESSION COMPLETED: 0");
        assert_eq!(StatusUpdate::completed(None).text, "SESSION COMPLETED: signal");
        assert_eq!(StatusUpdate::default().tone, StatusTone::Neutral);
    }
}
