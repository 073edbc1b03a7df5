//! Requests and results exchanged between a bridge and its delegate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::FlagCellRef;

/// Pairs an operation request with its eventual result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Work the delegate performs on behalf of a blocked guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Operation {
    Timer { duration: Duration },
}

impl Operation {
    /// The time the operation is expected to take, if known.
    pub fn nominal_duration(&self) -> Option<Duration> {
        match self {
            Operation::Timer { duration } => Some(*duration),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Timer { .. } => "timer",
        }
    }
}

/// Sent at most once per blocking call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    pub flag_cell: FlagCellRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationPayload {
    /// A timer fired after this much real time.
    Elapsed(Duration),
    Ready,
}

/// The delegate's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub correlation_id: CorrelationId,
    pub outcome: Result<OperationPayload, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_displays_as_fixed_width_hex() {
        assert_eq!(CorrelationId::new(255).to_string(), "00000000000000ff");
    }

    #[test]
    fn request_serializes_with_kind_tag() {
        let request = OperationRequest {
            correlation_id: CorrelationId::new(1),
            operation: Operation::Timer {
                duration: Duration::from_millis(50),
            },
            flag_cell: FlagCellRef {
                index: 3,
                generation: 2,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"]["kind"], "timer");
        assert_eq!(json["flag_cell"]["index"], 3);
    }
}
