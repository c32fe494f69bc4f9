use serde::{Deserialize, Serialize};

/// Timing of one fit instruction, in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitTelemetry {
    pub device_id: i64,
    pub session_id: i64,
    pub start: i64,
    pub end: i64,
}

/// Timing and outcome of one evaluate instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateTelemetry {
    pub device_id: i64,
    pub session_id: i64,
    pub start: i64,
    pub end: i64,
    pub loss: f32,
    pub accuracy: f32,
    pub test_size: usize,
}
