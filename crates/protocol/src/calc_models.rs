//! Calculation wire models.
//!
//! These structures mirror the JSON body exchanged with the computation
//! service over loopback HTTP:
//!
//! ```json
//! { "operation": "add", "a": "12", "b": "30" }
//! ```
//!
//! and its replies `{"result": "42"}` / `{"error": "division by zero"}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Arithmetic operation understood by the computation service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            "mul" => Ok(Self::Mul),
            "div" => Ok(Self::Div),
            other => Err(format!(
                "unknown operation '{other}' (expected add, sub, mul or div)"
            )),
        }
    }
}

/// A single calculation issued by the UI.
///
/// Operands are decimal strings and are forwarded untouched: validating or
/// parsing them is the computation service's job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct CalculationRequest {
    pub operation: Operation,
    pub a: String,
    pub b: String,
}

impl CalculationRequest {
    pub fn new(operation: Operation, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            operation,
            a: a.into(),
            b: b.into(),
        }
    }

    /// The side-effect-free request used to probe readiness (`0 + 0`).
    pub fn canary() -> Self {
        Self::new(Operation::Add, "0", "0")
    }
}

/// Body returned by the computation service.
///
/// Either field may be absent; a body with neither is malformed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, TS)]
pub struct CalculationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
