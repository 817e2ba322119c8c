//! One-shot backend negotiation.
//!
//! Backend choice happens once at context initialization, not per frame:
//! the capture loop only ever sees the negotiated handle. `Auto` prefers a
//! model-backed backend and falls back to the model-free CPU backend with a
//! logged warning when no model is available.

use anyhow::{anyhow, Result};

/// Inference backends the context can negotiate.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// ONNX model via tract (`backend-tract` feature).
    Tract,
    /// Model-free frame differencing.
    Cpu,
    /// Deterministic synthetic detections.
    Stub,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tract => "tract",
            BackendKind::Cpu => "cpu",
            BackendKind::Stub => "stub",
        }
    }
}

/// How the caller wants the backend chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSelection {
    /// Prefer accelerated, fall back to CPU.
    Auto,
    /// Exactly this backend, or fail.
    Require(BackendKind),
}

impl BackendSelection {
    /// Parse the config-file / env spelling ("auto", "tract", "cpu", "stub").
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendSelection::Auto),
            "tract" => Ok(BackendSelection::Require(BackendKind::Tract)),
            "cpu" => Ok(BackendSelection::Require(BackendKind::Cpu)),
            "stub" => Ok(BackendSelection::Require(BackendKind::Stub)),
            other => Err(anyhow!(
                "unknown backend '{}' (expected auto, tract, cpu, or stub)",
                other
            )),
        }
    }
}

/// What the running process can actually provide.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCapabilities {
    /// True when a model file is configured and the tract feature is built.
    pub model_available: bool,
}

impl DeviceCapabilities {
    /// Probe capabilities for a configured model path.
    pub fn probe(model_path: Option<&std::path::Path>) -> Self {
        let configured = model_path.map(|p| p.is_file()).unwrap_or(false);
        Self {
            model_available: configured && cfg!(feature = "backend-tract"),
        }
    }
}

/// Negotiate a backend once at startup.
pub fn select_backend(
    selection: BackendSelection,
    capabilities: &DeviceCapabilities,
) -> Result<BackendKind> {
    match selection {
        BackendSelection::Require(BackendKind::Tract) => {
            if capabilities.model_available {
                Ok(BackendKind::Tract)
            } else if cfg!(feature = "backend-tract") {
                Err(anyhow!("tract backend requires a readable model file"))
            } else {
                Err(anyhow!(
                    "tract backend requires the backend-tract feature and a model file"
                ))
            }
        }
        BackendSelection::Require(kind) => Ok(kind),
        BackendSelection::Auto => {
            if capabilities.model_available {
                Ok(BackendKind::Tract)
            } else {
                log::warn!("no detection model available, falling back to cpu backend");
                Ok(BackendKind::Cpu)
            }
        }
    }
}
