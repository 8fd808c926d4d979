//! Runtime configuration for encoders, recorders and queues.
//!
//! Values can be built in code, read from `RHI_*` environment variables, or loaded from a JSON
//! document. Fields missing from a JSON document keep their defaults.

use core::time::Duration;
use std::env;
use std::path::Path;

use anyhow::{Context as _, Result as AnyResult};
use serde::{Deserialize, Serialize};

/// What a queue does when a wait fence has not reached the required value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceWait {
    /// Refuse the submission with `RhiError::FenceNotReached`.
    #[default]
    Fail,
    /// Block on the device until the fence is reached or the timeout expires.
    Device,
}

impl FenceWait {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail" => Some(Self::Fail),
            "device" => Some(Self::Device),
            _ => None,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    /// Upper bound on the estimated bytes one command list may hold, scratch uploads included
    pub arena_limit_bytes: Option<usize>,
    /// Page size of each command buffer's scratch allocator
    pub scratch_page_size: usize,
    /// Behaviour for unreached wait fences at submit
    pub fence_wait: FenceWait,
    /// Device-wait timeout in milliseconds
    pub fence_timeout_ms: u64,
    /// Log every recorded command at debug level
    pub trace_commands: bool,
}

impl RhiConfig {
    pub const DEFAULT_FENCE_TIMEOUT_MS: u64 = 5_000;

    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena_limit_bytes: None,
            scratch_page_size: crate::scratch::ScratchAllocator::DEFAULT_PAGE_SIZE,
            fence_wait: FenceWait::Fail,
            fence_timeout_ms: Self::DEFAULT_FENCE_TIMEOUT_MS,
            trace_commands: false,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `RHI_ARENA_LIMIT_BYTES`: command arena budget (default: unlimited, `0` also means unlimited)
    /// - `RHI_SCRATCH_PAGE_BYTES`: scratch page size (default: 64 KiB)
    /// - `RHI_FENCE_WAIT`: `fail` or `device` (default: `fail`)
    /// - `RHI_FENCE_TIMEOUT_MS`: device-wait timeout (default: 5000)
    /// - `RHI_TRACE_COMMANDS`: set to "1" to log every recorded command
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RhiConfig::from_env`] with an injectable variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();
        let arena_limit_bytes = lookup("RHI_ARENA_LIMIT_BYTES")
            .and_then(|val| val.parse::<usize>().ok())
            .and_then(|bytes| (bytes > 0).then_some(bytes));
        let scratch_page_size = lookup("RHI_SCRATCH_PAGE_BYTES")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.scratch_page_size)
            .max(1);
        let fence_wait = lookup("RHI_FENCE_WAIT")
            .as_deref()
            .and_then(FenceWait::parse)
            .unwrap_or(defaults.fence_wait);
        let fence_timeout_ms = lookup("RHI_FENCE_TIMEOUT_MS")
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(defaults.fence_timeout_ms);
        let trace_commands = lookup("RHI_TRACE_COMMANDS").as_deref() == Some("1");
        Self {
            arena_limit_bytes,
            scratch_page_size,
            fence_wait,
            fence_timeout_ms,
            trace_commands,
        }
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON for this structure.
    pub fn from_json_str(json: &str) -> AnyResult<Self> {
        let config: Self = serde_json::from_str(json).context("parsing rhi config")?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading rhi config from {}", path.display()))?;
        Self::from_json_str(&text)
    }

    #[inline]
    #[must_use]
    pub const fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self::new()
    }
}
