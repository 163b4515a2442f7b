//! Error taxonomy and host status codes.
//!
//! Every error that can surface inside a host callback maps to a [`HostStatus`].
//! Entry points never return an error to the host any other way: see
//! [`crate::plugin::guard`].
//!
//! | Error | Origin | Recovery |
//! |-------|--------|----------|
//! | [`HostCallError`] | host suite returned non-zero | fatal to the current callback |
//! | [`EffectInvocationFailure`] | runtime returned `success=false` or bad payload | sentinel fill / keep previous state |
//! | [`ParamsDecodeError`] | corrupt persisted JSON | substitute defaults |
//! | [`HostWriteError`] | persisting params failed | alert the user, keep going |

use std::fmt;

use super::image::ImageError;
use crate::runtime::RuntimeError;

// ============================================================================
// Host status codes
// ============================================================================

/// Four-char status code returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HostStatus(pub i32);

const fn fourcc(code: &[u8; 4]) -> i32 {
    ((code[0] as i32) << 24) | ((code[1] as i32) << 16) | ((code[2] as i32) << 8) | code[3] as i32
}

impl HostStatus {
    pub const NO_ERR: HostStatus = HostStatus(0);
    pub const CANT_HAPPEN: HostStatus = HostStatus(fourcc(b"CANT"));
    pub const BAD_PARAMETER: HostStatus = HostStatus(fourcc(b"PARM"));
    pub const OUT_OF_MEMORY: HostStatus = HostStatus(fourcc(b"!MEM"));

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "kNoErr");
        }
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "'{}'", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// A host suite call returned a non-zero status.
#[derive(Debug, Clone, PartialEq)]
pub struct HostCallError {
    pub call: &'static str,
    pub status: HostStatus,
}

impl HostCallError {
    pub fn new(call: &'static str, status: HostStatus) -> Self {
        Self { call, status }
    }
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host call {} failed with {}", self.call, self.status)
    }
}

impl std::error::Error for HostCallError {}

/// The effect runtime reported failure, or its output could not be marshaled.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectInvocationFailure {
    /// Runtime returned `success=false`
    Runtime { effect_id: String, info: String },
    /// Buffer size mismatch, zero dimension, malformed JSON payload
    Marshal { effect_id: String, info: String },
}

impl EffectInvocationFailure {
    pub fn runtime(effect_id: &str, info: impl Into<String>) -> Self {
        Self::Runtime { effect_id: effect_id.to_string(), info: info.into() }
    }

    pub fn marshal(effect_id: &str, info: impl Into<String>) -> Self {
        Self::Marshal { effect_id: effect_id.to_string(), info: info.into() }
    }

    pub fn info(&self) -> &str {
        match self {
            Self::Runtime { info, .. } | Self::Marshal { info, .. } => info,
        }
    }
}

impl fmt::Display for EffectInvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime { effect_id, info } => write!(f, "effect '{}' failed: {}", effect_id, info),
            Self::Marshal { effect_id, info } => {
                write!(f, "effect '{}' returned unusable data: {}", effect_id, info)
            }
        }
    }
}

impl std::error::Error for EffectInvocationFailure {}

/// Persisted params text could not be decoded.
#[derive(Debug)]
pub enum ParamsDecodeError {
    Syntax(serde_json::Error),
    NotAnObject(&'static str),
}

impl fmt::Display for ParamsDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "params are not valid JSON: {}", e),
            Self::NotAnObject(kind) => write!(f, "params must be a JSON object, got {}", kind),
        }
    }
}

impl std::error::Error for ParamsDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(e) => Some(e),
            Self::NotAnObject(_) => None,
        }
    }
}

/// Writing params back to the host record failed.
///
/// `partial` is set when an earlier field of the same save already succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct HostWriteError {
    pub field: &'static str,
    pub partial: bool,
    pub source: HostCallError,
}

impl fmt::Display for HostWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write '{}'", self.field)?;
        if self.partial {
            write!(f, " (record partially written)")?;
        }
        write!(f, ": {}", self.source)
    }
}

impl std::error::Error for HostWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Top-level error for plugin operations.
#[derive(Debug)]
pub enum PluginError {
    Host(HostCallError),
    Invocation(EffectInvocationFailure),
    Decode(ParamsDecodeError),
    Write(HostWriteError),
    Image(ImageError),
    /// Runtime could not be loaded or listed its effects
    Runtime(RuntimeError),
    /// Called before `Startup` or after `Shutdown`
    NotStarted,
    /// Panic caught at the callback boundary
    Panic(String),
}

impl PluginError {
    pub fn status(&self) -> HostStatus {
        match self {
            PluginError::Host(e) => e.status,
            PluginError::Write(e) => e.source.status,
            PluginError::Decode(_) => HostStatus::BAD_PARAMETER,
            PluginError::Image(ImageError::TooLarge { .. }) => HostStatus::OUT_OF_MEMORY,
            PluginError::Invocation(_)
            | PluginError::Image(_)
            | PluginError::Runtime(_)
            | PluginError::NotStarted
            | PluginError::Panic(_) => HostStatus::CANT_HAPPEN,
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::Host(e) => write!(f, "{}", e),
            PluginError::Invocation(e) => write!(f, "{}", e),
            PluginError::Decode(e) => write!(f, "{}", e),
            PluginError::Write(e) => write!(f, "{}", e),
            PluginError::Image(e) => write!(f, "{}", e),
            PluginError::Runtime(e) => write!(f, "{}", e),
            PluginError::NotStarted => write!(f, "plugin has not been started"),
            PluginError::Panic(msg) => write!(f, "panic at callback boundary: {}", msg),
        }
    }
}

impl std::error::Error for PluginError {}

impl From<HostCallError> for PluginError {
    fn from(e: HostCallError) -> Self {
        PluginError::Host(e)
    }
}

impl From<EffectInvocationFailure> for PluginError {
    fn from(e: EffectInvocationFailure) -> Self {
        PluginError::Invocation(e)
    }
}

impl From<ParamsDecodeError> for PluginError {
    fn from(e: ParamsDecodeError) -> Self {
        PluginError::Decode(e)
    }
}

impl From<HostWriteError> for PluginError {
    fn from(e: HostWriteError) -> Self {
        PluginError::Write(e)
    }
}

impl From<ImageError> for PluginError {
    fn from(e: ImageError) -> Self {
        PluginError::Image(e)
    }
}

impl From<RuntimeError> for PluginError {
    fn from(e: RuntimeError) -> Self {
        PluginError::Runtime(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_fourcc() {
        assert_eq!(HostStatus::NO_ERR.to_string(), "kNoErr");
        assert_eq!(HostStatus::CANT_HAPPEN.to_string(), "'CANT'");
        assert_eq!(HostStatus::OUT_OF_MEMORY.to_string(), "'!MEM'");
        assert_eq!(HostStatus(-5).to_string(), "-5");
    }

    #[test]
    fn test_error_status_mapping() {
        let host = PluginError::from(HostCallError::new("Rasterize", HostStatus::BAD_PARAMETER));
        assert_eq!(host.status(), HostStatus::BAD_PARAMETER);

        let inv = PluginError::from(EffectInvocationFailure::runtime("blur", "boom"));
        assert_eq!(inv.status(), HostStatus::CANT_HAPPEN);
        assert_eq!(PluginError::NotStarted.status(), HostStatus::CANT_HAPPEN);
    }
}
