//! # Error Taxonomy
//!
//! Error types for the multi-channel analytics core, classified the way the
//! engine needs to branch on them: some bubble straight to the caller, some
//! are retried locally, some drive a channel's state machine into `Error`
//! and get handed to the recovery manager.
//!
//! ## Propagation policy
//!
//! - [`AnalyticsError::InvalidArgument`] and [`AnalyticsError::Fatal`] bubble
//!   to the caller immediately.
//! - [`AnalyticsError::TransientIO`] is logged and retried locally with
//!   bounded backoff (reconnect, surface re-lock, decoder re-init).
//! - [`AnalyticsError::StreamTimeout`], [`AnalyticsError::DecoderTimeout`],
//!   and [`AnalyticsError::SurfaceLost`] transition the owning channel to
//!   `Error` and are handed to the recovery manager.
//! - [`AnalyticsError::ResourceExhausted`] is returned to the producer,
//!   which applies backpressure.
//! - [`AnalyticsError::RecoveryExhausted`] leaves the channel in `Error` and
//!   requires host intervention.

use std::fmt;
use std::time::SystemTime;

/// Severity attached to an [`ErrorContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// Metadata carried alongside every [`AnalyticsError`]: when it happened,
/// what was being attempted, and whether the caller should retry.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub timestamp: SystemTime,
    pub channel_id: Option<u8>,
    pub operation: Option<String>,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub recoverable: bool,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            channel_id: None,
            operation: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel_id: u8) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }
}

/// The error taxonomy from the design's error handling section (§7).
#[derive(Debug)]
pub enum AnalyticsError {
    /// Bad caller input: out-of-range channel id, null model bytes, malformed URL.
    InvalidArgument { reason: String, context: ErrorContext },
    /// Pool or queue capacity reached and backoff did not free room in time.
    ResourceExhausted { resource: String, reason: String, context: ErrorContext },
    /// RTSP connect failure, decode error, surface lock failure — retried locally.
    TransientIO { operation: String, reason: String, context: ErrorContext },
    /// No frame arrived within the ingestor's frame-timeout window.
    StreamTimeout { channel_id: u8, waited_ms: u64, context: ErrorContext },
    /// No decoded frame was produced within the decoder's stall window.
    DecoderTimeout { channel_id: u8, waited_ms: u64, context: ErrorContext },
    /// The render surface is unusable (bad geometry or repeated lock failure).
    SurfaceLost { channel_id: u8, reason: String, context: ErrorContext },
    /// The recovery manager exhausted its attempt budget for a channel.
    RecoveryExhausted { channel_id: u8, attempts: u32, context: ErrorContext },
    /// Unrecoverable startup failure: model init, pool creation.
    Fatal { reason: String, context: ErrorContext },
}

impl AnalyticsError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into(), context: ErrorContext::new() }
    }

    pub fn resource_exhausted(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new().retryable(),
        }
    }

    pub fn transient_io(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientIO {
            operation: operation.into(),
            reason: reason.into(),
            context: ErrorContext::new().retryable(),
        }
    }

    pub fn stream_timeout(channel_id: u8, waited_ms: u64) -> Self {
        Self::StreamTimeout {
            channel_id,
            waited_ms,
            context: ErrorContext::new().with_channel(channel_id).recoverable(),
        }
    }

    pub fn decoder_timeout(channel_id: u8, waited_ms: u64) -> Self {
        Self::DecoderTimeout {
            channel_id,
            waited_ms,
            context: ErrorContext::new().with_channel(channel_id).recoverable(),
        }
    }

    pub fn surface_lost(channel_id: u8, reason: impl Into<String>) -> Self {
        Self::SurfaceLost {
            channel_id,
            reason: reason.into(),
            context: ErrorContext::new().with_channel(channel_id).recoverable(),
        }
    }

    pub fn recovery_exhausted(channel_id: u8, attempts: u32) -> Self {
        Self::RecoveryExhausted {
            channel_id,
            attempts,
            context: ErrorContext::new().with_channel(channel_id).with_severity(ErrorSeverity::Critical),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal { reason: reason.into(), context: ErrorContext::new().with_severity(ErrorSeverity::Fatal) }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::InvalidArgument { context, .. }
            | Self::ResourceExhausted { context, .. }
            | Self::TransientIO { context, .. }
            | Self::StreamTimeout { context, .. }
            | Self::DecoderTimeout { context, .. }
            | Self::SurfaceLost { context, .. }
            | Self::RecoveryExhausted { context, .. }
            | Self::Fatal { context, .. } => context,
        }
    }

    /// True for errors the producer should back off and retry locally.
    pub fn is_retryable(&self) -> bool {
        self.context().retryable
    }

    /// True for errors the recovery manager can act on rather than bubble up.
    pub fn is_recoverable(&self) -> bool {
        self.context().recoverable
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::TransientIO { .. } => "transient_io",
            Self::StreamTimeout { .. } => "stream_timeout",
            Self::DecoderTimeout { .. } => "decoder_timeout",
            Self::SurfaceLost { .. } => "surface_lost",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::Fatal { .. } => "fatal",
        }
    }
}

impl fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { reason, .. } => write!(f, "invalid argument: {reason}"),
            Self::ResourceExhausted { resource, reason, .. } => {
                write!(f, "resource exhausted ({resource}): {reason}")
            }
            Self::TransientIO { operation, reason, .. } => {
                write!(f, "transient I/O error during {operation}: {reason}")
            }
            Self::StreamTimeout { channel_id, waited_ms, .. } => {
                write!(f, "channel {channel_id}: no frame for {waited_ms}ms")
            }
            Self::DecoderTimeout { channel_id, waited_ms, .. } => {
                write!(f, "channel {channel_id}: decoder stalled for {waited_ms}ms")
            }
            Self::SurfaceLost { channel_id, reason, .. } => {
                write!(f, "channel {channel_id}: surface lost: {reason}")
            }
            Self::RecoveryExhausted { channel_id, attempts, .. } => {
                write!(f, "channel {channel_id}: recovery exhausted after {attempts} attempts")
            }
            Self::Fatal { reason, .. } => write!(f, "fatal: {reason}"),
        }
    }
}

impl std::error::Error for AnalyticsError {}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_is_retryable() {
        let err = AnalyticsError::resource_exhausted("decoder_pool", "cap reached");
        assert!(err.is_retryable());
        assert_eq!(err.category(), "resource_exhausted");
    }

    #[test]
    fn stream_timeout_carries_channel_and_is_recoverable() {
        let err = AnalyticsError::stream_timeout(3, 10_000);
        assert!(err.is_recoverable());
        assert_eq!(err.context().channel_id, Some(3));
    }

    #[test]
    fn invalid_argument_is_neither_retryable_nor_recoverable() {
        let err = AnalyticsError::invalid_argument("channel_id out of range");
        assert!(!err.is_retryable());
        assert!(!err.is_recoverable());
    }
}
