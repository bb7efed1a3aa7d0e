use core::fmt;

/// Errors raised while encoding or decoding a fixed-size map key or value.
///
/// These are programming errors, not transient failures: a short buffer or
/// an unrecognized discriminator means a caller passed bytes that never
/// should have reached the codec. Callers log and drop the event; nothing
/// here is ever propagated to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Input buffer was smaller than the entity's declared fixed size.
    ShortBuffer { expected: usize, got: usize },
    /// A ring-buffer event carried a discriminator byte with no known meaning.
    UnknownEvent(u8),
    /// A decoded field violated an invariant the encoder always upholds
    /// (e.g. `target_count` outside `1..=8`).
    InvalidField(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::ShortBuffer { expected, got } => {
                write!(f, "short buffer: expected {expected} bytes, got {got}")
            }
            CodecError::UnknownEvent(tag) => write!(f, "unknown ring-buffer event tag: {tag}"),
            CodecError::InvalidField(field) => write!(f, "invalid field: {field}"),
        }
    }
}
