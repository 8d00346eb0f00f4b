/// Precondition violations raised by the call graph engine.
///
/// These indicate a caller bug rather than incomplete input, so they are
/// returned immediately and never retried.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("method {member} is not declared by class {class}")]
    ForeignMember { class: String, member: String },

    #[error("invalid method invocation opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("method handle kind {0} is not an invocation")]
    InvalidHandleKind(u8),

    #[error("invalid method reference: {0}")]
    InvalidMethodRef(String),

    #[error("failed to start the call graph scan")]
    ScanThread(#[source] std::io::Error),
}

/// Expected outcome of a failed method resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ResolutionError {
    #[error("no such method")]
    NoSuchMethod,
}
