//! Error types for IR construction and JIT execution.

use thiserror::Error;

/// Failures raised while constructing or validating IR.
///
/// These are synchronous, non-recoverable: the caller built malformed IR and
/// must fix the program that builds it. No automatic recovery is attempted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IrError {
    /// A `load`/`store` pointer operand was not a pointer type.
    #[error("operand is not a pointer")]
    NotAPointer,

    /// A `store` value type did not match the pointee type of its destination.
    #[error("store value type does not match pointee type")]
    StoreTypeMismatch,

    /// Both operands of an integer/float op must share a type.
    #[error("operand types do not match")]
    OperandTypeMismatch,

    /// `condbr` condition was not `i1`.
    #[error("condbr condition must be i1")]
    CondBrNotI1,

    /// Cast destination width/kind was incompatible with the source.
    #[error("invalid cast: {0}")]
    InvalidCast(&'static str),

    /// `call` argument count or types didn't match the callee signature.
    #[error("call argument mismatch: {0}")]
    CallArgMismatch(&'static str),

    /// `call` target was neither a function nor a pointer-to-function.
    #[error("call target is not callable")]
    NotCallable,

    /// `alloca` array size was not a `ConstantInt`.
    #[error("alloca array size is not a constant")]
    AllocaSizeNotConstant,

    /// GEP indexed into a struct with a non-constant index.
    #[error("GEP index into struct is not a constant")]
    GepStructIndexNotConstant,

    /// GEP was given an operand that is neither a pointer nor a struct step.
    #[error("invalid arguments to GEP instruction")]
    InvalidGep,

    /// Referenced a function or global that was never declared in this context.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A builder `create_*` method was called without `set_insert_point`.
    #[error("no insertion point set on this builder")]
    NoInsertionPoint,
}

/// Failures raised by instruction selection, register allocation, or the JIT
/// runtime.
#[derive(Debug, Error)]
pub enum JitError {
    /// The initializer type dispatcher in the runtime encountered a constant
    /// kind it does not know how to materialize.
    #[error("unknown constant type while initializing global `{0}`")]
    UnknownConstantType(String),

    /// The OS refused to hand back executable memory.
    #[error("failed to allocate executable memory: {0}")]
    AllocFailed(#[source] std::io::Error),

    /// `mprotect`/`VirtualProtect`-equivalent failed while finalizing a page.
    #[error("failed to make JIT memory executable: {0}")]
    ProtectFailed(#[source] std::io::Error),

    /// Registering unwind info with the OS failed.
    #[error("failed to register unwind info")]
    UnwindRegistrationFailed,

    /// IR passed to the runtime referenced IR that failed validation earlier
    /// and was never meant to be added.
    #[error("invalid IR: {0}")]
    InvalidIr(#[from] IrError),
}

/// Convenience alias for fallible IR-builder operations.
pub type IrResult<T> = Result<T, IrError>;

/// Convenience alias for fallible JIT operations.
pub type JitResult<T> = Result<T, JitError>;
