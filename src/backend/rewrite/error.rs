//! Rewrite-time errors. Every variant aborts the whole rewrite.

use thiserror::Error;

use crate::backend::bytecode::{BodyError, SymbolRef};

pub type RewriteResult<T> = Result<T, RewriteError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewriteError {
    #[error("module is already a shadow module")]
    AlreadyRewritten,

    #[error("cannot clone {original}: {clone} already exists")]
    CloneNameCollision { original: SymbolRef, clone: SymbolRef },

    #[error("{function} has {count} parameters, at most 255 can be forwarded")]
    TooManyParameters { function: SymbolRef, count: usize },

    #[error("symbol table full while adding {0}")]
    SymbolTableFull(SymbolRef),

    #[error("{0} already returns a deferred value")]
    UnsupportedReturnType(SymbolRef),

    #[error("malformed body in {function}: {source}")]
    MalformedBody {
        function: SymbolRef,
        #[source]
        source: BodyError,
    },

    #[error("jump at offset {offset} in {function} no longer fits after patching")]
    JumpOutOfRange { function: SymbolRef, offset: usize },

    #[error("deferred value live across branch at offset {offset} in {function}")]
    DeferredAcrossBranch { function: SymbolRef, offset: usize },
}
