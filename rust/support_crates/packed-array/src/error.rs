use std::alloc::Layout;

use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn capacity_overflow(requested: usize) -> Error {
        Error(ErrorKind::CapacityOverflow { requested }.into())
    }

    pub fn out_of_memory(layout: Layout) -> Error {
        Error(ErrorKind::OutOfMemory { layout }.into())
    }

    /// Wraps a failure raised while constructing a header or an element
    /// in place.
    pub fn construction<E>(context: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::Construction {
                context: context.into(),
                source: Box::new(source),
            }
            .into(),
        )
    }

    /// Returns `true` if the error reports that the base allocator could not
    /// satisfy a request.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("capacity overflow: {requested} bytes cannot be described by an allocation layout")]
    CapacityOverflow { requested: usize },

    #[error(
        "out of memory: failed to allocate {} bytes aligned to {}",
        layout.size(),
        layout.align()
    )]
    OutOfMemory { layout: Layout },

    #[error("construction failed for '{context}': {source}")]
    Construction {
        context: String,
        source: StdErrorBoxed,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
