//! Callback variables: named variables whose reads and/or writes are
//! dispatched to embedder code instead of VM memory.  Handlers are a sum
//! over the declared scalar type, so the interpreter picks the branch
//! from the variable's type and hands the embedder a value of exactly
//! that type.  Callback values are never cached; every read invokes the
//! handler again.

use crate::error::CallbackError;

/// Scalar types storable in VM memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueType {
    Byte,
    Int,
    Float,
}

impl ValueType {
    /// Bytes one element of this type occupies on the runtime stack.
    pub fn size(self) -> usize {
        match self {
            ValueType::Byte => 1,
            ValueType::Int => crate::constants::INT_SIZE,
            ValueType::Float => crate::constants::FLOAT_SIZE,
        }
    }
}

pub type ReadFn<T> = Box<dyn FnMut(u32) -> Result<T, CallbackError>>;
pub type WriteFn<T> = Box<dyn FnMut(T, u32) -> Result<(), CallbackError>>;

/// Read/write handlers for one callback variable, keyed by its declared
/// scalar type.  At least one side must be present.
pub enum Handlers {
    Byte {
        read: Option<ReadFn<u8>>,
        write: Option<WriteFn<u8>>,
    },
    Int {
        read: Option<ReadFn<i32>>,
        write: Option<WriteFn<i32>>,
    },
    Float {
        read: Option<ReadFn<f64>>,
        write: Option<WriteFn<f64>>,
    },
}

impl Handlers {
    pub fn value_type(&self) -> ValueType {
        match self {
            Handlers::Byte { .. } => ValueType::Byte,
            Handlers::Int { .. } => ValueType::Int,
            Handlers::Float { .. } => ValueType::Float,
        }
    }

    pub fn readable(&self) -> bool {
        match self {
            Handlers::Byte { read, .. } => read.is_some(),
            Handlers::Int { read, .. } => read.is_some(),
            Handlers::Float { read, .. } => read.is_some(),
        }
    }

    pub fn writable(&self) -> bool {
        match self {
            Handlers::Byte { write, .. } => write.is_some(),
            Handlers::Int { write, .. } => write.is_some(),
            Handlers::Float { write, .. } => write.is_some(),
        }
    }
}

/// Descriptor for one embedder-exposed variable.  `length` is the
/// maximum valid index plus one; it must be at least 1 (length 0 is
/// reserved for by-reference procedure arguments).
pub struct Callback {
    pub name: String,
    pub length: u32,
    pub handlers: Handlers,
}

impl Callback {
    pub fn new(name: &str, length: u32, handlers: Handlers) -> Callback {
        Callback {
            name: name.to_string(),
            length,
            handlers,
        }
    }

    /// Write-only byte variable of length 1.
    pub fn write_byte<F>(name: &str, write: F) -> Callback
    where
        F: FnMut(u8, u32) -> Result<(), CallbackError> + 'static,
    {
        Callback::new(
            name,
            1,
            Handlers::Byte {
                read: None,
                write: Some(Box::new(write)),
            },
        )
    }

    /// Write-only int variable of length 1.
    pub fn write_int<F>(name: &str, write: F) -> Callback
    where
        F: FnMut(i32, u32) -> Result<(), CallbackError> + 'static,
    {
        Callback::new(
            name,
            1,
            Handlers::Int {
                read: None,
                write: Some(Box::new(write)),
            },
        )
    }

    /// Write-only double variable of length 1.
    pub fn write_float<F>(name: &str, write: F) -> Callback
    where
        F: FnMut(f64, u32) -> Result<(), CallbackError> + 'static,
    {
        Callback::new(
            name,
            1,
            Handlers::Float {
                read: None,
                write: Some(Box::new(write)),
            },
        )
    }

    /// Read-only int variable of length 1.
    pub fn read_int<F>(name: &str, read: F) -> Callback
    where
        F: FnMut(u32) -> Result<i32, CallbackError> + 'static,
    {
        Callback::new(
            name,
            1,
            Handlers::Int {
                read: Some(Box::new(read)),
                write: None,
            },
        )
    }

    /// Read-only double variable of length 1.
    pub fn read_float<F>(name: &str, read: F) -> Callback
    where
        F: FnMut(u32) -> Result<f64, CallbackError> + 'static,
    {
        Callback::new(
            name,
            1,
            Handlers::Float {
                read: Some(Box::new(read)),
                write: None,
            },
        )
    }

    /// Read-only byte variable of the given length.
    pub fn read_bytes<F>(name: &str, length: u32, read: F) -> Callback
    where
        F: FnMut(u32) -> Result<u8, CallbackError> + 'static,
    {
        Callback::new(
            name,
            length,
            Handlers::Byte {
                read: Some(Box::new(read)),
                write: None,
            },
        )
    }
}
