//! Object references
//!
//! Every value the VM handles is an [`ObjectRef`]: a class id plus 32 bits
//! of data. Whether `data` is an inline scalar or an arena offset depends on
//! the class: classes with no fields are never allocated, so their `data`
//! carries the value itself (integers, booleans, package objects, markers).

use std::fmt;

use crate::format::ClassId;

/// Tagged reference to a VM value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Class of the referenced value
    pub class: ClassId,
    /// Inline scalar or arena offset
    pub data: u32,
}

impl ObjectRef {
    /// Unset register / empty object
    pub const NIL: ObjectRef = ObjectRef {
        class: ClassId::EMPTY,
        data: 0,
    };

    /// Create a reference
    #[inline]
    pub const fn new(class: ClassId, data: u32) -> Self {
        Self { class, data }
    }

    /// Whether this is [`ObjectRef::NIL`]
    #[inline]
    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    /// Whether this references an array
    #[inline]
    pub fn is_array(self) -> bool {
        self.class.is_array()
    }

    /// Inline data reinterpreted as a signed integer
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.data as i32
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}>", self.class, self.data)
    }
}
