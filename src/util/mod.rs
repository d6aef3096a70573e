//! Small shared helpers with no cache semantics of their own.

pub mod clock;
