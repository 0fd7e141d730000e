//! Process-wide logging setup, shared by the server binary and test
//! harnesses.

pub mod tracing;

pub use self::tracing::init;
