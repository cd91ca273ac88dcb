//! Utility library

pub mod bytes;
