//! Outer adapters: batch file parsing and report rendering.

pub mod csv;
