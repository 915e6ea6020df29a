//! Editor bridge to a MATLAB engine process: run scripts and selections, then keep an
//! interactive terminal open against the same engine.

pub mod cli;
pub mod config;
pub mod engine;
pub mod printer;
pub mod probe;
pub mod repl;
pub mod session;
