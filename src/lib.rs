pub mod config;
pub mod control;
pub mod emit;
pub mod error;
pub mod ir;
pub mod lower;
pub mod parse;
pub mod registry;
pub mod runtime;
pub mod validate;
pub mod wasm;
