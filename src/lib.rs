//! tack — a small imperative language compiled to bytecode.
//!
//! The pipeline: [`lexer`] turns source text into a span-tagged token
//! sequence, [`compiler`] climbs precedence over those tokens and emits a
//! linear instruction program plus a function descriptor table, [`analyzer`]
//! partitions the program into basic blocks and reports intra-block dead
//! stores, and [`vm`] executes the program against an operand stack, a
//! small register file, and the [`table`] of global bindings.

pub mod analyzer;
pub mod compiler;
pub mod lexer;
pub mod table;
pub mod vm;
