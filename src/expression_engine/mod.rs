//! A fast and simple expression-like, non-Turing-complete language used as
//! the default data-model dialect.\
//! Supported: literals, dotted member access, arithmetic, comparison and
//! boolean operators, function calls ('In' is built in) and assignment
//! statements separated by ';'.

pub mod lexer;
pub mod parser;
