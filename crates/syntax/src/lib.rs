//! Lexical analysis for the Ghost language.
//!
//! The scanner turns UTF-8 source bytes into a stream of tokens. It is the
//! only part of the front end this workspace owns: the compiler consumes
//! tokens directly and never builds a syntax tree.

pub mod scanner;

pub use scanner::{Scanner, Token, TokenKind};
