//! Tokenizer, parser and writer for class-definition text

pub mod lexer;
pub mod parser;
pub mod writer;


pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{parse_number, parse_source, parse_with_options, scalar_from_raw, ParseOptions, DEFAULT_MAX_DEPTH};
pub use writer::{render, render_definition};
