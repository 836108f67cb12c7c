//! Scanner for the Ghost language using logos.

use logos::Logos;

/// All tokens in the Ghost language.
///
/// `UnterminatedString` is produced by the raw lexer only; [`Scanner`]
/// rewrites it (and any stray character) into an [`TokenKind::Error`] token
/// whose lexeme carries the error message.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")] // Whitespace, including newlines
#[logos(skip r"//[^\n]*")] // Line comment: // ...
pub enum TokenKind {
    // === Punctuation ===
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,

    // === One or two character operators ===
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    // === Literals ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    // Strings may span multiple lines; there are no escape sequences.
    #[regex(r#""[^"]*""#)]
    String,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // === Keywords ===
    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("null")]
    Null,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    // A string literal that reaches end of input before its closing quote.
    // Never surfaced to the compiler; see the type docs.
    #[regex(r#""[^"]*"#)]
    UnterminatedString,

    /// Any character no other pattern matches.
    #[regex(r".", priority = 0)]
    Error,

    /// End of input. A NUL byte also terminates scanning.
    #[token("\0")]
    Eof,
}

/// A single token. `lexeme` borrows from the source, except for
/// [`TokenKind::Error`] tokens, where it carries the error message instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: usize,
}

impl<'src> Token<'src> {
    /// A synthetic token, used by the compiler for names that never appear
    /// in the source (e.g. the implicit `this` slot).
    pub fn synthetic(lexeme: &'src str) -> Token<'src> {
        Token {
            kind: TokenKind::Identifier,
            lexeme,
            line: 0,
        }
    }
}

/// Token producer over a source string.
///
/// Wraps the generated lexer, tracks line numbers, and normalises lexing
/// failures into [`TokenKind::Error`] tokens so the compiler sees a uniform
/// stream ending in a single [`TokenKind::Eof`].
pub struct Scanner<'src> {
    source: &'src str,
    lexer: logos::Lexer<'src, TokenKind>,
    // Byte offset up to which `line` already accounts for newlines.
    pos: usize,
    line: usize,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner {
            source,
            lexer: TokenKind::lexer(source),
            pos: 0,
            line: 1,
        }
    }

    /// Advance the line counter over the bytes between the last accounted
    /// position and `offset`, and return the line at `offset`.
    fn line_at(&mut self, offset: usize) -> usize {
        let skipped = &self.source.as_bytes()[self.pos..offset];
        self.line += skipped.iter().filter(|&&b| b == b'\n').count();
        self.pos = offset;
        self.line
    }

    /// Produce the next token. After the input is exhausted this keeps
    /// returning `Eof` tokens.
    pub fn next_token(&mut self) -> Token<'src> {
        match self.lexer.next() {
            None => Token {
                kind: TokenKind::Eof,
                lexeme: "",
                line: self.line_at(self.source.len()),
            },
            Some(kind) => {
                let span = self.lexer.span();
                let line = self.line_at(span.start);
                match kind {
                    Ok(TokenKind::UnterminatedString) => Token {
                        kind: TokenKind::Error,
                        lexeme: "unterminated string",
                        line,
                    },
                    Ok(TokenKind::Error) | Err(_) => Token {
                        kind: TokenKind::Error,
                        lexeme: "unexpected character",
                        line,
                    },
                    Ok(kind) => Token {
                        kind,
                        lexeme: self.lexer.slice(),
                        line,
                    },
                }
            }
        }
    }
}

