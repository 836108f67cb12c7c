//! Scanner tests: token kinds, lexemes, line tracking, and error tokens.

use ghost_syntax::{Scanner, Token, TokenKind};

fn scan(source: &str) -> Vec<Token<'_>> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = scanner.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tokens
}

mod kinds {
    use super::*;

    #[test]
    fn simple_expression() {
        let kinds: Vec<TokenKind> = scan("1 + 2.5;").iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn punctuation() {
        let kinds: Vec<TokenKind> = scan("( ) { } [ ] , . ; / * -").iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Semicolon,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Minus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_character_operators_win_over_one() {
        let kinds: Vec<TokenKind> = scan("! != = == < <= > >=").iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn every_keyword() {
        let source = "and class else false for function if null or print return super this true var while";
        let kinds: Vec<TokenKind> = scan(source).iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Else,
                TokenKind::False,
                TokenKind::For,
                TokenKind::Function,
                TokenKind::If,
                TokenKind::Null,
                TokenKind::Or,
                TokenKind::Print,
                TokenKind::Return,
                TokenKind::Super,
                TokenKind::This,
                TokenKind::True,
                TokenKind::Var,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_not_identifier_prefixes() {
        let tokens = scan("class classy var variable");
        assert_eq!(tokens[0].kind, TokenKind::Class);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "classy");
        assert_eq!(tokens[2].kind, TokenKind::Var);
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
    }
}

mod lexemes {
    use super::*;

    #[test]
    fn string_lexeme_keeps_quotes() {
        let tokens = scan(r#"print "hello";"#);
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].lexeme, "\"hello\"");
    }

    #[test]
    fn numbers_keep_their_spelling() {
        let tokens = scan("123 4.5");
        assert_eq!(tokens[0].lexeme, "123");
        assert_eq!(tokens[1].lexeme, "4.5");
    }
}

mod lines {
    use super::*;

    #[test]
    fn lines_advance_on_newlines() {
        let tokens = scan("var a;\nvar b;\n\nvar c;");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[3].line, 2);
        assert_eq!(tokens[6].line, 4);
    }

    #[test]
    fn multiline_string_is_one_token() {
        let tokens = scan("\"one\ntwo\" x");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].line, 1);
        // The token after the string is on the string's closing line.
        assert_eq!(tokens[1].lexeme, "x");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = scan("1 // the rest is ignored\n2");
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[1].kind, TokenKind::Number);
        assert_eq!(tokens[1].line, 2);
    }
}

mod errors {
    use super::*;

    #[test]
    fn unterminated_string_is_an_error_token() {
        let tokens = scan("\"oops");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens[0].lexeme, "unterminated string");
    }

    #[test]
    fn stray_character_is_an_error_token() {
        let tokens = scan("1 @ 2");
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[1].lexeme, "unexpected character");
        assert_eq!(tokens[2].kind, TokenKind::Number);
    }

    #[test]
    fn scanning_continues_after_errors() {
        let tokens = scan("@ # $");
        let errors = tokens.iter().filter(|t| t.kind == TokenKind::Error).count();
        assert_eq!(errors, 3);
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    }

    #[test]
    fn eof_repeats() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.next_token().kind, TokenKind::Eof);
        assert_eq!(scanner.next_token().kind, TokenKind::Eof);
    }
}
