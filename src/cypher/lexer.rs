//! Tokenizer for the Cypher subset.
//!
//! A cursor over the source string: trivia (whitespace and comments) is
//! skipped between tokens, multi-character operators are resolved through
//! a longest-match symbol table, and keywords through a case-insensitive
//! keyword table. Tokens keep their source span and original text — the
//! parser needs the text because keywords double as property and label
//! names (`n.type`, `n.order`).

use crate::{Error, Result};

/// A token with its source span. For string literals `text` holds the
/// unescaped content; for parameters, the name without the `$`.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Byte range in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Match, Optional, Where, Return, With, Unwind,
    Create, Merge, Delete, Detach, Set, Remove,
    Order, By, Skip, Limit, Asc, Desc, Distinct,
    And, Or, Not, Xor, Is, Null, True, False, In,
    As, Case, When, Then, Else, End,
    All, Any, NoneKw, Single,
    Starts, Ends, Contains,
    On, Call, Yield, Union,

    // Literals
    Integer, Float, StringLiteral,

    // Identifiers and parameters
    Identifier, Parameter,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,      // ->
    LeftArrow,  // <-
    Dash,       // -
    DotDot,     // ..

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent, Caret,
    PlusEq,     // +=
    RegexMatch, // =~

    Eof,
}

/// Multi-character entries come first so `<=` wins over `<`, `..` over `.`.
const SYMBOLS: &[(&str, TokenKind)] = &[
    ("+=", TokenKind::PlusEq),
    ("=~", TokenKind::RegexMatch),
    ("<=", TokenKind::Lte),
    (">=", TokenKind::Gte),
    ("<>", TokenKind::Neq),
    ("<-", TokenKind::LeftArrow),
    ("->", TokenKind::Arrow),
    ("..", TokenKind::DotDot),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (":", TokenKind::Colon),
    (";", TokenKind::Semicolon),
    ("|", TokenKind::Pipe),
    ("*", TokenKind::Star),
    (".", TokenKind::Dot),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Dash),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("^", TokenKind::Caret),
    ("=", TokenKind::Eq),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("MATCH", TokenKind::Match),
    ("OPTIONAL", TokenKind::Optional),
    ("WHERE", TokenKind::Where),
    ("RETURN", TokenKind::Return),
    ("WITH", TokenKind::With),
    ("UNWIND", TokenKind::Unwind),
    ("CREATE", TokenKind::Create),
    ("MERGE", TokenKind::Merge),
    ("DELETE", TokenKind::Delete),
    ("DETACH", TokenKind::Detach),
    ("SET", TokenKind::Set),
    ("REMOVE", TokenKind::Remove),
    ("ORDER", TokenKind::Order),
    ("BY", TokenKind::By),
    ("SKIP", TokenKind::Skip),
    ("LIMIT", TokenKind::Limit),
    ("ASC", TokenKind::Asc),
    ("ASCENDING", TokenKind::Asc),
    ("DESC", TokenKind::Desc),
    ("DESCENDING", TokenKind::Desc),
    ("DISTINCT", TokenKind::Distinct),
    ("AND", TokenKind::And),
    ("OR", TokenKind::Or),
    ("NOT", TokenKind::Not),
    ("XOR", TokenKind::Xor),
    ("IS", TokenKind::Is),
    ("NULL", TokenKind::Null),
    ("TRUE", TokenKind::True),
    ("FALSE", TokenKind::False),
    ("IN", TokenKind::In),
    ("AS", TokenKind::As),
    ("CASE", TokenKind::Case),
    ("WHEN", TokenKind::When),
    ("THEN", TokenKind::Then),
    ("ELSE", TokenKind::Else),
    ("END", TokenKind::End),
    ("ALL", TokenKind::All),
    ("ANY", TokenKind::Any),
    ("NONE", TokenKind::NoneKw),
    ("SINGLE", TokenKind::Single),
    ("STARTS", TokenKind::Starts),
    ("ENDS", TokenKind::Ends),
    ("CONTAINS", TokenKind::Contains),
    ("ON", TokenKind::On),
    ("CALL", TokenKind::Call),
    ("YIELD", TokenKind::Yield),
    ("UNION", TokenKind::Union),
];

fn keyword_kind(word: &str) -> Option<TokenKind> {
    KEYWORDS
        .iter()
        .find(|(kw, _)| word.eq_ignore_ascii_case(kw))
        .map(|(_, kind)| *kind)
}

/// Tokenize a Cypher query string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { src: input, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Lexer<'s> {
    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Advance past the longest prefix of `rest()` whose chars satisfy `f`;
    /// returns the consumed slice.
    fn take_while(&mut self, f: impl Fn(char) -> bool) -> &'s str {
        let start = self.pos;
        let len = self
            .rest()
            .find(|c: char| !f(c))
            .unwrap_or(self.rest().len());
        self.pos += len;
        &self.src[start..self.pos]
    }

    /// Skip whitespace, `// line` and `/* block */` comments.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            self.take_while(char::is_whitespace);
            if let Some(stripped) = self.rest().strip_prefix("//") {
                self.pos += 2 + stripped.find('\n').unwrap_or(stripped.len());
            } else if let Some(stripped) = self.rest().strip_prefix("/*") {
                let Some(close) = stripped.find("*/") else {
                    return Err(self.error(self.pos, "Block comment is never closed"));
                };
                self.pos += 2 + close + 2;
            } else {
                return Ok(());
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let start = self.pos;

        let Some(c) = self.peek() else {
            return Ok(self.token(TokenKind::Eof, start));
        };

        if c == '\'' || c == '"' {
            return self.string_literal(start, c);
        }
        if c.is_ascii_digit() {
            return Ok(self.number(start));
        }
        if c == '$' {
            self.bump();
            let name = self.take_while(|c| c.is_alphanumeric() || c == '_').to_string();
            return Ok(Token {
                kind: TokenKind::Parameter,
                span: Span { start, end: self.pos },
                text: name,
            });
        }
        if c == '`' {
            self.bump();
            let Some(close) = self.rest().find('`') else {
                return Err(self.error(start, "Quoted identifier is never closed"));
            };
            let text = self.rest()[..close].to_string();
            self.pos += close + 1;
            return Ok(Token {
                kind: TokenKind::Identifier,
                span: Span { start, end: self.pos },
                text,
            });
        }
        if c.is_alphabetic() || c == '_' {
            let word = self.take_while(|c| c.is_alphanumeric() || c == '_');
            let kind = keyword_kind(word).unwrap_or(TokenKind::Identifier);
            return Ok(self.token(kind, start));
        }

        for (symbol, kind) in SYMBOLS {
            if self.rest().starts_with(symbol) {
                self.pos += symbol.len();
                return Ok(self.token(*kind, start));
            }
        }

        Err(self.error(start, &format!("Unexpected character: '{c}'")))
    }

    /// Digits, with an optional fraction. The dot is part of the number
    /// only when a digit follows, so `1..3` stays Integer DotDot Integer.
    fn number(&mut self, start: usize) -> Token {
        self.take_while(|c| c.is_ascii_digit());
        let mut fraction = self.rest().chars();
        if fraction.next() == Some('.') && fraction.next().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
            return self.token(TokenKind::Float, start);
        }
        self.token(TokenKind::Integer, start)
    }

    fn string_literal(&mut self, start: usize, quote: char) -> Result<Token> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, "String literal is never closed")),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error(start, "String literal is never closed"))?;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '\\' => text.push('\\'),
                        c if c == quote => text.push(c),
                        other => {
                            // Unknown escapes pass through untouched.
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                Some(c) => text.push(c),
            }
        }
        Ok(Token {
            kind: TokenKind::StringLiteral,
            span: Span { start, end: self.pos },
            text,
        })
    }

    /// A token whose text is its source slice.
    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            span: Span { start, end: self.pos },
            text: self.src[start..self.pos].to_string(),
        }
    }

    fn error(&self, position: usize, message: &str) -> Error {
        lex_error(self.src, position, message)
    }
}

/// Build a ParseError with line/column resolved from the byte offset.
pub(crate) fn lex_error(input: &str, position: usize, message: &str) -> Error {
    let (line, column) = locate(input, position);
    Error::ParseError { message: message.to_string(), position, line, column }
}

/// 1-based line/column for a byte offset.
pub(crate) fn locate(input: &str, position: usize) -> (usize, usize) {
    let upto = &input[..position.min(input.len())];
    let line = upto.matches('\n').count() + 1;
    let column = match upto.rfind('\n') {
        Some(newline) => upto[newline + 1..].chars().count() + 1,
        None => upto.chars().count() + 1,
    };
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_match() {
        assert_eq!(kinds("MATCH (n:Person) RETURN n"), vec![
            TokenKind::Match,
            TokenKind::LParen,
            TokenKind::Identifier,
            TokenKind::Colon,
            TokenKind::Identifier,
            TokenKind::RParen,
            TokenKind::Return,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn relationship_pattern() {
        assert_eq!(kinds("(a)-[:KNOWS]->(b)"), vec![
            TokenKind::LParen,
            TokenKind::Identifier,
            TokenKind::RParen,
            TokenKind::Dash,
            TokenKind::LBracket,
            TokenKind::Colon,
            TokenKind::Identifier,
            TokenKind::RBracket,
            TokenKind::Arrow,
            TokenKind::LParen,
            TokenKind::Identifier,
            TokenKind::RParen,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(kinds("match RETURN Merge"), vec![
            TokenKind::Match,
            TokenKind::Return,
            TokenKind::Merge,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn hop_range_is_not_a_float() {
        assert_eq!(kinds("*1..3"), vec![
            TokenKind::Star,
            TokenKind::Integer,
            TokenKind::DotDot,
            TokenKind::Integer,
            TokenKind::Eof,
        ]);
        assert_eq!(kinds("3.25"), vec![TokenKind::Float, TokenKind::Eof]);
    }

    #[test]
    fn string_and_parameter() {
        let tokens = tokenize("'hello world' $name").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "hello world");
        assert_eq!(tokens[1].kind, TokenKind::Parameter);
        assert_eq!(tokens[1].text, "name");
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r"'a\'b\n'").unwrap();
        assert_eq!(tokens[0].text, "a'b\n");
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            kinds("MATCH /* skip\nme */ (n) // trailing\nRETURN n"),
            vec![
                TokenKind::Match,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_block_comment() {
        assert!(tokenize("MATCH /* unterminated").is_err());
    }

    #[test]
    fn two_char_operators_win() {
        assert_eq!(kinds("<= <> <- -> += =~"), vec![
            TokenKind::Lte,
            TokenKind::Neq,
            TokenKind::LeftArrow,
            TokenKind::Arrow,
            TokenKind::PlusEq,
            TokenKind::RegexMatch,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn locate_line_and_column() {
        let input = "MATCH (n)\nRETURN x";
        assert_eq!(locate(input, 10), (2, 1));
        assert_eq!(locate(input, 17), (2, 8));
    }
}
