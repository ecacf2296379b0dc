use logos::Logos;

/// Token kinds — a closed set. The payload-free enum keeps the kind cheap to
/// copy around; the matched source slice travels next to it in [`Token`].
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,

    #[token("fn")]
    Fn,
    #[token("int")]
    Int,
    #[token("str")]
    Str,
    #[token("return")]
    Return,
    #[token("print")]
    Print,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Mult,
    #[token("/")]
    Div,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,

    #[regex(r"[0-9]+\.[0-9]+")]
    Float,
    #[regex(r"[0-9]+")]
    Number,
    #[regex(r#""[^"]*""#)]
    Literal,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    /// Synthetic end-of-input token appended by [`lex`].
    Eof,
}

impl TokenKind {
    /// Stringify a kind for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Fn => "fn",
            TokenKind::Int => "int",
            TokenKind::Str => "str",
            TokenKind::Return => "return",
            TokenKind::Print => "print",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Mult => "*",
            TokenKind::Div => "/",
            TokenKind::Equal => "=",
            TokenKind::EqualEqual => "==",
            TokenKind::BangEqual => "!=",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::Float => "float",
            TokenKind::Number => "number",
            TokenKind::Literal => "string literal",
            TokenKind::Identifier => "identifier",
            TokenKind::Eof => "end of input",
        }
    }
}

/// A token: its kind plus the exact source slice it covers. The slice doubles
/// as the string-view payload for identifiers and literals, so nothing is
/// copied out of the source text during lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at byte {position}: unexpected character(s) '{snippet}'")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
}

type Result<T> = std::result::Result<T, LexError>;

/// Lex source code into a token sequence terminated by an `Eof` token.
pub fn lex(source: &str) -> Result<Vec<Token<'_>>> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(kind) => tokens.push(Token { kind, text: lexer.slice() }),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, text: "" });
    Ok(tokens)
}
