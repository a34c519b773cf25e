//! Line-oriented CSS/SCSS tokenizer.
//!
//! Every token lives on exactly one line. Block comments that span lines
//! are split into one [`TokenKind::Comment`] piece per line; only the last
//! piece is `closed`.

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    /// Piece of a `/* ... */` comment.
    Comment { closed: bool },
    /// `// ...` to end of line.
    LineComment,
    /// Quoted string (unterminated strings end at end of line).
    Str,
    OpenBrace,
    CloseBrace,
    Comma,
    Semicolon,
    /// Anything else: selectors, property names, values, at-keywords.
    Word,
}

/// A token positioned by line and byte column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

impl Token {
    #[inline]
    pub fn text<'a>(&self, lines: &[&'a str]) -> &'a str {
        &lines[self.line][self.start..self.end]
    }

    #[inline]
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::Comment { .. } | TokenKind::LineComment)
    }
}

/// Split text into lines, accepting `\n`, `\r\n` and lone `\r`.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    lines.push(&text[start..]);
    lines
}

/// Tokenize all lines. Never fails.
pub fn tokenize(lines: &[&str]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut in_comment = false;

    for (line_no, line) in lines.iter().enumerate() {
        let mut cursor = LineCursor {
            bytes: line.as_bytes(),
            pos: 0,
        };

        while !cursor.at_end() {
            let start = cursor.pos;
            let kind = if in_comment {
                let closed = cursor.comment_body();
                in_comment = !closed;
                TokenKind::Comment { closed }
            } else {
                match cursor.current() {
                    b' ' | b'\t' | b'\x0c' => cursor.whitespace(),
                    b'/' if cursor.peek() == Some(b'*') => {
                        cursor.pos += 2;
                        let closed = cursor.comment_body();
                        in_comment = !closed;
                        TokenKind::Comment { closed }
                    }
                    b'/' if cursor.peek() == Some(b'/') => {
                        cursor.pos = cursor.bytes.len();
                        TokenKind::LineComment
                    }
                    quote @ (b'"' | b'\'') => cursor.string(quote),
                    b'{' => cursor.single(TokenKind::OpenBrace),
                    b'}' => cursor.single(TokenKind::CloseBrace),
                    b',' => cursor.single(TokenKind::Comma),
                    b';' => cursor.single(TokenKind::Semicolon),
                    _ => cursor.word(),
                }
            };
            tokens.push(Token {
                kind,
                line: line_no,
                start,
                end: cursor.pos,
            });
        }
    }

    tokens
}

// ============================================================================
// Cursor
// ============================================================================

struct LineCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl LineCursor<'_> {
    #[inline]
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    #[inline]
    fn current(&self) -> u8 {
        self.bytes[self.pos]
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn whitespace(&mut self) -> TokenKind {
        while !self.at_end() && matches!(self.current(), b' ' | b'\t' | b'\x0c') {
            self.pos += 1;
        }
        TokenKind::Whitespace
    }

    /// Consume comment text up to and including `*/`, or to end of line.
    /// Returns whether the comment was closed.
    fn comment_body(&mut self) -> bool {
        while !self.at_end() {
            if self.current() == b'*' && self.peek() == Some(b'/') {
                self.pos += 2;
                return true;
            }
            self.pos += 1;
        }
        false
    }

    fn string(&mut self, quote: u8) -> TokenKind {
        self.pos += 1;
        while !self.at_end() {
            match self.current() {
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                c if c == quote => {
                    self.pos += 1;
                    break;
                }
                _ => self.pos += 1,
            }
        }
        TokenKind::Str
    }

    /// A run of anything that isn't whitespace, punctuation, a quote or a
    /// comment opener. `\x` escapes are kept inside the word.
    fn word(&mut self) -> TokenKind {
        while !self.at_end() {
            match self.current() {
                b' ' | b'\t' | b'\x0c' | b'{' | b'}' | b',' | b';' | b'"' | b'\'' => break,
                b'/' if self.peek() == Some(b'*') => break,
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                _ => self.pos += 1,
            }
        }
        // Escaped multi-byte characters may leave us mid-codepoint.
        while self.pos < self.bytes.len() && (self.bytes[self.pos] & 0xC0) == 0x80 {
            self.pos += 1;
        }
        TokenKind::Word
    }
}
