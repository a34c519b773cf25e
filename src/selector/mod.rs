//! Selector scanner.
//!
//! Best-effort extraction of rule selectors with line/column spans from
//! CSS-like text, used to re-locate original selectors inside SASS sources.
//!
//! ```text
//! text → lexer (line tokens) → rule-list walk → Vec<Selector>
//! ```
//!
//! Only flat rule lists are modeled. `@media` blocks recurse one rule list
//! deep. Nested SCSS rules and `&` parent references are not understood:
//! a nested block is folded into the enclosing rule's declarations, which
//! end at the first closing brace. The indented `.sass` syntax is not
//! supported either.
//!
//! Columns are byte offsets within the line.

mod lexer;

use serde::Serialize;

use lexer::{Token, TokenKind, split_lines, tokenize};

/// Line/column position (both zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pos {
    pub line: usize,
    pub ch: usize,
}

impl Pos {
    const fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }
}

/// One selector of a style rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Selector text with CSS escapes decoded.
    pub selector: String,
    /// Start of the rule, including a directly preceding comment.
    pub rule_start: Pos,
    pub selector_start: Pos,
    pub selector_end: Pos,
    /// Start of the comma-separated group, when the rule has one.
    pub selector_group_start: Option<Pos>,
    /// Full group text (`".a, .b"`), when the rule has more than one selector.
    pub selector_group: Option<String>,
    /// `{` position. Unset until the closing `}` is seen.
    pub decl_list_start: Option<Pos>,
    /// `}` position. Unset until the closing `}` is seen.
    pub decl_list_end: Option<Pos>,
}

/// Extract every selector in `text`.
///
/// Never panics on malformed input; a pure function of `text`.
pub fn extract_all_selectors(text: &str) -> Vec<Selector> {
    let lines = split_lines(text);
    let tokens = tokenize(&lines);
    let mut scanner = Scanner::new(&lines, &tokens);
    if scanner.first_non_whitespace() {
        scanner.rule_list(None);
    }
    scanner.selectors
}

// ============================================================================
// Scanner
// ============================================================================

struct Scanner<'a> {
    lines: &'a [&'a str],
    tokens: &'a [Token],
    cursor: usize,
    selectors: Vec<Selector>,
    /// Text of the selector being accumulated.
    current: String,
    rule_start: Option<Pos>,
    group_start: Option<Pos>,
}

impl<'a> Scanner<'a> {
    fn new(lines: &'a [&'a str], tokens: &'a [Token]) -> Self {
        Self {
            lines,
            tokens,
            cursor: 0,
            selectors: Vec::new(),
            current: String::new(),
            rule_start: None,
            group_start: None,
        }
    }

    // ------------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------------

    #[inline]
    fn token(&self) -> Token {
        self.tokens[self.cursor]
    }

    #[inline]
    fn text(&self) -> &'a str {
        self.token().text(self.lines)
    }

    #[inline]
    fn is(&self, kind: TokenKind) -> bool {
        self.token().kind == kind
    }

    fn line_text(&self) -> &'a str {
        self.lines[self.token().line]
    }

    /// Advance one token. A line break inside a selector becomes a space.
    fn next(&mut self) -> bool {
        if self.cursor + 1 >= self.tokens.len() {
            return false;
        }
        let prev_line = self.token().line;
        self.cursor += 1;
        if self.token().line != prev_line && self.current.chars().any(|c| !c.is_whitespace()) {
            self.current.push(' ');
        }
        true
    }

    fn first_non_whitespace(&mut self) -> bool {
        if self.tokens.is_empty() {
            return false;
        }
        while self.is(TokenKind::Whitespace) {
            if !self.next() {
                return false;
            }
        }
        true
    }

    fn next_non_whitespace(&mut self) -> bool {
        if !self.next() {
            return false;
        }
        self.first_non_whitespace()
    }

    fn next_non_comment(&mut self) -> bool {
        if !self.next() {
            return false;
        }
        while self.token().is_comment() {
            if !self.next() {
                return false;
            }
        }
        true
    }

    /// Skip to the token closing the current block comment.
    fn skip_comment(&mut self) {
        while !self.is(TokenKind::Comment { closed: true }) {
            if !self.next() {
                break;
            }
        }
    }

    fn skip_until(&mut self, kind: TokenKind) -> bool {
        while !self.is(kind) {
            if !self.next_non_comment() {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------------
    // Grammar
    // ------------------------------------------------------------------------

    fn rule_list(&mut self, close: Option<TokenKind>) {
        loop {
            if close.is_some_and(|k| self.is(k)) {
                break;
            }

            let token = self.token();
            match token.kind {
                TokenKind::Word if self.text().starts_with('@') => self.at_rule(),
                TokenKind::Comment { .. } => {
                    if self.comment_starts_rule() {
                        self.rule_start = Some(Pos::new(token.line, token.start));
                    }
                    self.skip_comment();
                }
                TokenKind::LineComment => {
                    if self.comment_starts_rule() {
                        self.rule_start = Some(Pos::new(token.line, token.start));
                    }
                }
                // Stray brace at top level.
                TokenKind::CloseBrace => {}
                _ => {
                    if self.rule_start.is_none() {
                        self.rule_start = Some(Pos::new(token.line, token.start));
                    }
                    if self.selector_list() {
                        self.declaration_list();
                    }
                }
            }

            if !self.next_non_whitespace() {
                break;
            }
        }
    }

    /// A comment claims the next rule unless one is already claimed or it
    /// trails a `}` on the same line.
    fn comment_starts_rule(&self) -> bool {
        if self.rule_start.is_some() {
            return false;
        }
        let token = self.token();
        !(token.start > 0 && self.line_text()[..token.start].contains('}'))
    }

    fn at_rule(&mut self) {
        self.rule_start = None;
        self.group_start = None;

        let keyword = self.text().to_ascii_lowercase();
        if keyword.starts_with("@media") {
            if !self.skip_until(TokenKind::OpenBrace) || !self.next_non_whitespace() {
                return;
            }
            self.rule_list(Some(TokenKind::CloseBrace));
        } else if ["@charset", "@import", "@namespace"]
            .iter()
            .any(|k| keyword.starts_with(k))
        {
            self.skip_until(TokenKind::Semicolon);
        } else {
            self.skip_block_or_statement();
        }
    }

    /// Skip `@rule ... ;` or `@rule ... { ... }` with balanced braces.
    fn skip_block_or_statement(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.token().kind {
                TokenKind::Semicolon if depth == 0 => return,
                TokenKind::OpenBrace => depth += 1,
                TokenKind::CloseBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
            if !self.next_non_comment() {
                return;
            }
        }
    }

    /// Returns false at end of input.
    fn selector_list(&mut self) -> bool {
        let token = self.token();
        self.group_start = self
            .line_text()
            .contains(',')
            .then(|| Pos::new(token.line, token.start));

        if !self.selector(token.start) {
            return false;
        }
        while self.is(TokenKind::Comma) {
            if !self.next_non_comment() {
                return false;
            }
            let start = self.token().start;
            if !self.selector(start) {
                return false;
            }
        }
        true
    }

    /// Accumulate one selector up to `,` or `{`. Returns false at end of input.
    fn selector(&mut self, start_ch: usize) -> bool {
        self.current.clear();
        let start_line = self.token().line;

        while !self.is(TokenKind::Comma) && !self.is(TokenKind::OpenBrace) {
            let text = self.text();
            self.current.push_str(text);
            if !self.next_non_comment() {
                self.current.clear();
                return false;
            }
        }

        let raw = std::mem::take(&mut self.current);
        let selector = unescape(&raw).trim().to_owned();
        if selector.is_empty() {
            return true;
        }

        let end_line = self.token().line;
        let line = self.line_text();
        let fallback = if self.group_start.is_none() {
            start_ch
        } else {
            start_ch + 1
        };
        let start_col = if find_from(line, &selector, start_ch).is_some() {
            find_from(line, &selector, start_ch.saturating_sub(selector.len())).unwrap_or(fallback)
        } else {
            fallback
        };

        self.selectors.push(Selector {
            rule_start: self.rule_start.unwrap_or(Pos::new(start_line, start_ch)),
            selector_start: Pos::new(start_line, start_col),
            selector_end: Pos::new(end_line, start_col + selector.len()),
            selector_group_start: self.group_start,
            selector_group: None,
            decl_list_start: None,
            decl_list_end: None,
            selector,
        });
        true
    }

    fn declaration_list(&mut self) {
        let open = self.token();
        let decl_start = Pos::new(open.line, open.start);
        let group = self.group_start.take().map(|start| self.group_text(start, decl_start));
        self.rule_start = None;

        while !self.is(TokenKind::CloseBrace) {
            if !self.next_non_comment() {
                break;
            }
        }

        let close = self.token();
        let decl_end = Pos::new(close.line, close.end.saturating_sub(1));
        for selector in self.selectors.iter_mut().rev() {
            if selector.decl_list_end.is_some() {
                break;
            }
            selector.decl_list_start = Some(decl_start);
            selector.decl_list_end = Some(decl_end);
            if group.is_some() {
                selector.selector_group.clone_from(&group);
            }
        }
    }

    /// Original group text from its start up to `{`, newlines joined by spaces.
    fn group_text(&self, start: Pos, open: Pos) -> String {
        let mut text = String::new();
        for line_no in start.line..=open.line {
            let line = self.lines[line_no];
            let from = if line_no == start.line {
                start.ch
            } else {
                text.push(' ');
                0
            };
            let to = if line_no == open.line { open.ch } else { line.len() };
            text.push_str(line.get(from..to.max(from)).unwrap_or_default());
        }
        text.trim().to_owned()
    }
}

/// `str::find` starting at byte `from` (snapped back to a char boundary).
fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let mut from = from.min(haystack.len());
    while !haystack.is_char_boundary(from) {
        from -= 1;
    }
    haystack[from..].find(needle).map(|i| i + from)
}

// ============================================================================
// Escapes
// ============================================================================

/// Decode CSS2.1 escapes: `\` + 1-6 hex digits (plus one optional trailing
/// whitespace), or `\` + any other character for that character.
pub fn unescape(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }

        if hex.is_empty() {
            if let Some(next) = chars.next() {
                out.push(next);
            }
            continue;
        }

        if hex.len() < 6 && chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let decoded = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|&v| v != 0)
            .and_then(char::from_u32)
            .unwrap_or('\u{FFFD}');
        out.push(decoded);
    }
    out
}
