// ABOUTME: Rewrites Oracle view definitions into DuckDB-compatible SQL
// ABOUTME: Quote-aware token pipeline: comments, qualifiers, case, reserved words, NVL2

use crate::error::TranslateError;
use std::collections::HashSet;

/// Words DuckDB reserves that commonly appear as Oracle column names.
pub const DEFAULT_RESERVED_WORDS: &[&str] = &["VALUE", "TYPE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Number,
    /// `'...'` with `''` escapes
    Literal,
    /// `"..."` with `""` escapes
    QuotedIdent,
    Whitespace,
    Comment,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    text: String,
}

impl Token {
    fn new(kind: TokenKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }

    fn is_punct(&self, ch: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == ch
    }

    fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    /// Identifier value without quotes, for comparisons.
    fn identifier_value(&self) -> String {
        match self.kind {
            TokenKind::QuotedIdent => {
                let inner = self.text.strip_prefix('"').unwrap_or(&self.text);
                let inner = inner.strip_suffix('"').unwrap_or(inner);
                inner.replace("\"\"", "\"")
            }
            _ => self.text.clone(),
        }
    }
}

/// Translates view definitions from one source schema.
#[derive(Debug, Clone)]
pub struct ViewSqlTranslator {
    schema: String,
    reserved: HashSet<String>,
}

impl ViewSqlTranslator {
    /// Translator for `schema` using [`DEFAULT_RESERVED_WORDS`].
    pub fn new(schema: &str) -> Self {
        Self::with_reserved_words(schema, DEFAULT_RESERVED_WORDS.iter().copied())
    }

    pub fn with_reserved_words<I, S>(schema: &str, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            schema: schema.trim().to_string(),
            reserved: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_ascii_uppercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Translate one Oracle view definition
    ///
    /// # Errors
    ///
    /// [`TranslateError::Empty`] when nothing is left after removing comments
    /// and statement terminators.
    ///
    /// # Examples
    ///
    /// ```
    /// use oracle_duckdb_loader::views::translator::ViewSqlTranslator;
    /// let translator = ViewSqlTranslator::new("TEST");
    /// let sql = translator
    ///     .translate("select value, type from test.sample where type = 'A'")
    ///     .unwrap();
    /// assert_eq!(sql, "SELECT \"VALUE\", \"TYPE\" FROM SAMPLE WHERE \"TYPE\" = 'A'");
    /// ```
    pub fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let without_comments = strip_comments(text);
        let cleaned = strip_terminators(&without_comments);
        if cleaned.is_empty() {
            return Err(TranslateError::Empty);
        }

        let mut tokens = tokenize(&cleaned);
        tokens = self.strip_schema_qualifiers(tokens);
        tokens = strip_access_clauses(tokens);
        trim_tokens(&mut tokens);
        uppercase_words(&mut tokens);
        self.quote_reserved_words(&mut tokens);

        let translated = rewrite_nvl2(&tokens);
        if translated.trim().is_empty() {
            return Err(TranslateError::Empty);
        }
        Ok(translated)
    }

    fn strip_schema_qualifiers(&self, tokens: Vec<Token>) -> Vec<Token> {
        if self.schema.is_empty() {
            return tokens;
        }

        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let qualifies = tokens[i].is_identifier()
                && tokens[i].identifier_value().eq_ignore_ascii_case(&self.schema)
                && tokens.get(i + 1).is_some_and(|t| t.is_punct("."))
                && tokens.get(i + 2).is_some_and(Token::is_identifier);
            if qualifies {
                i += 2;
                continue;
            }
            out.push(tokens[i].clone());
            i += 1;
        }
        out
    }

    fn quote_reserved_words(&self, tokens: &mut [Token]) {
        for token in tokens.iter_mut() {
            if token.kind == TokenKind::Word && self.reserved.contains(&token.text) {
                token.text = format!("\"{}\"", token.text);
                token.kind = TokenKind::QuotedIdent;
            }
        }
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let end_of = |idx: usize| chars.get(idx).map(|(pos, _)| *pos).unwrap_or(sql.len());
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (start, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let (kind, consumed) = if ch == '-' && next == Some('-') {
            let mut j = i + 2;
            while j < chars.len() && chars[j].1 != '\n' {
                j += 1;
            }
            (TokenKind::Comment, j)
        } else if ch == '/' && next == Some('*') {
            let mut j = i + 2;
            while j < chars.len()
                && !(chars[j].1 == '*' && chars.get(j + 1).map(|c| c.1) == Some('/'))
            {
                j += 1;
            }
            (TokenKind::Comment, (j + 2).min(chars.len()))
        } else if ch == '\'' || ch == '"' {
            let mut j = i + 1;
            loop {
                if j >= chars.len() {
                    break;
                }
                if chars[j].1 == ch {
                    if chars.get(j + 1).map(|c| c.1) == Some(ch) {
                        j += 2;
                        continue;
                    }
                    j += 1;
                    break;
                }
                j += 1;
            }
            let kind = if ch == '\'' {
                TokenKind::Literal
            } else {
                TokenKind::QuotedIdent
            };
            (kind, j)
        } else if ch.is_whitespace() {
            let mut j = i + 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            (TokenKind::Whitespace, j)
        } else if ch.is_alphabetic() || ch == '_' {
            let mut j = i + 1;
            while j < chars.len() && is_word_char(chars[j].1) {
                j += 1;
            }
            (TokenKind::Word, j)
        } else if ch.is_ascii_digit() {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].1.is_ascii_alphanumeric() || chars[j].1 == '.') {
                j += 1;
            }
            (TokenKind::Number, j)
        } else {
            (TokenKind::Punct, i + 1)
        };

        tokens.push(Token::new(kind, &sql[start..end_of(consumed)]));
        i = consumed;
    }

    tokens
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#'
}

fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Remove `--` and `/* */` comments outside literals and quoted identifiers.
///
/// Block comments become a single space so the tokens around them stay apart.
fn strip_comments(sql: &str) -> String {
    tokenize(sql)
        .into_iter()
        .filter_map(|t| match t.kind {
            TokenKind::Comment if t.text.starts_with("/*") => Some(" ".to_string()),
            TokenKind::Comment => None,
            _ => Some(t.text),
        })
        .collect()
}

/// Drop trailing `;` and SQL*Plus `/` terminators, then trim.
fn strip_terminators(sql: &str) -> String {
    let mut text = sql.trim();
    while let Some(stripped) = text.strip_suffix(';').or_else(|| text.strip_suffix('/')) {
        text = stripped.trim_end();
    }
    text.trim().to_string()
}

/// Replace `WITH READ ONLY` and `WITH CHECK OPTION` (optionally followed by
/// `CONSTRAINT name`) with a single space.
fn strip_access_clauses(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if let Some(end) = match_access_clause(&tokens, i) {
            out.push(Token::new(TokenKind::Whitespace, " "));
            i = end;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn match_access_clause(tokens: &[Token], start: usize) -> Option<usize> {
    if !tokens[start].is_word("WITH") {
        return None;
    }
    let second = next_significant(tokens, start + 1)?;
    let third = next_significant(tokens, second + 1)?;
    let matched = (tokens[second].is_word("READ") && tokens[third].is_word("ONLY"))
        || (tokens[second].is_word("CHECK") && tokens[third].is_word("OPTION"));
    if !matched {
        return None;
    }

    let mut end = third + 1;
    if let Some(keyword) = next_significant(tokens, end) {
        if tokens[keyword].is_word("CONSTRAINT") {
            if let Some(name) = next_significant(tokens, keyword + 1) {
                if tokens[name].is_identifier() {
                    end = name + 1;
                }
            }
        }
    }
    Some(end)
}

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| tokens[i].kind != TokenKind::Whitespace)
}

fn trim_tokens(tokens: &mut Vec<Token>) {
    while tokens
        .last()
        .is_some_and(|t| t.kind == TokenKind::Whitespace)
    {
        tokens.pop();
    }
    let leading = tokens
        .iter()
        .take_while(|t| t.kind == TokenKind::Whitespace)
        .count();
    tokens.drain(..leading);
}

fn uppercase_words(tokens: &mut [Token]) {
    for token in tokens.iter_mut() {
        if token.kind == TokenKind::Word {
            token.text = token.text.to_uppercase();
        }
    }
}

/// Rewrite every `NVL2(a, b, c)` into `CASE WHEN a IS NOT NULL THEN b ELSE c END`.
///
/// Arguments are rewritten recursively. Calls with another arity or without a
/// closing parenthesis are emitted unchanged.
fn rewrite_nvl2(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut i = 0;

    while i < tokens.len() {
        if tokens[i].is_word("NVL2") {
            if let Some(open) = next_significant(tokens, i + 1).filter(|&o| tokens[o].is_punct("(")) {
                if let Some(close) = matching_paren(tokens, open) {
                    let args = split_arguments(&tokens[open + 1..close]);
                    if args.len() == 3 {
                        out.push_str(&format!(
                            "CASE WHEN {} IS NOT NULL THEN {} ELSE {} END",
                            rewrite_nvl2(args[0]).trim(),
                            rewrite_nvl2(args[1]).trim(),
                            rewrite_nvl2(args[2]).trim()
                        ));
                    } else {
                        out.push_str(&render(&tokens[i..=close]));
                    }
                    i = close + 1;
                    continue;
                }
            }
        }
        out.push_str(&tokens[i].text);
        i += 1;
    }

    out
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Split call arguments on top-level commas.
fn split_arguments(tokens: &[Token]) -> Vec<&[Token]> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, token) in tokens.iter().enumerate() {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.saturating_sub(1);
        } else if token.is_punct(",") && depth == 0 {
            args.push(&tokens[start..idx]);
            start = idx + 1;
        }
    }
    args.push(&tokens[start..]);
    args
}
