//! Expression Tokens
//!
//! Minimal lexer over connection expressions. Only two token kinds carry
//! meaning here: `x$N` (the Nth source) and `y` (the destination). Everything
//! else passes through untouched, so rewriting never alters the rest of the
//! expression text.

use std::collections::{BTreeSet, HashMap};

/// Kind of a lexed expression token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `x$N` reference to the source at position N.
    Source(usize),
    /// `y` reference to the destination.
    Destination,
    /// Any other text (operators, literals, other identifiers, whitespace).
    Other,
}

/// A token with the exact source text it was lexed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn flush<'a>(expr: &'a str, tokens: &mut Vec<Token<'a>>, start: &mut Option<usize>, end: usize) {
    if let Some(s) = start.take() {
        if s < end {
            tokens.push(Token {
                kind: TokenKind::Other,
                text: &expr[s..end],
            });
        }
    }
}

/// Split an expression into tokens. Concatenating every token's text yields
/// the input again.
pub fn tokenize(expr: &str) -> Vec<Token<'_>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut other_start: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() {
            // Numeric literal, including suffixes like `1e5`; never a reference.
            other_start.get_or_insert(i);
            while i < bytes.len() && (is_ident_continue(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
            continue;
        }
        if !is_ident_start(c) {
            other_start.get_or_insert(i);
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && is_ident_continue(bytes[i]) {
            i += 1;
        }
        let ident = &expr[start..i];

        if ident == "x" && i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1].is_ascii_digit()
        {
            let mut end = i + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(index) = expr[i + 1..end].parse::<usize>() {
                flush(expr, &mut tokens, &mut other_start, start);
                tokens.push(Token {
                    kind: TokenKind::Source(index),
                    text: &expr[start..end],
                });
                i = end;
                continue;
            }
        }

        if ident == "y" {
            flush(expr, &mut tokens, &mut other_start, start);
            tokens.push(Token {
                kind: TokenKind::Destination,
                text: ident,
            });
            continue;
        }

        other_start.get_or_insert(start);
    }
    flush(expr, &mut tokens, &mut other_start, bytes.len());
    tokens
}

/// Distinct source indices referenced through `x$N`.
pub fn source_indices(expr: &str) -> BTreeSet<usize> {
    tokenize(expr)
        .into_iter()
        .filter_map(|t| match t.kind {
            TokenKind::Source(index) => Some(index),
            _ => None,
        })
        .collect()
}

/// Highest `x$N` index in the expression, if any.
pub fn max_source_index(expr: &str) -> Option<usize> {
    source_indices(expr).into_iter().next_back()
}

/// Whether the expression contains an `x$` with no index after it, such as
/// `x${1}` or a trailing `x$`.
pub fn has_unindexed_source(expr: &str) -> bool {
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() {
            while i < bytes.len() && (is_ident_continue(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
            continue;
        }
        if !is_ident_start(c) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && is_ident_continue(bytes[i]) {
            i += 1;
        }
        if &expr[start..i] == "x"
            && bytes.get(i) == Some(&b'$')
            && !bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
        {
            return true;
        }
    }
    false
}

/// Rewrite `x$old` to `x$new` for every entry of `mapping`, simultaneously.
///
/// Indices missing from the mapping keep their original text.
pub fn remap_sources(expr: &str, mapping: &HashMap<usize, usize>) -> String {
    let mut out = String::with_capacity(expr.len() + 4);
    for token in tokenize(expr) {
        match token.kind {
            TokenKind::Source(index) => match mapping.get(&index) {
                Some(new) if *new != index => {
                    out.push_str("x$");
                    out.push_str(&new.to_string());
                }
                _ => out.push_str(token.text),
            },
            _ => out.push_str(token.text),
        }
    }
    out
}

/// Mapping from declared source position to the position the graph placed it
/// at. Only moved positions are included.
pub fn index_moves(declared_to_live: &[usize]) -> HashMap<usize, usize> {
    declared_to_live
        .iter()
        .enumerate()
        .filter(|(declared, live)| declared != *live)
        .map(|(declared, live)| (declared, *live))
        .collect()
}
