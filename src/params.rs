use crate::query::Params;
use serde_json::Value;
use std::collections::HashMap;

/// Positional placeholder syntax understood by a SQL driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `@P1`, `@P2`, ... (TDS / SQL Server)
    Tds,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?` per occurrence (MySQL)
    Question,
}

/// SQL text rewritten to positional placeholders plus the values to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Rewrite `@name` references into the driver's positional placeholders.
///
/// Only names present in `params` are rewritten. Quoted literals, quoted
/// identifiers, comments, `@@` system variables and unknown `@names` are
/// copied through untouched, following each dialect's quoting: backslash
/// escapes and `#` comments for MySQL, dollar-quoted bodies and `E'...'`
/// strings for PostgreSQL. Values are never written into the SQL text.
pub fn bind_named(sql: &str, params: &Params, style: PlaceholderStyle) -> BoundQuery {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            // MySQL string literals take backslash escapes; identifiers don't
            '\'' | '"' => {
                let backslash = style == PlaceholderStyle::Question;
                i = copy_quoted(&chars, i, c, backslash, &mut out);
            }
            '`' => {
                i = copy_quoted(&chars, i, c, false, &mut out);
            }
            '[' if style == PlaceholderStyle::Tds => {
                i = copy_quoted(&chars, i, ']', false, &mut out);
            }
            // PostgreSQL escape strings: E'it\'s'
            'E' | 'e'
                if style == PlaceholderStyle::Dollar
                    && chars.get(i + 1) == Some(&'\'')
                    && !follows_ident(&chars, i) =>
            {
                out.push(c);
                i = copy_quoted(&chars, i + 1, '\'', true, &mut out);
            }
            '$' if style == PlaceholderStyle::Dollar && !follows_ident(&chars, i) => {
                match dollar_quote_end(&chars, i) {
                    Some(end) => {
                        out.extend(&chars[i..end]);
                        i = end;
                    }
                    None => {
                        out.push(c);
                        i += 1;
                    }
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = copy_line(&chars, i, &mut out);
            }
            '#' if style == PlaceholderStyle::Question => {
                i = copy_line(&chars, i, &mut out);
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("/*");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.push_str("*/");
                        i += 2;
                        break;
                    }
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '@' if chars.get(i + 1) == Some(&'@') => {
                out.push_str("@@");
                i += 2;
            }
            '@' if chars.get(i + 1).is_some_and(|n| is_ident_start(*n)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match params.get_key_value(name.as_str()) {
                    Some((key, value)) => {
                        let placeholder = match style {
                            PlaceholderStyle::Question => {
                                values.push(value.clone());
                                "?".to_string()
                            }
                            PlaceholderStyle::Tds | PlaceholderStyle::Dollar => {
                                let slot = *slots.entry(key.as_str()).or_insert_with(|| {
                                    values.push(value.clone());
                                    values.len()
                                });
                                if style == PlaceholderStyle::Tds {
                                    format!("@P{slot}")
                                } else {
                                    format!("${slot}")
                                }
                            }
                        };
                        out.push_str(&placeholder);
                    }
                    None => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    BoundQuery { sql: out, values }
}

/// Copy a quoted region starting at `start` (the opening quote) up to and
/// including the closing character. Doubled closers stay inside the region;
/// with `backslash`, so does any character following a `\`.
fn copy_quoted(
    chars: &[char],
    start: usize,
    close: char,
    backslash: bool,
    out: &mut String,
) -> usize {
    out.push(chars[start]);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if backslash && c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == close {
            if chars.get(i + 1) == Some(&close) {
                out.push(close);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Copy through the end of a `--` or `#` comment, newline excluded.
fn copy_line(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i] != '\n' {
        out.push(chars[i]);
        i += 1;
    }
    i
}

/// End (exclusive) of a `$tag$ ... $tag$` body opening at `start`, or `None`
/// when `start` does not open one. An unterminated body runs to the end.
fn dollar_quote_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j).is_some_and(|c| is_ident_start(*c)) {
        while j < chars.len() && is_ident_char(chars[j]) {
            j += 1;
        }
    }
    if chars.get(j) != Some(&'$') {
        return None;
    }
    let tag = &chars[start..=j];
    let body = j + 1;
    let close = (body..chars.len())
        .find(|&k| chars[k..].starts_with(tag))
        .map_or(chars.len(), |k| k + tag.len());
    Some(close)
}

fn follows_ident(chars: &[char], i: usize) -> bool {
    i > 0 && (is_ident_char(chars[i - 1]) || chars[i - 1] == '$')
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
