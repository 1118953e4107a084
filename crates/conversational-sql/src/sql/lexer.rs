//! Quote-aware scanning of SQL text: comment removal, literal masking and
//! table references in FROM/JOIN clauses.

use std::collections::BTreeSet;

/// Words that end a FROM clause when seen outside parentheses
const FROM_CLAUSE_END: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "EXCEPT", "INTERSECT", "WINDOW", "RETURNING",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    UnterminatedQuote,
    UnterminatedComment,
}

impl LexError {
    pub fn as_str(&self) -> &'static str {
        match self {
            LexError::UnterminatedQuote => "Unterminated quoted text in SQL",
            LexError::UnterminatedComment => "Unterminated comment in SQL",
        }
    }
}

fn closing_quote(c: char) -> Option<char> {
    match c {
        '\'' => Some('\''),
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    }
}

/// Drop `--` and `/* */` comments that sit outside quoted text. Each comment
/// becomes a single space so the tokens around it stay apart.
pub fn strip_comments(sql: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(close) = closing_quote(c) {
            out.push(c);
            loop {
                match chars.next() {
                    Some(q) if q == close => {
                        out.push(q);
                        // doubled quote is an escaped quote
                        if close != ']' && chars.peek() == Some(&close) {
                            out.push(close);
                            chars.next();
                            continue;
                        }
                        break;
                    }
                    Some(other) => out.push(other),
                    None => return Err(LexError::UnterminatedQuote),
                }
            }
            continue;
        }

        match (c, chars.peek()) {
            ('-', Some('-')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        closed = true;
                        break;
                    }
                    prev = skipped;
                }
                if !closed {
                    return Err(LexError::UnterminatedComment);
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Blank out the contents of single-quoted literals. Byte offsets are kept,
/// so a match found in the masked text indexes the original text too.
///
/// Expects comment-free text with balanced quotes.
pub fn mask_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            if in_literal && chars.peek() == Some(&'\'') {
                chars.next();
                out.push_str("  ");
                continue;
            }
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        } else {
            out.push(c);
        }
    }
    out
}

/// Parenthesis depth at byte offset `pos`, ignoring quoted text
pub fn paren_depth_at(sql: &str, pos: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, c) in sql.char_indices() {
        if idx >= pos {
            break;
        }
        match quote {
            Some(close) if c == close => quote = None,
            Some(_) => {}
            None => match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                other => quote = closing_quote(other),
            },
        }
    }
    depth
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Literal,
    Punct(char),
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut iter = sql.char_indices().peekable();

    while let Some((start, c)) = iter.next() {
        if c.is_whitespace() {
            continue;
        }
        if let Some(close) = closing_quote(c) {
            let mut end = sql.len();
            while let Some((idx, q)) = iter.next() {
                if q == close {
                    if close != ']' && iter.peek().map(|(_, n)| *n) == Some(close) {
                        iter.next();
                        continue;
                    }
                    end = idx;
                    break;
                }
            }
            let inner = &sql[start + c.len_utf8()..end];
            tokens.push(if c == '\'' { Token::Literal } else { Token::Quoted(inner) });
            continue;
        }
        if is_word_char(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(idx, n)) = iter.peek() {
                if !is_word_char(n) {
                    break;
                }
                end = idx + n.len_utf8();
                iter.next();
            }
            tokens.push(Token::Word(&sql[start..end]));
            continue;
        }
        tokens.push(Token::Punct(c));
    }
    tokens
}

fn is_keyword(token: &Token<'_>, keyword: &str) -> bool {
    matches!(token, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
}

/// Name of the table item starting at `i` (`schema.table` keeps the table part)
fn table_name(tokens: &[Token<'_>], i: usize) -> Option<String> {
    let first = match tokens.get(i)? {
        Token::Word(w) | Token::Quoted(w) => *w,
        _ => return None,
    };
    match (tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(Token::Punct('.')), Some(Token::Word(w) | Token::Quoted(w))) => Some(w.to_lowercase()),
        _ => Some(first.to_lowercase()),
    }
}

/// Every table in the FROM clause whose keyword sits at `from_idx`: comma
/// lists, JOIN chains and aliases included. Subqueries are skipped here; their
/// own FROM keywords are visited separately.
fn collect_from_clause(tokens: &[Token<'_>], from_idx: usize, tables: &mut BTreeSet<String>) {
    let mut depth = 0usize;
    let mut expect_item = true;
    let mut i = from_idx + 1;

    while let Some(token) = tokens.get(i) {
        if depth == 0 && expect_item {
            expect_item = false;
            if let Some(name) = table_name(tokens, i) {
                tables.insert(name);
            }
        }
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') if depth == 0 => return,
            Token::Punct(')') => depth -= 1,
            Token::Punct(';') if depth == 0 => return,
            Token::Punct(',') if depth == 0 => expect_item = true,
            Token::Word(w) if depth == 0 => {
                if w.eq_ignore_ascii_case("JOIN") {
                    expect_item = true;
                } else if FROM_CLAUSE_END.iter().any(|end| w.eq_ignore_ascii_case(end)) {
                    return;
                }
            }
            _ => {}
        }
        i += 1;
    }
}

/// Lowercased table names referenced by FROM lists and JOINs of
/// comment-free, literal-masked SQL.
pub fn table_references(masked_sql: &str) -> BTreeSet<String> {
    let tokens = tokenize(masked_sql);
    let mut tables = BTreeSet::new();
    for (idx, token) in tokens.iter().enumerate() {
        if is_keyword(token, "FROM") {
            collect_from_clause(&tokens, idx, &mut tables);
        } else if is_keyword(token, "JOIN") {
            if let Some(name) = table_name(&tokens, idx + 1) {
                tables.insert(name);
            }
        }
    }
    tables
}
