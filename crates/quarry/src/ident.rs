//! Identifier quoting, qualified-name parsing and file-name encoding

use std::fmt::Write;

/// Quote an identifier with backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `` `schema`.`object` ``
pub fn quote_qualified(schema: &str, object: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(object))
}

/// Quote a string literal
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// `'user'@'host'`
pub fn format_account(user: &str, host: &str) -> String {
    format!("{}@{}", quote_string(user), quote_string(host))
}

/// Encode a name for use in a file name
///
/// Bytes outside `[A-Za-z0-9_]` become `%` followed by two hex digits, so the
/// result never contains the `@` and `.` separators used by the dump layout.
pub fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02x}", b);
        }
    }
    out
}

/// Reverse of [`encode_name`]
pub fn decode_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn is_plain_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || (c as u32) >= 0x80
}

/// Split a possibly backtick-quoted, dot-separated name into its parts
///
/// Unquoted parts must be non-empty, may only use identifier characters and
/// must not consist of digits alone.
pub fn split_qualified(name: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = name.trim().chars().collect();
    if chars.is_empty() {
        return Err("name is empty".to_string());
    }
    let mut parts = Vec::new();
    let mut i = 0;
    loop {
        let mut part = String::new();
        if chars.get(i) == Some(&'`') {
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(format!("unterminated quoted identifier in {}", name)),
                    Some('`') if chars.get(i + 1) == Some(&'`') => {
                        part.push('`');
                        i += 2;
                    }
                    Some('`') => {
                        i += 1;
                        break;
                    }
                    Some(c) => {
                        part.push(*c);
                        i += 1;
                    }
                }
            }
        } else {
            while let Some(c) = chars.get(i) {
                if *c == '.' {
                    break;
                }
                if !is_plain_identifier_char(*c) {
                    return Err(format!("invalid character '{}' in identifier {}", c, name));
                }
                part.push(*c);
                i += 1;
            }
            if part.is_empty() {
                return Err(format!("empty identifier in {}", name));
            }
            if part.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!(
                    "identifier '{}' in {} must be quoted because it consists of digits only",
                    part, name
                ));
            }
        }
        parts.push(part);
        match chars.get(i) {
            None => return Ok(parts),
            Some('.') => i += 1,
            Some(c) => return Err(format!("unexpected character '{}' in {}", c, name)),
        }
    }
}

/// Parse an account as `'user'@'host'`, `user@host` or a bare `user`
///
/// A bare user name yields `None` for the host and matches every host.
pub fn parse_account(account: &str) -> Result<(String, Option<String>), String> {
    fn unquote(part: &str) -> Result<String, String> {
        let part = part.trim();
        for q in ['\'', '"', '`'] {
            if part.len() >= 2 && part.starts_with(q) && part.ends_with(q) {
                let inner = &part[1..part.len() - 1];
                let doubled: String = [q, q].iter().collect();
                return Ok(inner.replace(&doubled, &q.to_string()).replace("\\'", "'"));
            }
        }
        if part.contains(['\'', '"', '`']) {
            return Err(format!("invalid quoting in account part {}", part));
        }
        Ok(part.to_string())
    }

    let account = account.trim();
    if account.is_empty() {
        return Err("account is empty".to_string());
    }
    // the separating @ is the first one outside quotes
    let mut quote: Option<char> = None;
    let mut split_at = None;
    for (idx, c) in account.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' || c == '`' => quote = Some(c),
            None if c == '@' => {
                split_at = Some(idx);
                break;
            }
            None => {}
        }
    }
    match split_at {
        Some(idx) => Ok((
            unquote(&account[..idx])?,
            Some(unquote(&account[idx + 1..])?),
        )),
        None => Ok((unquote(account)?, None)),
    }
}

/// Case handling for names, per `lower_case_table_names`
pub fn fold_case(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}
