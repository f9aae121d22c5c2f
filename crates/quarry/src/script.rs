//! SQL script reading and writing
//!
//! DDL files hold one statement per terminator. Routine, trigger and event
//! bodies contain `;`, so those files switch the terminator with a
//! `DELIMITER` line the same way the `mysql` client does.

use std::fmt::Write as _;

/// Terminator used around compound statements
pub const COMPOUND_DELIMITER: &str = ";;";

/// Append `statements` terminated by `;`
pub fn write_statements(out: &mut String, statements: &[String]) {
    for statement in statements {
        let _ = writeln!(out, "{};", statement.trim_end().trim_end_matches(';'));
    }
}

/// Append compound `statements` inside a `DELIMITER` block
pub fn write_compound_statements(out: &mut String, statements: &[String]) {
    if statements.is_empty() {
        return;
    }
    let _ = writeln!(out, "DELIMITER {}", COMPOUND_DELIMITER);
    for statement in statements {
        let _ = writeln!(out, "{}{}", statement.trim_end(), COMPOUND_DELIMITER);
    }
    out.push_str("DELIMITER ;\n");
}

fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if b == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |n| start + n + 1)
}

fn is_line_comment(bytes: &[u8], i: usize) -> bool {
    match bytes[i] {
        b'#' => true,
        b'-' => {
            bytes.get(i + 1) == Some(&b'-')
                && bytes
                    .get(i + 2)
                    .map_or(true, |b| b.is_ascii_whitespace() || b.is_ascii_control())
        }
        _ => false,
    }
}

fn is_delimiter_command(text: &str) -> bool {
    text.len() > 10 && text.as_bytes()[..10].eq_ignore_ascii_case(b"DELIMITER ")
}

/// Split a script into statements
///
/// Quoted strings and identifiers, comments and `DELIMITER` lines are
/// honored. Comments leading a statement are dropped; `/*! ... */`
/// conditional comments are statement text.
pub fn split_statements(script: &str) -> Vec<String> {
    let bytes = script.as_bytes();
    let mut delimiter = ";".to_string();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut blank = true;
    let mut i = 0;

    let push = |statements: &mut Vec<String>, text: &str| {
        let text = text.trim();
        if !text.is_empty() {
            statements.push(text.to_string());
        }
    };

    while i < bytes.len() {
        let b = bytes[i];
        if blank && (b == b'D' || b == b'd') && is_delimiter_command(&script[i..]) {
            let end = skip_line(bytes, i);
            let value = script[i + 10..end].trim();
            if !value.is_empty() {
                delimiter = value.to_string();
            }
            i = end;
            start = i;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => {
                blank = false;
                i = skip_quoted(bytes, i);
                continue;
            }
            _ if is_line_comment(bytes, i) => {
                i = skip_line(bytes, i);
                if blank {
                    start = i;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') && bytes.get(i + 2) != Some(&b'!') => {
                i = script[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
                if blank {
                    start = i;
                }
                continue;
            }
            _ => {}
        }
        if bytes[i..].starts_with(delimiter.as_bytes()) {
            push(&mut statements, &script[start..i]);
            i += delimiter.len();
            start = i;
            blank = true;
            continue;
        }
        if !b.is_ascii_whitespace() {
            blank = false;
        }
        i += 1;
    }
    push(&mut statements, &script[start.min(bytes.len())..]);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_statements() {
        let script = "-- header\n-- more\n\nCREATE TABLE `a;b` (c varchar(3) DEFAULT ';');\n/*!40101 SET NAMES utf8mb4 */;\nINSERT INTO t VALUES ('it\\'s;', \"x\")";
        assert_eq!(
            split_statements(script),
            vec![
                "CREATE TABLE `a;b` (c varchar(3) DEFAULT ';')",
                "/*!40101 SET NAMES utf8mb4 */",
                "INSERT INTO t VALUES ('it\\'s;', \"x\")",
            ]
        );
    }

    #[test]
    fn test_split_compound_statements() {
        let mut script = String::from("-- routines\n");
        write_statements(&mut script, &["DROP PROCEDURE IF EXISTS `p`".to_string()]);
        write_compound_statements(
            &mut script,
            &["CREATE PROCEDURE `p`()\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND".to_string()],
        );
        write_statements(&mut script, &["SELECT 3".to_string()]);
        assert_eq!(
            split_statements(&script),
            vec![
                "DROP PROCEDURE IF EXISTS `p`",
                "CREATE PROCEDURE `p`()\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND",
                "SELECT 3",
            ]
        );
    }

    #[test]
    fn test_comment_only_script() {
        assert!(split_statements("-- nothing\n/* here */\n").is_empty());
        assert!(split_statements("").is_empty());
    }
}
