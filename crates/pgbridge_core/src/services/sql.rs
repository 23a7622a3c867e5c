//! SQL text builders for the statements `DatabaseManager` issues.
//!
//! Identifiers are interpolated, so they are validated here first. Values are
//! never interpolated; every value travels as a bound parameter.

use crate::error::{PgBridgeError, PgBridgeResult};
use crate::models::ColumnSpec;

/// PostgreSQL's NAMEDATALEN - 1.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check a bare identifier against `[A-Za-z_][A-Za-z0-9_$]*`.
pub fn validate_identifier(name: &str) -> PgBridgeResult<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if !valid_start || !valid_rest {
        return Err(PgBridgeError::validation(format!("Invalid identifier '{name}'")));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(PgBridgeError::validation(format!(
            "Identifier '{name}' is longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

/// Split `schema.table` into its parts, validating both.
pub fn split_table_name(name: &str) -> PgBridgeResult<(Option<&str>, &str)> {
    match name.split_once('.') {
        Some((schema, table)) => {
            validate_identifier(schema)?;
            validate_identifier(table)?;
            Ok((Some(schema), table))
        }
        None => {
            validate_identifier(name)?;
            Ok((None, name))
        }
    }
}

/// `CREATE TABLE IF NOT EXISTS <table> (<col> <definition>, ...)`
pub fn create_table(table: &str, columns: &[ColumnSpec]) -> PgBridgeResult<String> {
    split_table_name(table)?;
    if columns.is_empty() {
        return Err(PgBridgeError::validation(format!("Table '{table}' needs at least one column")));
    }

    let mut defs = Vec::with_capacity(columns.len());
    for column in columns {
        validate_identifier(&column.name)?;
        let definition = column.definition.trim();
        if definition.is_empty() {
            return Err(PgBridgeError::validation(format!(
                "Column '{}' has an empty type definition",
                column.name
            )));
        }
        defs.push(format!("{} {}", column.name, definition));
    }

    Ok(format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", ")))
}

/// `DROP TABLE IF EXISTS <table> CASCADE`
pub fn drop_table(table: &str) -> PgBridgeResult<String> {
    split_table_name(table)?;
    Ok(format!("DROP TABLE IF EXISTS {table} CASCADE"))
}

/// `INSERT INTO <table> (<cols>) VALUES ($1, ...)`, optionally `ON CONFLICT DO NOTHING`.
pub fn insert(table: &str, columns: &[&str], ignore_duplicates: bool) -> PgBridgeResult<String> {
    split_table_name(table)?;
    validate_columns(columns)?;

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    if ignore_duplicates {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    Ok(sql)
}

/// `UPDATE <table> SET c1 = $1, ... WHERE <condition>`
///
/// `condition` numbers its own placeholders from `$1`; they are shifted past
/// the SET placeholders.
pub fn update(table: &str, columns: &[&str], condition: &str) -> PgBridgeResult<String> {
    split_table_name(table)?;
    validate_columns(columns)?;
    let condition = require_condition(condition)?;

    let assignments: Vec<String> =
        columns.iter().enumerate().map(|(i, c)| format!("{c} = ${}", i + 1)).collect();
    Ok(format!(
        "UPDATE {table} SET {} WHERE {}",
        assignments.join(", "),
        shift_placeholders(condition, columns.len())
    ))
}

/// `DELETE FROM <table> WHERE <condition>`
pub fn delete(table: &str, condition: &str) -> PgBridgeResult<String> {
    split_table_name(table)?;
    let condition = require_condition(condition)?;
    Ok(format!("DELETE FROM {table} WHERE {condition}"))
}

fn validate_columns(columns: &[&str]) -> PgBridgeResult<()> {
    if columns.is_empty() {
        return Err(PgBridgeError::validation("At least one column is required"));
    }
    columns.iter().try_for_each(|c| validate_identifier(c))
}

fn require_condition(condition: &str) -> PgBridgeResult<&str> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err(PgBridgeError::validation(
            "A WHERE condition is required (use TRUE to match every row)",
        ));
    }
    Ok(condition)
}

/// Renumber `$n` placeholders to `$(n + offset)`.
///
/// String literals (including `E'...'` escape strings), quoted identifiers,
/// comments and dollar-quoted bodies are copied untouched.
pub fn shift_placeholders(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            b'\'' if is_escape_string(bytes, i) => escape_string_end(bytes, i + 1),
            quote @ (b'\'' | b'"') => find_from(bytes, i + 1, quote).map_or(bytes.len(), |e| e + 1),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                find_from(bytes, i, b'\n').map_or(bytes.len(), |e| e + 1)
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                sql[i + 2..].find("*/").map_or(bytes.len(), |e| i + 2 + e + 2)
            }
            b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if digits > 0 {
                    let number_end = i + 1 + digits;
                    match sql[i + 1..number_end].parse::<usize>() {
                        Ok(n) => out.push_str(&format!("${}", n + offset)),
                        Err(_) => out.push_str(&sql[i..number_end]),
                    }
                    i = number_end;
                    continue;
                }
                match dollar_quote_tag(&sql[i..]) {
                    Some(tag) => {
                        let body = i + tag.len();
                        sql[body..].find(tag).map_or(bytes.len(), |e| body + e + tag.len())
                    }
                    None => i + 1,
                }
            }
            _ => i + sql[i..].chars().next().map_or(1, char::len_utf8),
        };
        out.push_str(&sql[i..end]);
        i = end;
    }

    out
}

fn find_from(bytes: &[u8], start: usize, needle: u8) -> Option<usize> {
    bytes.get(start..)?.iter().position(|b| *b == needle).map(|p| start + p)
}

/// The quote at `quote` opens an `E'...'` string.
fn is_escape_string(bytes: &[u8], quote: usize) -> bool {
    quote >= 1
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_ident_byte(bytes[quote - 2]))
}

/// End of an escape string body starting at `start`; backslash escapes and
/// doubled quotes do not close it.
fn escape_string_end(bytes: &[u8], start: usize) -> usize {
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\'' if bytes.get(j + 1) == Some(&b'\'') => j += 2,
            b'\'' => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// `$tag$` or `$$` at the start of `s`.
fn dollar_quote_tag(s: &str) -> Option<&str> {
    let rest = &s[1..];
    let close = rest.find('$')?;
    let tag = &rest[..close];
    let valid = tag.chars().next().map_or(true, |c| c.is_ascii_alphabetic() || c == '_')
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| &s[..close + 2])
}

/// Shorten SQL for logging.
pub fn truncate_sql(sql: &str, max_chars: usize) -> String {
    match sql.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &sql[..cut]),
        None => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_tmp$1").is_ok());
        assert!(validate_identifier("order_items").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("users; DROP TABLE x").is_err());
        assert!(validate_identifier("naïve").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_split_table_name() {
        assert_eq!(split_table_name("users").unwrap(), (None, "users"));
        assert_eq!(split_table_name("sales.orders").unwrap(), (Some("sales"), "orders"));
        assert!(split_table_name("a.b.c").is_err());
        assert!(split_table_name(".orders").is_err());
    }

    #[test]
    fn test_create_table() {
        let columns = vec![
            ColumnSpec::new("id", "SERIAL PRIMARY KEY"),
            ColumnSpec::new("name", "TEXT UNIQUE"),
        ];
        assert_eq!(
            create_table("t", &columns).unwrap(),
            "CREATE TABLE IF NOT EXISTS t (id SERIAL PRIMARY KEY, name TEXT UNIQUE)"
        );
    }

    #[test]
    fn test_create_table_rejects_bad_input() {
        assert!(create_table("t", &[]).is_err());
        assert!(create_table("t", &[ColumnSpec::new("bad name", "TEXT")]).is_err());
        assert!(create_table("t", &[ColumnSpec::new("name", "  ")]).is_err());
        let err = create_table("t(x int); --", &[ColumnSpec::new("a", "INT")]).unwrap_err();
        assert_eq!(err.category(), "Validation");
    }

    #[test]
    fn test_drop_table() {
        assert_eq!(drop_table("public.t").unwrap(), "DROP TABLE IF EXISTS public.t CASCADE");
    }

    #[test]
    fn test_insert() {
        assert_eq!(
            insert("users", &["username", "email"], false).unwrap(),
            "INSERT INTO users (username, email) VALUES ($1, $2)"
        );
        assert_eq!(
            insert("users", &["username"], true).unwrap(),
            "INSERT INTO users (username) VALUES ($1) ON CONFLICT DO NOTHING"
        );
        assert!(insert("users", &[], false).is_err());
    }

    #[test]
    fn test_update_shifts_condition_placeholders() {
        assert_eq!(
            update("employees", &["salary", "title"], "department = $1 AND id > $2").unwrap(),
            "UPDATE employees SET salary = $1, title = $2 WHERE department = $3 AND id > $4"
        );
    }

    #[test]
    fn test_update_and_delete_require_condition() {
        assert!(update("t", &["a"], "  ").is_err());
        assert!(delete("t", "").is_err());
        assert_eq!(delete("t", "id = $1").unwrap(), "DELETE FROM t WHERE id = $1");
    }

    #[test]
    fn test_shift_placeholders_skips_literals() {
        assert_eq!(
            shift_placeholders("a = $1 AND b = '$1' AND \"c$1\" = $2", 3),
            "a = $4 AND b = '$1' AND \"c$1\" = $5"
        );
        assert_eq!(shift_placeholders("x = $1 -- $1\nAND y = $2", 1), "x = $2 -- $1\nAND y = $3");
        assert_eq!(shift_placeholders("x = $1 /* $2 */", 1), "x = $2 /* $2 */");
        assert_eq!(shift_placeholders("f($tag$ $1 $tag$, $1)", 2), "f($tag$ $1 $tag$, $3)");
        assert_eq!(shift_placeholders("price$1 = $1", 1), "price$1 = $2");
        assert_eq!(shift_placeholders("name = 'café' AND id = $1", 1), "name = 'café' AND id = $2");
        assert_eq!(
            shift_placeholders(r"note = E'it\'s $1' AND id = $1", 1),
            r"note = E'it\'s $1' AND id = $2"
        );
        assert_eq!(
            shift_placeholders(r"a = e'\\' AND b = $1 AND c = E'x''$1'", 1),
            r"a = e'\\' AND b = $2 AND c = E'x''$1'"
        );
        assert_eq!(shift_placeholders(r"type = '\' AND id = $1", 1), r"type = '\' AND id = $2");
        assert_eq!(shift_placeholders("id = $1", 0), "id = $1");
    }

    #[test]
    fn test_truncate_sql() {
        assert_eq!(truncate_sql("SELECT 1", 100), "SELECT 1");
        assert_eq!(truncate_sql("SELECT 1", 3), "SEL...");
        assert_eq!(truncate_sql("ééé", 2), "éé...");
    }
}
