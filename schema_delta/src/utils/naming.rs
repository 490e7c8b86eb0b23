//! Naming utilities for schema_delta
//!
//! Identifier quoting, generated constraint names, and the canonical text
//! form used to compare DDL read back from a database with DDL we render.

use once_cell::sync::Lazy;
use regex::Regex;

static PLAIN_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").expect("valid identifier regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static IF_NOT_EXISTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bif\s+not\s+exists\b").expect("valid if-not-exists regex"));

/// Words that must be quoted when used as identifiers
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "both", "case", "check", "collate", "column",
    "constraint", "create", "default", "desc", "distinct", "do", "else", "end", "except",
    "false", "for", "foreign", "from", "group", "having", "in", "index", "into", "is", "join",
    "key", "limit", "not", "null", "offset", "on", "or", "order", "primary", "references",
    "select", "table", "then", "to", "true", "union", "unique", "user", "using", "when",
    "where", "with",
];

/// Quote an identifier only when the engine would otherwise fold or reject it
pub fn quote_if_needed(name: &str) -> String {
    if PLAIN_IDENTIFIER.is_match(name) && !RESERVED_WORDS.contains(&name) {
        name.to_string()
    } else {
        quote(name)
    }
}

/// Always quote an identifier
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Format a name according to a pattern with placeholders
pub fn format_name(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();

    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{}}}", placeholder), value);
    }

    result
}

/// Default primary key constraint name for a table
pub fn primary_key_name(table: &str, columns: &[String]) -> String {
    format_name(
        "pkey_{table}_{columns}",
        &[("table", table), ("columns", &columns.join("_"))],
    )
}

/// Name of the shadow table used while rebuilding `table`
pub fn shadow_table_name(table: &str) -> String {
    format_name("{table}_temp", &[("table", table)])
}

/// Collapse whitespace and lower-case SQL text for loose comparison
pub fn normalize_whitespace(sql: &str) -> String {
    WHITESPACE
        .replace_all(sql.trim(), " ")
        .to_lowercase()
        .trim_end_matches(';')
        .trim_end()
        .to_string()
}

/// Canonical form of index DDL
///
/// Quotes, `IF NOT EXISTS`, the default `USING btree`, the schema qualifier
/// in front of `table` and any trailing semicolon are all removed.
pub fn canonicalize_ddl(ddl: &str, schema: &str, table: &str) -> String {
    let without_clause = IF_NOT_EXISTS.replace_all(ddl, " ");
    let mut text = normalize_whitespace(&without_clause).replace('"', "");

    let qualified = format!(" on {}.{}", schema.to_lowercase(), table.to_lowercase());
    let bare = format!(" on {}", table.to_lowercase());
    text = text.replace(&qualified, &bare);
    text = text.replace(" using btree", "");
    text = text.replace(" (", "(").replace("( ", "(").replace(" )", ")");

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quote_if_needed("people"), "people");
        assert_eq!(quote_if_needed("People"), "\"People\"");
        assert_eq!(quote_if_needed("order"), "\"order\"");
        assert_eq!(quote_if_needed("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn generated_names() {
        assert_eq!(
            primary_key_name("people", &["id".to_string(), "tenant".to_string()]),
            "pkey_people_id_tenant"
        );
        assert_eq!(shadow_table_name("people"), "people_temp");
    }

    #[test]
    fn canonical_index_ddl_ignores_formatting_noise() {
        let rendered = "CREATE INDEX IF NOT EXISTS idx_people_age ON public.people USING btree (age);";
        let read_back = "CREATE INDEX idx_people_age ON public.people USING btree (age)";
        let sqlite = "CREATE INDEX \"idx_people_age\" ON \"people\"(\"age\")";

        let expected = canonicalize_ddl(rendered, "public", "people");
        assert_eq!(expected, canonicalize_ddl(read_back, "public", "people"));
        assert_eq!(expected, canonicalize_ddl(sqlite, "main", "people"));
        assert_eq!(expected, "create index idx_people_age on people(age)");
    }
}
