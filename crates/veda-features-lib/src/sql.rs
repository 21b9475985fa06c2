//! Quoting helpers for statements that cannot use bind parameters
//! (identifiers, DDL arguments).

/// Quote an identifier: `my "table"` becomes `"my ""table"""`.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal for use in DDL such as `PASSWORD '...'`.
///
/// Assumes `standard_conforming_strings` (the default since PostgreSQL 9.1).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Qualified `schema.table` reference.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_double_embedded_quotes() {
        assert_eq!(quote_ident("veda"), "\"veda\"");
        assert_eq!(quote_ident("postgis-features"), "\"postgis-features\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn literals_double_embedded_quotes() {
        assert_eq!(quote_literal("p@ss"), "'p@ss'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn qualified_names_quote_both_parts() {
        assert_eq!(qualified("public", "Countries"), "\"public\".\"Countries\"");
    }
}
