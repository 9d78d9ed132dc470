//! Identifier and literal quoting for rendered statements.

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"qualifier"."name"`
pub fn qualified(qualifier: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(qualifier), quote_ident(name))
}

/// Render `expr AS "name"`, omitting the alias when the expression already is that bare column.
pub fn select_item(expr_sql: &str, name: &str) -> String {
    let ident = quote_ident(name);
    if expr_sql == ident {
        ident
    } else {
        format!("{expr_sql} AS {ident}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_str("it's"), "'it''s'");
        assert_eq!(qualified("_l", "id"), "\"_l\".\"id\"");
        assert_eq!(select_item("\"id\"", "id"), "\"id\"");
        assert_eq!(select_item("(\"a\" + 1)", "b"), "(\"a\" + 1) AS \"b\"");
    }
}
