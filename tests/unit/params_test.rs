use flexboard_agent::params::{PlaceholderStyle, bind_named};
use flexboard_agent::query::Params;
use serde_json::{Value, json};

fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_tds_placeholders_numbered_by_first_use() {
    let p = params(&[("region", json!("EMEA")), ("year", json!(2024))]);
    let bound = bind_named(
        "SELECT * FROM sales WHERE year = @year AND region = @region",
        &p,
        PlaceholderStyle::Tds,
    );
    assert_eq!(
        bound.sql,
        "SELECT * FROM sales WHERE year = @P1 AND region = @P2"
    );
    assert_eq!(bound.values, vec![json!(2024), json!("EMEA")]);
}

#[test]
fn test_dollar_placeholders_reuse_slot_for_repeated_name() {
    let p = params(&[("id", json!(7))]);
    let bound = bind_named(
        "SELECT * FROM t WHERE a = @id OR b = @id",
        &p,
        PlaceholderStyle::Dollar,
    );
    assert_eq!(bound.sql, "SELECT * FROM t WHERE a = $1 OR b = $1");
    assert_eq!(bound.values, vec![json!(7)]);
}

#[test]
fn test_question_placeholders_bind_each_occurrence() {
    let p = params(&[("id", json!(7))]);
    let bound = bind_named(
        "SELECT * FROM t WHERE a = @id OR b = @id",
        &p,
        PlaceholderStyle::Question,
    );
    assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ? OR b = ?");
    assert_eq!(bound.values, vec![json!(7), json!(7)]);
}

#[test]
fn test_unknown_names_and_system_variables_untouched() {
    let p = params(&[("limit", json!(10))]);
    let sql = "DECLARE @total INT; SELECT TOP (@limit) *, @@ROWCOUNT FROM t";
    let bound = bind_named(sql, &p, PlaceholderStyle::Tds);
    assert_eq!(
        bound.sql,
        "DECLARE @total INT; SELECT TOP (@P1) *, @@ROWCOUNT FROM t"
    );
    assert_eq!(bound.values.len(), 1);
}

#[test]
fn test_quoted_literals_and_comments_untouched() {
    let p = params(&[("name", json!("x"))]);
    let sql = "SELECT '@name', 'it''s @name' -- @name\nFROM t /* @name */ WHERE n = @name";
    let bound = bind_named(sql, &p, PlaceholderStyle::Dollar);
    assert_eq!(
        bound.sql,
        "SELECT '@name', 'it''s @name' -- @name\nFROM t /* @name */ WHERE n = $1"
    );
    assert_eq!(bound.values, vec![json!("x")]);
}

#[test]
fn test_bracketed_identifiers_skipped_for_tds_only() {
    let p = params(&[("col", json!(1))]);
    let tds = bind_named("SELECT [@col] FROM t WHERE c = @col", &p, PlaceholderStyle::Tds);
    assert_eq!(tds.sql, "SELECT [@col] FROM t WHERE c = @P1");
}

#[test]
fn test_values_never_inlined() {
    let p = params(&[("name", json!("'; DROP TABLE users; --"))]);
    let bound = bind_named("SELECT * FROM users WHERE name = @name", &p, PlaceholderStyle::Tds);
    assert!(!bound.sql.contains("DROP"));
    assert_eq!(bound.values, vec![json!("'; DROP TABLE users; --")]);
}

#[test]
fn test_no_params_leaves_sql_unchanged() {
    let sql = "SELECT 1";
    let bound = bind_named(sql, &Params::new(), PlaceholderStyle::Question);
    assert_eq!(bound.sql, sql);
    assert!(bound.values.is_empty());
}

#[test]
fn test_mysql_backslash_escape_stays_inside_literal() {
    let p = params(&[("x", json!(1))]);
    let bound = bind_named(r"SELECT 'a\' @x', @x", &p, PlaceholderStyle::Question);
    assert_eq!(bound.sql, r"SELECT 'a\' @x', ?");
    assert_eq!(bound.values, vec![json!(1)]);

    let bound = bind_named(r#"SELECT "\"@x" FROM t # @x"#, &p, PlaceholderStyle::Question);
    assert_eq!(bound.sql, r#"SELECT "\"@x" FROM t # @x"#);
    assert!(bound.values.is_empty());
}

#[test]
fn test_backslash_is_literal_outside_mysql() {
    // Standard strings end at the first quote after the backslash
    let p = params(&[("x", json!(1))]);
    let bound = bind_named(r"SELECT 'a\', @x", &p, PlaceholderStyle::Dollar);
    assert_eq!(bound.sql, r"SELECT 'a\', $1");
    let bound = bind_named(r"SELECT 'a\', @x", &p, PlaceholderStyle::Tds);
    assert_eq!(bound.sql, r"SELECT 'a\', @P1");
}

#[test]
fn test_postgres_dollar_quoted_bodies_untouched() {
    let p = params(&[("x", json!(1))]);
    let bound = bind_named("SELECT $$ it's @x $$, @x", &p, PlaceholderStyle::Dollar);
    assert_eq!(bound.sql, "SELECT $$ it's @x $$, $1");
    assert_eq!(bound.values, vec![json!(1)]);

    let bound = bind_named(
        "SELECT $fn$ $$ @x $fn$ FROM t WHERE a = @x",
        &p,
        PlaceholderStyle::Dollar,
    );
    assert_eq!(bound.sql, "SELECT $fn$ $$ @x $fn$ FROM t WHERE a = $1");
}

#[test]
fn test_postgres_escape_strings_untouched() {
    let p = params(&[("x", json!(1))]);
    let bound = bind_named(r"SELECT E'it\'s @x', @x", &p, PlaceholderStyle::Dollar);
    assert_eq!(bound.sql, r"SELECT E'it\'s @x', $1");
    assert_eq!(bound.values, vec![json!(1)]);

    // A trailing `e` on an identifier does not start an escape string
    let bound = bind_named("SELECT name'@x' , @x", &p, PlaceholderStyle::Dollar);
    assert_eq!(bound.sql, "SELECT name'@x' , $1");
}
