//! SQL run by the bootstrap function.
//!
//! Every statement can be re-run against an already bootstrapped database:
//! objects are created with `IF NOT EXISTS` or inside a guarded `DO` block,
//! and grants are repeatable by nature. `CREATE DATABASE` cannot be guarded
//! in SQL, so the caller checks `pg_database` first.

use veda_features_lib::sql::{quote_ident, quote_literal};

/// Database the admin connects to before the application database exists.
pub const MAINTENANCE_DATABASE: &str = "postgres";

/// Existence check for the application database; the name binds to `$1`.
pub const DATABASE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

/// Create the login role, or reset its password when it exists, and let the
/// admin act as it (needed to create objects it owns).
pub fn role_statements(username: &str, password: &str) -> Vec<String> {
    let role = quote_ident(username);
    let password = quote_literal(password);
    vec![
        format!(
            r#"DO $bootstrap$
BEGIN
  IF NOT EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = {name}) THEN
    CREATE ROLE {role} LOGIN PASSWORD {password};
  ELSE
    ALTER ROLE {role} WITH LOGIN PASSWORD {password};
  END IF;
END
$bootstrap$"#,
            name = quote_literal(username),
            role = role,
            password = password,
        ),
        format!("GRANT {} TO CURRENT_USER", role),
    ]
}

/// Create the application database owned by the admin.
pub fn create_database_statement(dbname: &str, owner: &str) -> String {
    format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(dbname),
        quote_ident(owner)
    )
}

/// Database level grants for the application role.
pub fn database_grant_statements(dbname: &str, username: &str) -> Vec<String> {
    let db = quote_ident(dbname);
    let role = quote_ident(username);
    vec![
        format!("GRANT CONNECT ON DATABASE {} TO {}", db, role),
        format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", db, role),
    ]
}

/// Statements run inside the application database.
pub fn schema_statements(username: &str) -> Vec<String> {
    let role = quote_ident(username);
    vec![
        "CREATE EXTENSION IF NOT EXISTS postgis".to_string(),
        format!("CREATE SCHEMA IF NOT EXISTS {role} AUTHORIZATION {role}"),
        format!("GRANT USAGE ON SCHEMA public TO {role}"),
        format!("GRANT SELECT ON ALL TABLES IN SCHEMA public TO {role}"),
        format!("ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT ON TABLES TO {role}"),
        format!("ALTER ROLE {role} SET search_path TO {role}, public"),
    ]
}
