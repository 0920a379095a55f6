//! Built-in garm schema migration.
//!
//! Creates every internal table garm needs (§3.1). Applied before any
//! operator-supplied migrations, and only once (tracked in
//! `garm_schema_migrations`).

use super::runner::Migration;

const GARM_INTERNAL_SQL: &str = include_str!("../../migrations/0000_garm_internal.sql");

pub fn get_builtin_migrations() -> Vec<Migration> {
    vec![Migration::parse("0000_garm_internal", GARM_INTERNAL_SQL)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_migration_is_not_empty() {
        let migrations = get_builtin_migrations();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "0000_garm_internal");
        assert!(!migrations[0].up_sql.is_empty());
    }

    #[test]
    fn builtin_migration_declares_every_spec_table() {
        let migrations = get_builtin_migrations();
        let sql = &migrations[0].up_sql;
        for table in [
            "garm_endpoints",
            "garm_credentials",
            "garm_entities",
            "garm_pools",
            "garm_scale_sets",
            "garm_instances",
            "garm_instance_events",
            "garm_jobs",
            "garm_templates",
            "garm_file_objects",
            "garm_file_object_tags",
        ] {
            assert!(
                sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
