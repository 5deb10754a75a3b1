//! Schema creation and forward-only migration.
//!
//! Scripts are bundled SQL files under `schema/`, embedded at compile time:
//! `<version>-added.sql` creates the tables as of that version; `<from>_<to>.sql`
//! migrates between two released versions. A script may reference a shared
//! fragment via a line of the form `SOURCE 'name.sql';`, expanded before
//! execution.

use rusqlite::Connection;

use crate::{Error, Result};

/// The schema version this build of ybox was written against.
pub const CURRENT_VERSION: &str = "0.9.11";

const INITIAL_VERSION: &str = "0.9.0";
const INITIAL_SCRIPT: &str = include_str!("../../schema/0.9.0-added.sql");

struct Migration {
    from: &'static str,
    to: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        from: "0.9.0",
        to: "0.9.1",
        sql: include_str!("../../schema/0.9.0_0.9.1.sql"),
    },
    Migration {
        from: "0.9.1",
        to: "0.9.2",
        sql: include_str!("../../schema/0.9.1_0.9.2.sql"),
    },
    Migration {
        from: "0.9.2",
        to: "0.9.5",
        sql: include_str!("../../schema/0.9.2_0.9.5.sql"),
    },
    Migration {
        from: "0.9.5",
        to: "0.9.6",
        sql: include_str!("../../schema/0.9.5_0.9.6.sql"),
    },
    Migration {
        from: "0.9.6",
        to: "0.9.7",
        sql: include_str!("../../schema/0.9.6_0.9.7.sql"),
    },
    Migration {
        from: "0.9.7",
        to: "0.9.10",
        sql: include_str!("../../schema/0.9.7_0.9.10.sql"),
    },
    Migration {
        from: "0.9.10",
        to: "0.9.11",
        sql: include_str!("../../schema/0.9.10_0.9.11.sql"),
    },
];

/// Shared SQL fragments a migration script can pull in via `SOURCE '...';`.
fn named_fragment(name: &str) -> Option<&'static str> {
    match name {
        "mark_explicit.sql" => Some(include_str!("../../schema/mark_explicit.sql")),
        _ => None,
    }
}

fn expand_sources(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for line in sql.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed
            .strip_prefix("SOURCE '")
            .and_then(|s| s.strip_suffix("';"))
        {
            if let Some(fragment) = named_fragment(name) {
                out.push_str(fragment);
                out.push('\n');
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn parse_version(v: &str) -> Vec<u32> {
    v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    parse_version(a).cmp(&parse_version(b))
}

/// Reads `schema.version`, returning `None` if the table doesn't exist yet
/// (a brand new database file).
pub fn current_version(conn: &Connection) -> Result<Option<String>> {
    let exists: bool = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='schema'",
        [],
        |row| row.get::<_, i64>(0),
    )? > 0;
    if !exists {
        return Ok(None);
    }
    let version: String = conn.query_row("SELECT version FROM schema", [], |row| row.get(0))?;
    Ok(Some(version))
}

/// Brings `conn`'s schema up to [`CURRENT_VERSION`], running the initial
/// creation script if the database is new, then any outstanding forward
/// migrations in order. Each script runs in its own transaction. Fails with
/// [`Error::SchemaTooNew`] if the database is already newer than this build
/// supports, or [`Error::NoMigrationPath`] if no script covers the gap.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version = match current_version(conn)? {
        None => {
            let tx = conn.transaction()?;
            tx.execute_batch(&expand_sources(INITIAL_SCRIPT))?;
            tx.commit()?;
            INITIAL_VERSION.to_owned()
        }
        Some(v) => v,
    };

    let mut version = version;
    loop {
        if version == CURRENT_VERSION {
            return Ok(());
        }
        if compare_versions(&version, CURRENT_VERSION) == std::cmp::Ordering::Greater {
            return Err(Error::SchemaTooNew {
                db: version,
                supported: CURRENT_VERSION.to_owned(),
            });
        }
        let Some(step) = MIGRATIONS.iter().find(|m| m.from == version) else {
            return Err(Error::NoMigrationPath(version));
        };
        let tx = conn.transaction()?;
        tx.execute_batch(&expand_sources(step.sql))?;
        tx.commit()?;
        version = step.to.to_owned();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test_log::test]
    fn fresh_database_migrates_to_current() {
        let mut conn = open_memory();
        migrate(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap().as_deref(), Some(CURRENT_VERSION));
    }

    #[test_log::test]
    fn migration_is_idempotent_once_current() {
        let mut conn = open_memory();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap().as_deref(), Some(CURRENT_VERSION));
    }

    #[test_log::test]
    fn legacy_0_9_0_database_migrates_through_every_step() {
        let mut conn = open_memory();
        conn.execute_batch(INITIAL_SCRIPT).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap().as_deref(), Some(CURRENT_VERSION));

        let has_destroyed: i64 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('containers') WHERE name='destroyed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_destroyed, 1);

        let has_local_copy_type: i64 = conn
            .query_row(
                "SELECT count(*) FROM pragma_table_info('packages') WHERE name='local_copy_type'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_local_copy_type, 1);
    }

    #[test_log::test]
    fn local_copy_type_heuristic_classifies_known_shapes() {
        let mut conn = open_memory();
        conn.execute_batch(INITIAL_SCRIPT).unwrap();
        conn.execute(
            "INSERT INTO containers (name, distribution, configuration) VALUES ('c1', 'arch', '')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO packages (name, container, local_copies) VALUES \
             ('firefox', 'c1', '[\"/home/a/.local/share/applications/c1-firefox.desktop\", \"/home/a/.local/bin/c1-firefox\"]')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO packages (name, container, local_copies) VALUES ('man-only', 'c1', '[]')",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let firefox_type: i64 = conn
            .query_row(
                "SELECT local_copy_type FROM packages WHERE name='firefox'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(firefox_type, 3);

        let man_only_type: i64 = conn
            .query_row(
                "SELECT local_copy_type FROM packages WHERE name='man-only'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(man_only_type, 0);
    }

    #[test_log::test]
    fn database_newer_than_supported_is_rejected() {
        let mut conn = open_memory();
        conn.execute_batch(INITIAL_SCRIPT).unwrap();
        conn.execute("UPDATE schema SET version = '99.0.0'", []).unwrap();
        let err = migrate(&mut conn).unwrap_err();
        assert!(matches!(err, Error::SchemaTooNew { .. }));
    }
}
