//! Single-writer SQLite-backed state store: containers, packages,
//! dependencies, repositories, and schema migration.
//!
//! Every write transaction is wrapped by an exclusive hold on a sibling
//! `.lock` file rather than relying on SQLite's own busy timeout, so lock
//! contention is reported uniformly as [`Error::LockTimeout`] regardless of
//! whether the contention is on the file or inside SQLite.

mod models;
mod schema;

pub use models::{
    ContainerRecord, DepType, DependencyRecord, LocalCopyType, PackageFlags, PackageRecord,
    RepositoryRecord,
};
pub use schema::CURRENT_VERSION;

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::lock::FileLock;
use crate::{Error, Result};

/// Ceiling on how long a caller waits for the state-DB lock before giving up
/// with [`Error::LockTimeout`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Store {
    conn: Connection,
    lock_path: PathBuf,
    /// Set while a [`TransactionGuard`] is held, so the per-call `write_lock`/
    /// `read_lock` taken inside individual `Store` methods skip re-acquiring a
    /// lock the caller already holds (re-flocking the same path from a second
    /// `File` handle in this process would block on itself).
    locked: Rc<Cell<bool>>,
}

/// Holds the state-DB lock for several `Store` calls made as one unit (an
/// install, an uninstall, a repair), so they are serialized globally against
/// any other process or invocation touching the same store.
///
/// Reentrant: nesting a second `begin_transaction` inside the first (e.g. a
/// recursive dependency uninstall) returns immediately without re-flocking,
/// and only the outermost guard's drop actually releases the lock.
pub struct TransactionGuard {
    _file: Option<FileLock>,
    owns: bool,
    locked: Rc<Cell<bool>>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.owns {
            self.locked.set(false);
        }
    }
}

impl Store {
    /// Opens (creating if necessary) the state database under `data_dir`,
    /// migrating it to [`CURRENT_VERSION`] if needed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("state.db");
        let lock_path = data_dir.join("state.db.lock");

        let write_guard =
            FileLock::acquire_exclusive(&lock_path, DEFAULT_LOCK_TIMEOUT, &AtomicBool::new(false))?;
        let mut conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;
        drop(write_guard);

        Ok(Self {
            conn,
            lock_path,
            locked: Rc::new(Cell::new(false)),
        })
    }

    /// Opens an in-memory store already migrated to current, for tests. The
    /// lock file still lives on disk (under the system temp directory) since
    /// advisory locks are meaningless against an in-memory database.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let lock_path =
            std::env::temp_dir().join(format!("ybox-test-lock-{}-{id}", std::process::id()));

        Ok(Self {
            conn,
            lock_path,
            locked: Rc::new(Cell::new(false)),
        })
    }

    pub fn schema_version(&self) -> Result<String> {
        Ok(schema::current_version(&self.conn)?.unwrap_or_default())
    }

    /// Acquires the exclusive state-DB lock and holds it until the returned
    /// guard is dropped, serializing every `Store` call a caller makes while
    /// it's alive into one logical transaction. Must be acquired before any
    /// shared-root lock, per this crate's documented lock ordering.
    pub fn begin_transaction(&self, cancelled: &AtomicBool) -> Result<TransactionGuard> {
        if self.locked.get() {
            return Ok(TransactionGuard {
                _file: None,
                owns: false,
                locked: self.locked.clone(),
            });
        }
        let file = FileLock::acquire_exclusive(&self.lock_path, DEFAULT_LOCK_TIMEOUT, cancelled)?;
        self.locked.set(true);
        Ok(TransactionGuard {
            _file: Some(file),
            owns: true,
            locked: self.locked.clone(),
        })
    }

    fn write_lock(&self, cancelled: &AtomicBool) -> Result<Option<FileLock>> {
        if self.locked.get() {
            return Ok(None);
        }
        Ok(Some(FileLock::acquire_exclusive(
            &self.lock_path,
            DEFAULT_LOCK_TIMEOUT,
            cancelled,
        )?))
    }

    fn read_lock(&self, cancelled: &AtomicBool) -> Result<Option<FileLock>> {
        if self.locked.get() {
            return Ok(None);
        }
        Ok(Some(FileLock::acquire_shared(
            &self.lock_path,
            DEFAULT_LOCK_TIMEOUT,
            cancelled,
        )?))
    }

    /// Idempotent: re-registering the same name updates the row in place.
    pub fn register_container(
        &mut self,
        record: &ContainerRecord,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        self.conn.execute(
            "INSERT INTO containers (name, distribution, shared_root, configuration, destroyed) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(name) DO UPDATE SET \
               distribution=excluded.distribution, shared_root=excluded.shared_root, \
               configuration=excluded.configuration, destroyed=excluded.destroyed",
            params![
                record.name,
                record.distribution,
                record.shared_root,
                record.configuration,
                record.destroyed as i64,
            ],
        )?;
        Ok(())
    }

    pub fn container(&self, name: &str) -> Result<Option<ContainerRecord>> {
        self.conn
            .query_row(
                "SELECT name, distribution, shared_root, configuration, destroyed \
                 FROM containers WHERE name = ?1",
                params![name],
                row_to_container,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, distribution, shared_root, configuration, destroyed FROM containers",
        )?;
        let rows = stmt.query_map([], row_to_container)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Marks a container destroyed in place (tombstone retained; caller is
    /// responsible for renaming to a unique key beforehand if this container
    /// still has packages referenced in a shared root).
    pub fn mark_container_destroyed(&mut self, name: &str, cancelled: &AtomicBool) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let changed = self.conn.execute(
            "UPDATE containers SET destroyed = 1 WHERE name = ?1",
            params![name],
        )?;
        if changed == 0 {
            return Err(Error::ContainerNotFound(name.to_owned()));
        }
        Ok(())
    }

    /// Renames a destroyed container row to `new_name`, used when a tombstone
    /// must free up the original name while its packages survive in a shared
    /// root.
    pub fn rename_container(
        &mut self,
        name: &str,
        new_name: &str,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE containers SET name = ?2 WHERE name = ?1",
            params![name, new_name],
        )?;
        tx.execute(
            "UPDATE packages SET container = ?2 WHERE container = ?1",
            params![name, new_name],
        )?;
        tx.execute(
            "UPDATE package_deps SET container = ?2 WHERE container = ?1",
            params![name, new_name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes a destroyed container's row only if no package still
    /// references it (invariant I5). Returns whether it was purged.
    pub fn purge_destroyed_if_unreferenced(
        &mut self,
        name: &str,
        cancelled: &AtomicBool,
    ) -> Result<bool> {
        let _guard = self.write_lock(cancelled)?;
        let referenced: i64 = self.conn.query_row(
            "SELECT count(*) FROM packages WHERE container = ?1",
            params![name],
            |row| row.get(0),
        )?;
        if referenced > 0 {
            return Ok(false);
        }
        let changed = self.conn.execute(
            "DELETE FROM containers WHERE name = ?1 AND destroyed = 1",
            params![name],
        )?;
        Ok(changed > 0)
    }

    /// Records a package row. Idempotent: installing the same package twice
    /// overwrites the row with identical content (P5).
    pub fn record_package(&mut self, record: &PackageRecord, cancelled: &AtomicBool) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let local_copies = serde_json::to_string(&record.local_copies)?;
        let flags = serde_json::to_string(&record.flags)?;
        self.conn.execute(
            "INSERT INTO packages (name, container, local_copies, local_copy_type, flags, explicit) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(name, container) DO UPDATE SET \
               local_copies=excluded.local_copies, local_copy_type=excluded.local_copy_type, \
               flags=excluded.flags, explicit=excluded.explicit",
            params![
                record.name,
                record.container,
                local_copies,
                record.local_copy_type.0 as i64,
                flags,
                record.explicit as i64,
            ],
        )?;
        Ok(())
    }

    pub fn remove_package(&mut self, name: &str, container: &str, cancelled: &AtomicBool) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM package_deps WHERE name = ?1 AND container = ?2",
            params![name, container],
        )?;
        tx.execute(
            "DELETE FROM packages WHERE name = ?1 AND container = ?2",
            params![name, container],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes every package and dependency row attributed to `container`,
    /// for a non-shared-root destroy where nothing else can reference them
    /// afterwards.
    pub fn remove_all_packages(&mut self, container: &str, cancelled: &AtomicBool) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM package_deps WHERE container = ?1",
            params![container],
        )?;
        tx.execute("DELETE FROM packages WHERE container = ?1", params![container])?;
        tx.commit()?;
        Ok(())
    }

    pub fn package(&self, name: &str, container: &str) -> Result<Option<PackageRecord>> {
        self.conn
            .query_row(
                "SELECT name, container, local_copies, local_copy_type, flags, explicit \
                 FROM packages WHERE name = ?1 AND container = ?2",
                params![name, container],
                row_to_package,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn list_packages(&self, container: &str) -> Result<Vec<PackageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, container, local_copies, local_copy_type, flags, explicit \
             FROM packages WHERE container = ?1",
        )?;
        let rows = stmt.query_map(params![container], row_to_package)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn add_dependency(&mut self, record: &DependencyRecord, cancelled: &AtomicBool) -> Result<()> {
        if record.name == record.dependency {
            return Err(Error::PackageOpError(format!(
                "{} cannot depend on itself",
                record.name
            )));
        }
        let _guard = self.write_lock(cancelled)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO package_deps (name, container, dependency, dep_type) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.name,
                record.container,
                record.dependency,
                record.dep_type.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn remove_dependency(
        &mut self,
        name: &str,
        container: &str,
        dependency: &str,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        self.conn.execute(
            "DELETE FROM package_deps WHERE name = ?1 AND container = ?2 AND dependency = ?3",
            params![name, container, dependency],
        )?;
        Ok(())
    }

    /// Number of surviving packages that still depend on `dependency` within
    /// `container`. A dependency is eligible for removal once this reaches 0.
    pub fn dependency_refcount(&self, container: &str, dependency: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT count(*) FROM package_deps WHERE container = ?1 AND dependency = ?2",
                params![container, dependency],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    pub fn dependencies_of(&self, name: &str, container: &str) -> Result<Vec<DependencyRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, container, dependency, dep_type FROM package_deps \
             WHERE name = ?1 AND container = ?2",
        )?;
        let rows = stmt.query_map(params![name, container], row_to_dependency)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn add_repo(&mut self, record: &RepositoryRecord, cancelled: &AtomicBool) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        let urls = serde_json::to_string(&record.urls)?;
        self.conn.execute(
            "INSERT INTO repositories (name, container_or_root, urls, key, options, with_source_repo) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(name, container_or_root) DO UPDATE SET \
               urls=excluded.urls, key=excluded.key, options=excluded.options, \
               with_source_repo=excluded.with_source_repo",
            params![
                record.name,
                record.container_or_root,
                urls,
                record.key,
                record.options,
                record.with_source_repo as i64,
            ],
        )?;
        Ok(())
    }

    pub fn remove_repo(
        &mut self,
        name: &str,
        container_or_root: &str,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        let _guard = self.write_lock(cancelled)?;
        self.conn.execute(
            "DELETE FROM repositories WHERE name = ?1 AND container_or_root = ?2",
            params![name, container_or_root],
        )?;
        Ok(())
    }

    /// Acquires a read lock for callers that want the read-lock/write-lock
    /// distinction enforced explicitly (e.g. a long read followed by a
    /// separate write transaction).
    pub fn read_guard(&self, cancelled: &AtomicBool) -> Result<FileLock> {
        FileLock::acquire_shared(&self.lock_path, DEFAULT_LOCK_TIMEOUT, cancelled)
    }
}

fn row_to_container(row: &rusqlite::Row) -> rusqlite::Result<ContainerRecord> {
    Ok(ContainerRecord {
        name: row.get(0)?,
        distribution: row.get(1)?,
        shared_root: row.get(2)?,
        configuration: row.get(3)?,
        destroyed: row.get::<_, i64>(4)? != 0,
    })
}

fn row_to_package(row: &rusqlite::Row) -> rusqlite::Result<PackageRecord> {
    let local_copies_raw: String = row.get(2)?;
    let flags_raw: String = row.get(4)?;
    Ok(PackageRecord {
        name: row.get(0)?,
        container: row.get(1)?,
        local_copies: serde_json::from_str(&local_copies_raw).unwrap_or_default(),
        local_copy_type: LocalCopyType(row.get::<_, i64>(3)? as u8),
        flags: serde_json::from_str(&flags_raw).unwrap_or_default(),
        explicit: row.get::<_, i64>(5)? != 0,
    })
}

fn row_to_dependency(row: &rusqlite::Row) -> rusqlite::Result<DependencyRecord> {
    let dep_type_raw: String = row.get(3)?;
    Ok(DependencyRecord {
        name: row.get(0)?,
        container: row.get(1)?,
        dependency: row.get(2)?,
        dep_type: DepType::parse(&dep_type_raw),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn container(name: &str) -> ContainerRecord {
        ContainerRecord {
            name: name.to_owned(),
            distribution: "arch".to_owned(),
            shared_root: String::new(),
            configuration: "[base]\nname = c1\n".to_owned(),
            destroyed: false,
        }
    }

    fn package(name: &str, container: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_owned(),
            container: container.to_owned(),
            local_copies: vec![],
            local_copy_type: LocalCopyType::NONE,
            flags: PackageFlags::new(),
            explicit: true,
        }
    }

    #[test_log::test]
    fn register_then_fetch_container() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        let fetched = store.container("c1").unwrap().unwrap();
        assert_eq!(fetched.distribution, "arch");
        assert!(!fetched.destroyed);
    }

    #[test_log::test]
    fn destroy_without_packages_purges_immediately() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        store.mark_container_destroyed("c1", &cancelled).unwrap();
        let purged = store
            .purge_destroyed_if_unreferenced("c1", &cancelled)
            .unwrap();
        assert!(purged);
        assert!(store.container("c1").unwrap().is_none());
    }

    #[test_log::test]
    fn destroy_with_surviving_packages_keeps_tombstone() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        store.record_package(&package("vim", "c1"), &cancelled).unwrap();
        store.mark_container_destroyed("c1", &cancelled).unwrap();
        let purged = store
            .purge_destroyed_if_unreferenced("c1", &cancelled)
            .unwrap();
        assert!(!purged);
        assert!(store.container("c1").unwrap().unwrap().destroyed);
    }

    #[test_log::test]
    fn recording_a_package_twice_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        store.record_package(&package("vim", "c1"), &cancelled).unwrap();
        store.record_package(&package("vim", "c1"), &cancelled).unwrap();
        assert_eq!(store.list_packages("c1").unwrap().len(), 1);
    }

    #[test_log::test]
    fn self_referential_dependency_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        store.record_package(&package("zoom", "c1"), &cancelled).unwrap();
        let dep = DependencyRecord {
            name: "zoom".to_owned(),
            container: "c1".to_owned(),
            dependency: "zoom".to_owned(),
            dep_type: DepType::Optional,
        };
        let err = store.add_dependency(&dep, &cancelled).unwrap_err();
        assert!(matches!(err, Error::PackageOpError(_)));
    }

    #[test_log::test]
    fn dependency_refcount_tracks_installs_and_removals() {
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store.register_container(&container("c1"), &cancelled).unwrap();
        store.record_package(&package("zoom", "c1"), &cancelled).unwrap();
        store.record_package(&package("qt5ct", "c1"), &cancelled).unwrap();
        let dep = DependencyRecord {
            name: "zoom".to_owned(),
            container: "c1".to_owned(),
            dependency: "qt5ct".to_owned(),
            dep_type: DepType::Optional,
        };
        store.add_dependency(&dep, &cancelled).unwrap();
        assert_eq!(store.dependency_refcount("c1", "qt5ct").unwrap(), 1);
        store
            .remove_dependency("zoom", "c1", "qt5ct", &cancelled)
            .unwrap();
        assert_eq!(store.dependency_refcount("c1", "qt5ct").unwrap(), 0);
    }
}
