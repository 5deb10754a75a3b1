//! Row types persisted in the state database.

use serde::{Deserialize, Serialize};

/// A container, keyed by its unique name. Destroyed containers whose
/// packages still live in a shared root are retained as tombstones with a
/// generated unique name and `destroyed = true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub distribution: String,
    pub shared_root: String,
    pub configuration: String,
    pub destroyed: bool,
}

/// Bit flags describing which host wrapper kinds were generated for a
/// package, inferred for legacy rows by a lossy substring heuristic over
/// `local_copies` (see `schema/0.9.6_0.9.7.sql`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCopyType(pub u8);

impl LocalCopyType {
    pub const NONE: Self = Self(0);
    pub const DESKTOP: Self = Self(1);
    pub const EXECUTABLE: Self = Self(2);
    pub const BOTH: Self = Self(3);

    pub fn has_desktop(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn has_executable(self) -> bool {
        self.0 & 2 != 0
    }
}

/// Extra argv fragments appended when invoking a package's sub-executables,
/// keyed by executable name.
pub type PackageFlags = std::collections::BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub container: String,
    pub local_copies: Vec<String>,
    pub local_copy_type: LocalCopyType,
    pub flags: PackageFlags,
    pub explicit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Required,
    Optional,
    Suggestion,
}

impl DepType {
    pub fn as_str(self) -> &'static str {
        match self {
            DepType::Required => "required",
            DepType::Optional => "optional",
            DepType::Suggestion => "suggestion",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "optional" => DepType::Optional,
            "suggestion" => DepType::Suggestion,
            _ => DepType::Required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub name: String,
    pub container: String,
    pub dependency: String,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub name: String,
    pub container_or_root: String,
    pub urls: Vec<String>,
    pub key: String,
    pub options: String,
    pub with_source_repo: bool,
}
