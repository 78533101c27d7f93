//! Version status flags and per-path status snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::{Path, PathBuf};

/// Combinable status flags for a single path.
///
/// Flags are a fixed-width set; callers mask with `&` to test for a
/// particular state. `ScheduledAdd` and friends mean the backend will apply
/// the change on the next commit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionStatus(u16);

impl VersionStatus {
    pub const NONE: Self = Self(0);
    pub const UNVERSIONED: Self = Self(1 << 0);
    pub const VERSIONED: Self = Self(1 << 1);
    pub const SCHEDULED_ADD: Self = Self(1 << 2);
    pub const SCHEDULED_DELETE: Self = Self(1 << 3);
    pub const SCHEDULED_REPLACE: Self = Self(1 << 4);
    pub const IGNORED: Self = Self(1 << 5);
    pub const MODIFIED: Self = Self(1 << 6);
    pub const CONFLICTED: Self = Self(1 << 7);
    pub const LOCKED: Self = Self(1 << 8);

    /// True if every flag in `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set in `self`.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for VersionStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for VersionStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for VersionStatus {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(VersionStatus, &str); 9] = [
            (VersionStatus::UNVERSIONED, "Unversioned"),
            (VersionStatus::VERSIONED, "Versioned"),
            (VersionStatus::SCHEDULED_ADD, "ScheduledAdd"),
            (VersionStatus::SCHEDULED_DELETE, "ScheduledDelete"),
            (VersionStatus::SCHEDULED_REPLACE, "ScheduledReplace"),
            (VersionStatus::IGNORED, "Ignored"),
            (VersionStatus::MODIFIED, "Modified"),
            (VersionStatus::CONFLICTED, "Conflicted"),
            (VersionStatus::LOCKED, "Locked"),
        ];

        if self.is_empty() {
            return write!(f, "None");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Options accepted by the status query entry points.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryFlags(u8);

impl QueryFlags {
    pub const NONE: Self = Self(0);
    /// Bypass the cache and query the backend synchronously, blocking the
    /// caller until an authoritative answer arrives.
    pub const IGNORE_CACHE: Self = Self(1 << 0);
    /// Also query the backend's remote/upstream state.
    pub const INCLUDE_REMOTE_STATUS: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for QueryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::IGNORE_CACHE) {
            parts.push("IgnoreCache");
        }
        if self.contains(Self::INCLUDE_REMOTE_STATUS) {
            parts.push("IncludeRemoteStatus");
        }
        if parts.is_empty() {
            parts.push("None");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Snapshot of one path's status as last known to the layer.
///
/// The status cache owns its copies; callers always receive clones and a
/// later backend response never mutates a value already handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Normalized absolute path (file or directory).
    pub path: PathBuf,

    pub status: VersionStatus,

    pub is_directory: bool,

    /// Present only when remote status was explicitly requested.
    pub remote_status: Option<VersionStatus>,
}

impl VersionInfo {
    pub fn new(path: impl Into<PathBuf>, status: VersionStatus, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            status,
            is_directory,
            remote_status: None,
        }
    }

    pub fn unversioned(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self::new(path, VersionStatus::UNVERSIONED, is_directory)
    }

    /// Placeholder handed out while the backend has not answered yet.
    /// Optimistically "versioned"; refined once a query completes.
    pub fn pending(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self::new(path, VersionStatus::VERSIONED, is_directory)
    }

    /// A path can be added only when it is exactly unversioned.
    pub fn can_add(&self) -> bool {
        self.status == VersionStatus::UNVERSIONED
    }

    pub fn is_versioned(&self) -> bool {
        self.status.contains(VersionStatus::VERSIONED)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flag_masking() {
        let status = VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD;
        assert_eq!(
            VersionStatus::SCHEDULED_ADD,
            status & VersionStatus::SCHEDULED_ADD
        );
        assert!(status.contains(VersionStatus::VERSIONED));
        assert!(!status.contains(VersionStatus::UNVERSIONED));
    }

    #[test]
    fn test_insert_remove() {
        let mut status = VersionStatus::VERSIONED;
        status.insert(VersionStatus::MODIFIED);
        assert!(status.contains(VersionStatus::MODIFIED));
        status.remove(VersionStatus::MODIFIED);
        assert_eq!(status, VersionStatus::VERSIONED);
    }

    #[test]
    fn test_can_add_only_when_exactly_unversioned() {
        let vi = VersionInfo::unversioned("/tmp/a", false);
        assert!(vi.can_add());

        let vi = VersionInfo::new(
            "/tmp/a",
            VersionStatus::UNVERSIONED | VersionStatus::IGNORED,
            false,
        );
        assert!(!vi.can_add());

        let vi = VersionInfo::new(
            "/tmp/a",
            VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD,
            false,
        );
        assert!(!vi.can_add());
    }

    #[test]
    fn test_pending_placeholder_is_versioned() {
        let vi = VersionInfo::pending("/tmp/a", false);
        assert!(vi.is_versioned());
        assert!(!vi.status.contains(VersionStatus::SCHEDULED_ADD));
    }

    #[test]
    fn test_query_flags() {
        let flags = QueryFlags::IGNORE_CACHE | QueryFlags::INCLUDE_REMOTE_STATUS;
        assert!(flags.contains(QueryFlags::IGNORE_CACHE));
        assert!(!QueryFlags::NONE.contains(QueryFlags::IGNORE_CACHE));
    }

    #[test]
    fn test_debug_format_lists_flags() {
        let status = VersionStatus::VERSIONED | VersionStatus::SCHEDULED_DELETE;
        assert_eq!(format!("{:?}", status), "Versioned|ScheduledDelete");
        assert_eq!(format!("{:?}", VersionStatus::NONE), "None");
    }

    proptest! {
        // can_add is a pure function of the flag set: true iff the set is
        // exactly {Unversioned}.
        #[test]
        fn prop_can_add_iff_exactly_unversioned(bits in 0u16..512) {
            let status = VersionStatus(bits);
            let vi = VersionInfo::new("/tmp/p", status, false);
            prop_assert_eq!(vi.can_add(), status == VersionStatus::UNVERSIONED);
        }

        // Inserting then removing a flag restores the original set when the
        // flag was not present before.
        #[test]
        fn prop_insert_remove_roundtrip(bits in 0u16..512, flag_idx in 0u32..9) {
            let flag = VersionStatus(1 << flag_idx);
            let original = VersionStatus(bits & !(1u16 << flag_idx));
            let mut status = original;
            status.insert(flag);
            prop_assert!(status.contains(flag));
            status.remove(flag);
            prop_assert_eq!(status, original);
        }
    }
}
