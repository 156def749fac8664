//! Raw filesystem notifications.
//!
//! `notify` reports richly typed events; reconciliation only cares about which
//! operations touched a path, so events are flattened into [`RawEvent`]s with
//! a small set of [`OpFlags`].

use notify::event::{EventKind, ModifyKind};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::time::Instant;

/// Set of operations observed for one path.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpFlags(u8);

impl OpFlags {
    pub const WRITE: OpFlags = OpFlags(1);
    pub const CREATE: OpFlags = OpFlags(1 << 1);
    pub const REMOVE: OpFlags = OpFlags(1 << 2);
    pub const RENAME: OpFlags = OpFlags(1 << 3);
    pub const CHMOD: OpFlags = OpFlags(1 << 4);

    /// Any operation that can change a file's content or existence.
    pub const CONTENT: OpFlags = OpFlags(1 | 1 << 1 | 1 << 2 | 1 << 3);

    pub const fn empty() -> Self {
        OpFlags(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set.
    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one bit of `other` is set.
    pub const fn intersects(self, other: OpFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Map a `notify` event kind. Access events carry no change and map to `None`.
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        let op = match kind {
            EventKind::Access(_) => return None,
            EventKind::Create(_) => OpFlags::CREATE,
            EventKind::Modify(ModifyKind::Metadata(_)) => OpFlags::CHMOD,
            EventKind::Modify(ModifyKind::Name(_)) => OpFlags::RENAME,
            EventKind::Modify(_) => OpFlags::WRITE,
            EventKind::Remove(_) => OpFlags::REMOVE,
            EventKind::Any | EventKind::Other => OpFlags::WRITE,
        };
        Some(op)
    }
}

impl BitOr for OpFlags {
    type Output = OpFlags;

    fn bitor(self, rhs: OpFlags) -> OpFlags {
        OpFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpFlags {
    fn bitor_assign(&mut self, rhs: OpFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for OpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(OpFlags, &str); 5] = [
            (OpFlags::WRITE, "WRITE"),
            (OpFlags::CREATE, "CREATE"),
            (OpFlags::REMOVE, "REMOVE"),
            (OpFlags::RENAME, "RENAME"),
            (OpFlags::CHMOD, "CHMOD"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("(empty)")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// One path touched by one filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub op: OpFlags,
    pub at: Instant,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, op: OpFlags) -> Self {
        Self {
            path: path.into(),
            op,
            at: Instant::now(),
        }
    }

    /// Flatten a `notify` event into one raw event per path.
    pub fn from_notify(event: &notify::Event) -> Vec<RawEvent> {
        let Some(op) = OpFlags::from_kind(&event.kind) else {
            return Vec::new();
        };
        let at = Instant::now();
        event
            .paths
            .iter()
            .map(|path| RawEvent {
                path: path.clone(),
                op,
                at,
            })
            .collect()
    }
}
