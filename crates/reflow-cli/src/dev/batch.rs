//! Batch aggregation.
//!
//! One debounce tick of verdicts becomes an [`EventBatch`]: ignored verdicts
//! are dropped, paths are deduplicated (last event wins) and then verdicts are
//! deduplicated by the rule they matched, so N saves under one pattern run its
//! hooks once. The first content change under a rule represents it; a
//! permission-only verdict only does when nothing else under the rule changed.
//! The other paths ride along in [`Verdict::coalesced`].

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::dev::registry::RuleId;

use crate::dev::classifier::Verdict;

#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    verdicts: Vec<Verdict>,
    has_multiple_events: bool,
    needs_hard_reload_regardless_of_kind: bool,
}

impl EventBatch {
    pub fn from_verdicts(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        let mut by_path: IndexMap<PathBuf, Verdict> = IndexMap::new();
        for verdict in verdicts.into_iter().filter(|v| !v.is_ignored) {
            by_path.insert(verdict.path.clone(), verdict);
        }

        let mut verdicts: Vec<Verdict> = Vec::with_capacity(by_path.len());
        let mut slots: HashMap<RuleId, usize> = HashMap::new();
        for verdict in by_path.into_values() {
            let Some(id) = verdict.matched.as_ref().map(|rule| rule.id) else {
                verdicts.push(verdict);
                continue;
            };
            match slots.get(&id) {
                None => {
                    slots.insert(id, verdicts.len());
                    verdicts.push(verdict);
                }
                Some(&slot) => fold(&mut verdicts[slot], verdict),
            }
        }

        let has_multiple_events = verdicts.len() > 1;
        let needs_hard_reload_regardless_of_kind =
            verdicts.iter().any(Verdict::needs_process_restart);

        Self {
            verdicts,
            has_multiple_events,
            needs_hard_reload_regardless_of_kind,
        }
    }

    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    pub fn into_verdicts(self) -> Vec<Verdict> {
        self.verdicts
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn has_multiple_events(&self) -> bool {
        self.has_multiple_events
    }

    /// Any compiled source, or any matched rule that recompiles or restarts
    /// the managed process.
    pub fn needs_hard_reload_regardless_of_kind(&self) -> bool {
        self.needs_hard_reload_regardless_of_kind
    }

    /// Nothing to do: empty, or every verdict is a permission-only change.
    pub fn is_noop(&self) -> bool {
        self.verdicts
            .iter()
            .all(|verdict| verdict.is_chmod_only_no_content_change)
    }

    /// First verdict whose rule asks for a full development reset.
    pub fn full_reset_trigger(&self) -> Option<&Verdict> {
        self.verdicts.iter().find(|verdict| verdict.triggers_full_reset)
    }
}

/// Fold `other` into the representative of its rule, promoting it when the
/// representative carries no content change and `other` does.
fn fold(representative: &mut Verdict, mut other: Verdict) {
    if representative.is_chmod_only_no_content_change && !other.is_chmod_only_no_content_change {
        std::mem::swap(representative, &mut other);
        representative.coalesced = std::mem::take(&mut other.coalesced);
    }
    representative.coalesced.push(other.path);
}
