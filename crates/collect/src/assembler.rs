use std::collections::BTreeMap;

use kubesnap_core::{ClusterSnapshot, Diagnostic, FetchError, KeyPolicy, ResourceIdentity, Stage, TypeSnapshot};

/// Counters for one assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Types that returned at least one instance.
    pub fetched: usize,
    pub empty: usize,
    pub failed: usize,
    /// Non-empty types that lost a key collision.
    pub overwritten: usize,
}

struct Slot {
    ordinal: usize,
    identity: ResourceIdentity,
    snapshot: TypeSnapshot,
    /// Identities that lost this key, with their ordinals.
    losers: Vec<(usize, ResourceIdentity)>,
}

/// Folds per-type fetch outcomes into a [`ClusterSnapshot`].
///
/// Outcomes may arrive in any order. Each carries the ordinal of its entry in
/// discovery order; when two non-empty types map to the same key the higher
/// ordinal wins, whatever order they completed in.
pub struct Assembler {
    policy: KeyPolicy,
    slots: BTreeMap<String, Slot>,
    diagnostics: Vec<(usize, Diagnostic)>,
    stats: AssemblyStats,
}

impl Assembler {
    pub fn new(policy: KeyPolicy) -> Self {
        Self { policy, slots: BTreeMap::new(), diagnostics: Vec::new(), stats: AssemblyStats::default() }
    }

    pub fn insert(&mut self, ordinal: usize, identity: ResourceIdentity, outcome: Result<TypeSnapshot, FetchError>) {
        let snapshot = match outcome {
            Ok(s) => s,
            Err(e) => {
                self.stats.failed += 1;
                self.diagnostics.push((ordinal, Diagnostic::from(&e)));
                return;
            }
        };
        if snapshot.is_empty() {
            self.stats.empty += 1;
            return;
        }
        self.stats.fetched += 1;

        let key = self.policy.key_for(&identity);
        match self.slots.get_mut(&key) {
            None => {
                self.slots.insert(key, Slot { ordinal, identity, snapshot, losers: Vec::new() });
            }
            Some(slot) if ordinal > slot.ordinal => {
                let prev = std::mem::replace(&mut slot.identity, identity);
                slot.losers.push((slot.ordinal, prev));
                slot.ordinal = ordinal;
                slot.snapshot = snapshot;
            }
            Some(slot) => slot.losers.push((ordinal, identity)),
        }
    }

    pub fn stats(&self) -> AssemblyStats {
        AssemblyStats { overwritten: self.slots.values().map(|s| s.losers.len()).sum(), ..self.stats }
    }

    /// Freeze the snapshot. Diagnostics come back in discovery order.
    pub fn finish(self) -> (ClusterSnapshot, Vec<Diagnostic>, AssemblyStats) {
        let stats = self.stats();
        let mut diagnostics = self.diagnostics;
        let mut entries = Vec::with_capacity(self.slots.len());
        for (key, mut slot) in self.slots {
            slot.losers.sort_by_key(|(ordinal, _)| *ordinal);
            for (ordinal, loser) in slot.losers {
                let msg = format!("key {:?} also produced by {}; kept {}", key, loser, slot.identity);
                diagnostics.push((ordinal, Diagnostic::new(Stage::Collision, loser.to_string(), msg)));
            }
            entries.push((key, slot.snapshot));
        }
        diagnostics.sort_by_key(|(ordinal, _)| *ordinal);
        (ClusterSnapshot::from_entries(entries), diagnostics.into_iter().map(|(_, d)| d).collect(), stats)
    }
}
