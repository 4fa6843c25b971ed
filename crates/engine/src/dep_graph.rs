//! Dependency graph between named cells.
//!
//! # Edge Direction
//!
//! ```text
//! S → T  means  "T depends on S"  (T's formula references S)
//! ```
//!
//! - `dependents[S]` = cells whose formulas reference S
//! - `dependees[T]`  = cells referenced by T's formula
//!
//! The graph does no cycle detection; callers check candidate edges against
//! the committed graph before mutating it.

use rustc_hash::{FxHashMap, FxHashSet};

/// Bidirectional multimap of "T depends on S" relationships.
///
/// # Invariants
///
/// 1. **Mirror consistency:** `T ∈ dependents[S]` iff `S ∈ dependees[T]`.
/// 2. **No dangling entries:** empty sets are removed, not stored.
/// 3. **No duplicate edges:** set semantics.
#[derive(Default, Debug, Clone)]
pub struct DependencyGraph {
    /// S -> {T : T depends on S}
    dependents: FxHashMap<String, FxHashSet<String>>,

    /// T -> {S : T depends on S}
    dependees: FxHashMap<String, FxHashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct (S, T) edges.
    pub fn len(&self) -> usize {
        self.dependents.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    pub fn has_dependents(&self, s: &str) -> bool {
        self.dependents.contains_key(s)
    }

    pub fn has_dependees(&self, t: &str) -> bool {
        self.dependees.contains_key(t)
    }

    /// Cells that depend on `s`.
    pub fn dependents(&self, s: &str) -> impl Iterator<Item = &str> + '_ {
        self.dependents
            .get(s)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Cells that `t` depends on.
    pub fn dependees(&self, t: &str) -> impl Iterator<Item = &str> + '_ {
        self.dependees
            .get(t)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Record that `t` depends on `s`. Idempotent.
    pub fn add_dependency(&mut self, s: &str, t: &str) {
        self.dependents
            .entry(s.to_string())
            .or_default()
            .insert(t.to_string());
        self.dependees
            .entry(t.to_string())
            .or_default()
            .insert(s.to_string());
    }

    /// Remove the edge "`t` depends on `s`" if present.
    pub fn remove_dependency(&mut self, s: &str, t: &str) {
        remove_edge(&mut self.dependents, s, t);
        remove_edge(&mut self.dependees, t, s);
    }

    /// Replace every `s → *` edge with edges to `new_dependents`.
    pub fn replace_dependents<I, N>(&mut self, s: &str, new_dependents: I)
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        if let Some(old) = self.dependents.remove(s) {
            for t in old {
                remove_edge(&mut self.dependees, &t, s);
            }
        }
        for t in new_dependents {
            self.add_dependency(s, t.as_ref());
        }
    }

    /// Replace every `* → t` edge with edges from `new_dependees`.
    ///
    /// This is how a cell's formula references are rewired after an edit.
    pub fn replace_dependees<I, N>(&mut self, t: &str, new_dependees: I)
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        if let Some(old) = self.dependees.remove(t) {
            for s in old {
                remove_edge(&mut self.dependents, &s, t);
            }
        }
        for s in new_dependees {
            self.add_dependency(s.as_ref(), t);
        }
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(any(test, feature = "test-util"))]
    pub fn assert_consistent(&self) {
        for (s, ts) in &self.dependents {
            assert!(!ts.is_empty(), "Empty dependents set stored for {s}");
            for t in ts {
                assert!(
                    self.dependees.get(t).is_some_and(|set| set.contains(s)),
                    "Missing dependee edge: {t} should depend on {s}"
                );
            }
        }
        for (t, ss) in &self.dependees {
            assert!(!ss.is_empty(), "Empty dependees set stored for {t}");
            for s in ss {
                assert!(
                    self.dependents.get(s).is_some_and(|set| set.contains(t)),
                    "Missing dependent edge: {s} should list {t}"
                );
            }
        }
    }
}

fn remove_edge(map: &mut FxHashMap<String, FxHashSet<String>>, key: &str, value: &str) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        // Clean up empty entries (invariant: no dangling)
        if set.is_empty() {
            map.remove(key);
        }
    }
}
