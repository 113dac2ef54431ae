// src/resolver/solution.rs

use super::state::State;
use crate::pool::{PackageId, Pool};

/// The change set computed by a successful resolution
///
/// `installs` holds every package to add (including the new side of a
/// replacement), `erasures` every installed package to drop (including the
/// old side). Both are in pool order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    pub installs: Vec<PackageId>,
    pub erasures: Vec<PackageId>,
    /// (installed package, package replacing it)
    pub replacements: Vec<(PackageId, PackageId)>,
}

impl Solution {
    pub(crate) fn from_state(pool: &Pool, state: &State) -> Self {
        let installs = state.selected.iter().copied().collect();
        let erasures = state
            .removed
            .iter()
            .copied()
            .filter(|&id| pool.get(id).is_installed())
            .collect();
        let replacements = state
            .replaced
            .iter()
            .map(|(&old, &new)| (old, new))
            .collect();

        Self {
            installs,
            erasures,
            replacements,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.installs.is_empty() && self.erasures.is_empty()
    }

    /// The package replacing `installed`, if any
    pub fn replacement_for(&self, installed: PackageId) -> Option<PackageId> {
        self.replacements
            .iter()
            .find(|(old, _)| *old == installed)
            .map(|&(_, new)| new)
    }
}
