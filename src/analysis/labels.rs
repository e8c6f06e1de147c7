//! Analysis-scoped statement metadata and label mappings.
//!
//! The analyses need, for every statement, its program-order label, its loop
//! depth, and a stable identifier for each surrounding loop. That metadata
//! lives in a side table computed once per analysis pass and dropped with
//! it; statements themselves are never mutated.

use serde::{Deserialize, Serialize};

use crate::analysis::scop::Scop;
use crate::utils::errors::{AnalysisError, Result};

/// Per-statement analysis metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementInfo {
    /// Program-order label: the statement's position in the SCoP.
    pub label: usize,
    /// Loop depth (half the scattering output dimension count).
    pub depth: usize,
    /// One identifier per surrounding loop, outermost first. Two statements
    /// share an identifier exactly when they share that loop.
    pub index: Vec<usize>,
}

/// The per-pass side table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopInfo {
    /// Metadata per statement, indexed by label.
    pub statements: Vec<StatementInfo>,
    /// `(array id, loop id)` pairs found privatizable by the scalar
    /// analysis; populated on demand.
    pub scalars_privatizable: Option<Vec<(i64, usize)>>,
}

impl ScopInfo {
    /// Compute the side table for a SCoP.
    ///
    /// Loop identifiers are minted with a sliding running maximum per depth:
    /// a fresh identifier appears at depth `j` only when the statement's
    /// static scattering constant at `j` strictly exceeds the maximum seen
    /// so far at that depth. Minting at depth `j` resets the deeper maxima,
    /// so statements in provably distinct outer loop instances never share
    /// an inner identifier.
    pub fn compute(scop: &Scop) -> Result<Self> {
        let mut statements = Vec::with_capacity(scop.statements.len());
        let mut last: Vec<Option<i64>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut cur_index = 0usize;

        for (label, stmt) in scop.statements.iter().enumerate() {
            let depth = stmt.depth();
            if last.len() < depth {
                last.resize(depth, None);
                current.resize(depth, 0);
            }
            for j in 0..depth {
                let beta = stmt
                    .scattering_constant(j)
                    .ok_or(AnalysisError::NonConstantScattering { label, dim: 2 * j })?;
                let fresh = match last[j] {
                    None => true,
                    Some(max) => beta > max,
                };
                if fresh {
                    last[j] = Some(beta);
                    current[j] = cur_index;
                    cur_index += 1;
                    for deeper in last.iter_mut().skip(j + 1) {
                        *deeper = None;
                    }
                }
            }
            statements.push(StatementInfo {
                label,
                depth,
                index: current[..depth].to_vec(),
            });
        }

        Ok(Self { statements, scalars_privatizable: None })
    }

    /// Metadata of the statement with the given label.
    pub fn stmt(&self, label: usize) -> &StatementInfo {
        &self.statements[label]
    }

    /// Number of outermost loops shared by two statements.
    pub fn common_loops(&self, l1: usize, l2: usize) -> usize {
        let a = &self.statements[l1].index;
        let b = &self.statements[l2].index;
        a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
    }
}

/// An association list reconciling union-expanded statement labels with the
/// originals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pairs: Vec<(usize, usize)>,
}

impl LabelMapping {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mapped` was expanded from `original`.
    pub fn push(&mut self, original: usize, mapped: usize) {
        self.pairs.push((original, mapped));
    }

    /// The original label a mapped label came from.
    pub fn find_original(&self, mapped: usize) -> Option<usize> {
        self.pairs.iter().find(|(_, m)| *m == mapped).map(|(o, _)| *o)
    }

    /// All mapped labels expanded from an original label.
    pub fn mapped_for(&self, original: usize) -> impl Iterator<Item = usize> + '_ {
        self.pairs
            .iter()
            .filter(move |(o, _)| *o == original)
            .map(|(_, m)| *m)
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pair was recorded.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::scop::{identity_scattering, parametric_domain, Statement};
    use crate::polyhedral::relation::AffineRelation;

    fn scop_with_betas(betas: &[&[i64]]) -> Scop {
        let mut scop = Scop::new(AffineRelation::context(1));
        for b in betas {
            let depth = b.len() - 1;
            scop.statements.push(Statement::new(
                parametric_domain(depth, 0, 1),
                identity_scattering(depth, b, 1),
                vec![],
            ));
        }
        scop
    }

    #[test]
    fn test_same_loop_shares_index() {
        // Two statements under the same outer loop, different positions.
        let scop = scop_with_betas(&[&[0, 0], &[0, 1]]);
        let info = ScopInfo::compute(&scop).unwrap();
        assert_eq!(info.stmt(0).index, info.stmt(1).index);
        assert_eq!(info.common_loops(0, 1), 1);
    }

    #[test]
    fn test_distinct_loops_get_fresh_indices() {
        // Second statement sits in a later loop at depth 0.
        let scop = scop_with_betas(&[&[0, 0], &[1, 0]]);
        let info = ScopInfo::compute(&scop).unwrap();
        assert_ne!(info.stmt(0).index[0], info.stmt(1).index[0]);
        assert_eq!(info.common_loops(0, 1), 0);
    }

    #[test]
    fn test_inner_index_resets_with_outer() {
        // Nest 1: betas (0, 0, 0); nest 2: betas (1, 0, 0). The inner loops
        // are distinct even though the depth-1 constants are equal.
        let scop = scop_with_betas(&[&[0, 0, 0], &[1, 0, 0]]);
        let info = ScopInfo::compute(&scop).unwrap();
        assert_ne!(info.stmt(0).index[1], info.stmt(1).index[1]);
    }

    #[test]
    fn test_depths() {
        let scop = scop_with_betas(&[&[0, 0, 0], &[1]]);
        let info = ScopInfo::compute(&scop).unwrap();
        assert_eq!(info.stmt(0).depth, 2);
        assert_eq!(info.stmt(1).depth, 0);
        assert!(info.stmt(1).index.is_empty());
    }

    #[test]
    fn test_label_mapping() {
        let mut mapping = LabelMapping::new();
        mapping.push(0, 0);
        mapping.push(0, 1);
        mapping.push(1, 2);
        assert_eq!(mapping.find_original(1), Some(0));
        assert_eq!(mapping.find_original(2), Some(1));
        assert_eq!(mapping.mapped_for(0).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(mapping.len(), 3);
    }
}
