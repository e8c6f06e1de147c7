//! Named column layouts for composed constraint systems.
//!
//! The dependence and violation systems concatenate several relations whose
//! columns land in interleaved sub-blocks of one big matrix. Addressing those
//! columns by hand-computed offsets is where off-by-one errors silently
//! analyze the wrong coordinates, so the offsets are computed once here and
//! every write goes through a `(block, index)` pair.

use serde::{Deserialize, Serialize};

use crate::polyhedral::relation::{AffineRelation, ROW_UNUSED};

/// A named column block of a composed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Block {
    /// Source iteration dimensions (dependence system).
    SourceIter,
    /// Source access output dimensions (dependence system).
    SourceAccess,
    /// Target iteration dimensions (dependence system).
    TargetIter,
    /// Target access output dimensions (dependence system).
    TargetAccess,
    /// Source domain local dimensions (dependence system).
    SourceLocalDomain,
    /// Source access local dimensions (dependence system).
    SourceLocalAccess,
    /// Target domain local dimensions (dependence system).
    TargetLocalDomain,
    /// Target access local dimensions (dependence system).
    TargetLocalAccess,
    /// The dependence domain's output block (violation system).
    DepOutput,
    /// Source scattering output dimensions (violation system).
    SourceScattering,
    /// The dependence domain's input block (violation system).
    DepInput,
    /// Target scattering output dimensions (violation system).
    TargetScattering,
    /// The dependence domain's source local dimensions (violation system).
    DepSourceLocal,
    /// Source scattering local dimensions (violation system).
    SourceScatteringLocal,
    /// The dependence domain's target local dimensions (violation system).
    DepTargetLocal,
    /// Target scattering local dimensions (violation system).
    TargetScatteringLocal,
    /// Parameter columns.
    Param,
}

/// An ordered list of blocks with their widths; offsets are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    blocks: Vec<(Block, usize)>,
}

impl ColumnLayout {
    /// Build a layout from blocks in column order.
    pub fn new(blocks: Vec<(Block, usize)>) -> Self {
        Self { blocks }
    }

    /// Width of a block; zero when the block is absent.
    pub fn width(&self, block: Block) -> usize {
        self.blocks
            .iter()
            .find(|(b, _)| *b == block)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    /// Column of the first entry of `block` (the tag column is column 0).
    pub fn offset(&self, block: Block) -> usize {
        let mut col = 1;
        for (b, w) in &self.blocks {
            if *b == block {
                return col;
            }
            col += w;
        }
        panic!("block {:?} is not part of this layout", block);
    }

    /// Column of entry `k` inside `block`.
    pub fn col(&self, block: Block, k: usize) -> usize {
        assert!(k < self.width(block), "index {} out of block {:?}", k, block);
        self.offset(block) + k
    }

    /// Total number of matrix columns: tag + blocks + constant.
    pub fn nb_columns(&self) -> usize {
        1 + self.blocks.iter().map(|(_, w)| w).sum::<usize>() + 1
    }
}

/// Builds an [`AffineRelation`] whose columns are addressed by block name.
#[derive(Debug, Clone)]
pub struct SystemBuilder {
    layout: ColumnLayout,
    relation: AffineRelation,
}

impl SystemBuilder {
    /// Start a system with the given layout and dimension bookkeeping.
    ///
    /// `out`, `inp`, `local` and `params` are the counts recorded on the
    /// resulting relation; their sum must match the layout width.
    pub fn new(layout: ColumnLayout, out: usize, inp: usize, local: usize, params: usize) -> Self {
        let relation = AffineRelation::new(out, inp, local, params);
        assert_eq!(layout.nb_columns(), relation.nb_columns());
        Self { layout, relation }
    }

    /// The layout in use.
    pub fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Append an unused row slot and return its index.
    pub fn blank_row(&mut self) -> usize {
        self.relation.push_row(vec![0; self.relation.nb_columns()]);
        let row = self.relation.nb_rows() - 1;
        self.relation.set(row, 0, ROW_UNUSED);
        row
    }

    /// Set the tag of a row, marking it used.
    pub fn set_tag(&mut self, row: usize, tag: i64) {
        self.relation.set(row, 0, tag);
    }

    /// Set one entry of a row by block name.
    pub fn set(&mut self, row: usize, block: Block, k: usize, value: i64) {
        let col = self.layout.col(block, k);
        self.relation.set(row, col, value);
    }

    /// Copy contiguous values into a block, starting at its first column.
    pub fn copy(&mut self, row: usize, block: Block, values: &[i64]) {
        assert!(values.len() <= self.layout.width(block));
        let start = self.layout.offset(block);
        for (k, &v) in values.iter().enumerate() {
            self.relation.set(row, start + k, v);
        }
    }

    /// Copy contiguous values into a block, negating each one.
    pub fn copy_negated(&mut self, row: usize, block: Block, values: &[i64]) {
        assert!(values.len() <= self.layout.width(block));
        let start = self.layout.offset(block);
        for (k, &v) in values.iter().enumerate() {
            self.relation.set(row, start + k, -v);
        }
    }

    /// Set the constant term of a row.
    pub fn set_constant(&mut self, row: usize, value: i64) {
        let col = self.relation.col_constant();
        self.relation.set(row, col, value);
    }

    /// Add to the constant term of a row.
    pub fn add_constant(&mut self, row: usize, delta: i64) {
        let col = self.relation.col_constant();
        let v = self.relation.get(row, col);
        self.relation.set(row, col, v + delta);
    }

    /// Finish and return the built relation.
    pub fn finish(self) -> AffineRelation {
        self.relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::relation::ROW_EQUALITY;

    fn sample_layout() -> ColumnLayout {
        ColumnLayout::new(vec![
            (Block::SourceIter, 2),
            (Block::SourceAccess, 1),
            (Block::TargetIter, 2),
            (Block::TargetAccess, 1),
            (Block::Param, 1),
        ])
    }

    #[test]
    fn test_offsets() {
        let layout = sample_layout();
        assert_eq!(layout.offset(Block::SourceIter), 1);
        assert_eq!(layout.offset(Block::SourceAccess), 3);
        assert_eq!(layout.offset(Block::TargetIter), 4);
        assert_eq!(layout.col(Block::TargetAccess, 0), 6);
        assert_eq!(layout.col(Block::Param, 0), 7);
        assert_eq!(layout.nb_columns(), 9);
    }

    #[test]
    #[should_panic]
    fn test_out_of_block_index_panics() {
        let layout = sample_layout();
        layout.col(Block::SourceIter, 2);
    }

    #[test]
    fn test_builder_round_trip() {
        let layout = sample_layout();
        let mut builder = SystemBuilder::new(layout, 3, 3, 0, 1);
        let row = builder.blank_row();
        builder.set_tag(row, ROW_EQUALITY);
        builder.set(row, Block::SourceIter, 1, -1);
        builder.set(row, Block::TargetIter, 1, 1);
        builder.set_constant(row, 4);
        let relation = builder.finish();
        assert_eq!(relation.row(0), &[0, 0, -1, 0, 0, 1, 0, 0, 4]);
    }
}
