use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{GapFillError, Result};

/// Default upper bound on a single output chunk, in bytes.
pub const DEFAULT_TARGET_CHUNK_BYTES: usize = 100_000_000;

/// Block partitioning of an N-D array: one list of chunk extents per axis.
///
/// Extents along an axis sum to that axis' length. An empty axis is stored
/// as a single zero-length chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChunkLayout")]
pub struct ChunkLayout {
    chunks: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct RawChunkLayout {
    chunks: Vec<Vec<usize>>,
}

impl TryFrom<RawChunkLayout> for ChunkLayout {
    type Error = GapFillError;

    fn try_from(raw: RawChunkLayout) -> Result<Self> {
        let shape: Vec<usize> = raw.chunks.iter().map(|c| c.iter().sum()).collect();
        Self::from_chunks(&shape, raw.chunks)
    }
}

impl ChunkLayout {
    /// One chunk spanning each axis.
    pub fn single(shape: &[usize]) -> Self {
        Self {
            chunks: shape.iter().map(|&n| vec![n]).collect(),
        }
    }

    /// Regular chunks of at most `extents[i]` along axis `i`.
    pub fn regular(shape: &[usize], extents: &[usize]) -> Result<Self> {
        if shape.len() != extents.len() {
            return Err(GapFillError::Dimension(format!(
                "{} chunk extents given for {} axes",
                extents.len(),
                shape.len()
            )));
        }
        let mut chunks = Vec::with_capacity(shape.len());
        for (&n, &e) in shape.iter().zip(extents) {
            if e == 0 {
                return Err(GapFillError::Dimension("chunk extent must be positive".into()));
            }
            chunks.push(split_regular(n, e));
        }
        Ok(Self { chunks })
    }

    /// Explicit chunk extents; each axis must sum to its length.
    pub fn from_chunks(shape: &[usize], chunks: Vec<Vec<usize>>) -> Result<Self> {
        if shape.len() != chunks.len() {
            return Err(GapFillError::Dimension(format!(
                "{} chunk lists given for {} axes",
                chunks.len(),
                shape.len()
            )));
        }
        for (axis, (&n, c)) in shape.iter().zip(&chunks).enumerate() {
            let total: usize = c.iter().sum();
            if total != n || c.is_empty() || (n > 0 && c.contains(&0)) {
                return Err(GapFillError::Dimension(format!(
                    "chunks {c:?} do not tile axis {axis} of length {n}"
                )));
            }
        }
        Ok(Self { chunks })
    }

    /// Automatic layout whose blocks hold at most `limit_bytes` each.
    ///
    /// The largest extent is halved until a block fits, then every axis is
    /// split into near-equal chunks.
    pub fn auto(shape: &[usize], item_bytes: usize, limit_bytes: usize) -> Self {
        let item_bytes = item_bytes.max(1);
        let mut extents: Vec<usize> = shape.iter().map(|&n| n.max(1)).collect();
        let block_bytes = |e: &[usize]| e.iter().product::<usize>().saturating_mul(item_bytes);

        while block_bytes(&extents) > limit_bytes {
            let (axis, &largest) = match extents.iter().enumerate().max_by_key(|&(_, e)| *e) {
                Some(found) => found,
                None => break,
            };
            if largest <= 1 {
                break;
            }
            extents[axis] = largest.div_ceil(2);
        }

        let chunks = shape
            .iter()
            .zip(&extents)
            .map(|(&n, &e)| split_balanced(n, e))
            .collect();
        Self { chunks }
    }

    pub fn ndim(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    /// Axis lengths implied by the chunk extents.
    pub fn shape(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.iter().sum()).collect()
    }

    pub fn n_blocks(&self) -> usize {
        self.chunks.iter().map(Vec::len).product()
    }

    /// Largest block, in elements.
    pub fn max_block_len(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.iter().copied().max().unwrap_or(0))
            .product()
    }

    /// Index ranges of the chunks along `axis`.
    pub fn ranges(&self, axis: usize) -> Vec<Range<usize>> {
        let mut start = 0;
        self.chunks[axis]
            .iter()
            .map(|&len| {
                let r = start..start + len;
                start += len;
                r
            })
            .collect()
    }

    /// Reorder axes: new axis `i` is old axis `order[i]`.
    pub fn permuted(&self, order: &[usize]) -> Self {
        Self {
            chunks: order.iter().map(|&i| self.chunks[i].clone()).collect(),
        }
    }

    /// Cartesian product of chunk ranges over the given axes.
    pub fn blocks(&self, axes: &[usize]) -> Vec<Vec<Range<usize>>> {
        let mut blocks: Vec<Vec<Range<usize>>> = vec![Vec::new()];
        for &axis in axes {
            let ranges = self.ranges(axis);
            blocks = blocks
                .into_iter()
                .flat_map(|prefix| {
                    ranges.iter().map(move |r| {
                        let mut b = prefix.clone();
                        b.push(r.clone());
                        b
                    })
                })
                .collect();
        }
        blocks
    }
}

fn split_regular(n: usize, extent: usize) -> Vec<usize> {
    if n == 0 {
        return vec![0];
    }
    let mut out = vec![extent; n / extent];
    if n % extent != 0 {
        out.push(n % extent);
    }
    out
}

fn split_balanced(n: usize, extent: usize) -> Vec<usize> {
    if n == 0 {
        return vec![0];
    }
    let count = n.div_ceil(extent.max(1));
    let base = n / count;
    let extra = n % count;
    (0..count).map(|i| if i < extra { base + 1 } else { base }).collect()
}
