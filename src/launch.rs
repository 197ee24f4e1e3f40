use rayon::prelude::*;
use serde::Serialize;

/// Threads per block of every element-wise launch
pub const BLOCK_SIZE: usize = 256;

/// Grid and block sizes of a one-dimensional launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchConfig {
    pub grid_dim: usize,
    pub block_dim: usize,
}

impl LaunchConfig {
    /// Cover `total` elements with blocks of `BLOCK_SIZE` threads
    pub fn for_num_elems(total: usize) -> Self {
        Self::with_block(total, BLOCK_SIZE)
    }

    /// Cover `total` elements with blocks of `block_dim` threads, rounding the grid up
    pub fn with_block(total: usize, block_dim: usize) -> Self {
        assert!(block_dim > 0, "block_dim must be positive");
        LaunchConfig {
            grid_dim: (total + block_dim - 1) / block_dim,
            block_dim,
        }
    }

    /// Number of logical threads, including the idle lanes of the tail block
    pub fn num_threads(&self) -> usize {
        self.grid_dim * self.block_dim
    }

    /// Lanes of the last block which pass the `idx < total` guard
    pub fn tail_lanes(&self, total: usize) -> usize {
        match total % self.block_dim {
            0 if total > 0 => self.block_dim,
            rem => rem,
        }
    }
}

/// Position of one logical thread in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCtx {
    pub block_idx: usize,
    pub block_dim: usize,
    pub thread_idx: usize,
}

impl ThreadCtx {
    pub fn global_index(&self) -> usize {
        self.block_idx * self.block_dim + self.thread_idx
    }
}

/// Run `kernel` once for every thread of the grid
///
/// Block `k` receives the chunk of `out` starting at `k * block_dim`, so blocks
/// never share output cells. Threads of the tail block whose global index is
/// past `out.len()` still run and must guard themselves.
pub fn run_grid<K>(cfg: LaunchConfig, out: &mut [f32], kernel: K)
where
    K: Fn(ThreadCtx, &mut [f32]) + Sync,
{
    debug_assert_eq!(
        (out.len() + cfg.block_dim - 1) / cfg.block_dim,
        cfg.grid_dim,
        "output does not match the grid"
    );
    let block_dim = cfg.block_dim;
    out.par_chunks_mut(block_dim)
        .enumerate()
        .for_each(|(block_idx, block)| {
            for thread_idx in 0..block_dim {
                let ctx = ThreadCtx {
                    block_idx,
                    block_dim,
                    thread_idx,
                };
                kernel(ctx, block);
            }
        });
}
