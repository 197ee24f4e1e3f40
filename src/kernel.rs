//! The `add2` kernel and its host-side entry point

use crate::device::{Device, DeviceBuffer};
use crate::error::*;
use crate::launch::{run_grid, LaunchConfig, ThreadCtx};

/// Device body of `C = A + B`, executed once per grid thread
///
/// `out` is the chunk of `C` owned by the calling block. No validation
/// happens here.
#[inline]
pub fn add2_kernel(t: ThreadCtx, out: &mut [f32], a: &[f32], b: &[f32], total: usize) {
    let idx = t.global_index();
    if idx < total {
        out[t.thread_idx] = a[idx] + b[idx];
    }
}

/// Enqueue `C = A + B` over an `n×n` array on `device`
///
/// Returns once the launch is on the stream; call [Device::synchronize]
/// before reading `c`.
pub fn launch_add2(
    device: &Device,
    c: &DeviceBuffer,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    n: usize,
) -> Result<()> {
    let total = check_launch(device, c, a, b, n)?;
    let cfg = LaunchConfig::for_num_elems(total);
    trace!(
        "add2: n = {}, grid = {}, block = {}",
        n,
        cfg.grid_dim,
        cfg.block_dim
    );
    let (c, a, b) = (c.clone(), a.clone(), b.clone());
    device.submit(move |pool| {
        let (a, b, mut c) = (a.read(), b.read(), c.write());
        let (a, b, c) = (&a[..], &b[..], &mut c[..]);
        pool.install(|| run_grid(cfg, c, |t, out| add2_kernel(t, out, a, b, total)));
    })
}

/// Host-side preconditions of [launch_add2], returning the element count
fn check_launch(
    device: &Device,
    c: &DeviceBuffer,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    n: usize,
) -> Result<usize> {
    if n == 0 {
        return Err(precondition(Step::Launch, "n must be at least 1"));
    }
    let total = n
        .checked_mul(n)
        .ok_or_else(|| precondition(Step::Launch, format!("{}x{} elements overflow", n, n)))?;
    for (name, buf) in &[("A", a), ("B", b), ("C", c)] {
        device.check_owner(buf, Step::Launch, name)?;
        if buf.len() != total {
            return Err(precondition(
                Step::Launch,
                format!("length of {} is {}, expected {}", name, buf.len(), total),
            ));
        }
    }
    if c.same_storage(a) || c.same_storage(b) {
        return Err(precondition(Step::Launch, "C must not alias an input"));
    }
    Ok(total)
}
