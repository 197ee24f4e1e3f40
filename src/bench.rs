//! Warm-up, timing and correctness check of an `add2` implementation
//!
//! Every timed batch ends with a device-wide barrier before the clock is
//! read, otherwise only the enqueue cost would be measured.

use colored::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::compare::{allclose, Comparison};
use crate::config::BenchConfig;
use crate::device::{Device, DeviceBuffer};
use crate::error::*;
use crate::launch::LaunchConfig;

/// Wall-clock cost of a batch of invocations
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timing {
    pub iterations: usize,
    pub total_us: f64,
    pub per_call_us: f64,
}

impl Timing {
    pub fn new(iterations: usize, elapsed: Duration) -> Self {
        let total_us = elapsed.as_secs_f64() * 1e6;
        Timing {
            iterations,
            total_us,
            per_call_us: total_us / iterations as f64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub name: String,
    pub n: usize,
    pub device: usize,
    pub execution_units: usize,
    pub launch: LaunchConfig,
    pub custom: Timing,
    pub check: Comparison,
    pub reference: Timing,
}

impl BenchReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).log(Step::Report, "Cannot serialize report")
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Testing method: {}", self.name)?;
        writeln!(
            f,
            "Array: {n}x{n} on device {} ({} units, grid {} x block {})",
            self.device,
            self.execution_units,
            self.launch.grid_dim,
            self.launch.block_dim,
            n = self.n
        )?;
        writeln!(
            f,
            "Kernel time (avg of {} runs): {:.3} us",
            self.custom.iterations, self.custom.per_call_us
        )?;
        if self.check.passed {
            writeln!(f, "Kernel test {}.", "passed".green())?;
        } else {
            writeln!(f, "Kernel test {}!", "FAILED".red().bold())?;
            writeln!(
                f,
                "Max error: {} ({} elements off)",
                self.check.max_abs_diff, self.check.mismatches
            )?;
        }
        writeln!(
            f,
            "Reference time (avg of {} runs): {:.3} us",
            self.reference.iterations, self.reference.per_call_us
        )?;
        write!(f, "{}", "-".repeat(30))
    }
}

/// Allocate `len` elements uniformly drawn from `[0, 1)`
pub fn random_buffer<R: Rng>(device: &Device, len: usize, rng: &mut R) -> Result<DeviceBuffer> {
    let buf = device.alloc_zeros(len)?;
    buf.write().iter_mut().for_each(|x| *x = rng.gen());
    Ok(buf)
}

/// Benchmark `custom_op` against the native addition of `device`
///
/// `custom_op(c, a, b, n)` must enqueue `C = A + B` for `n×n` buffers. A
/// failed comparison is reported in the result, it does not stop the run;
/// device errors do.
pub fn run_benchmark<F>(
    device: &Device,
    config: &BenchConfig,
    name: &str,
    mut custom_op: F,
) -> Result<BenchReport>
where
    F: FnMut(&DeviceBuffer, &DeviceBuffer, &DeviceBuffer, usize) -> Result<()>,
{
    config.validate()?;
    let n = config.n;
    let total = config.num_elems();
    eprintln!("{:>12} {}", "Testing".bright_green(), name);

    eprintln!(
        "{:>12} A, B, C ({}x{}) on device {}",
        "Allocating".bright_green(),
        n,
        n,
        device.ordinal()
    );
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let a = random_buffer(device, total, &mut rng)?;
    let b = random_buffer(device, total, &mut rng)?;
    let c = device.alloc_empty(total)?;

    let custom = time_phase(device, config, "kernel", || custom_op(&c, &a, &b, n))?;
    info!("{}: {:.3} us per call", name, custom.per_call_us);

    eprintln!("{:>12} against reference", "Checking".bright_green());
    let actual = device.dtoh(&c)?;
    let expected = device.dtoh(&device.add(&a, &b)?)?;
    let check = allclose(&actual, &expected, config.atol, config.rtol);
    if check.passed {
        info!("{}: result matches reference", name);
    } else {
        warn!(
            "{}: {} elements differ from reference, max error {}",
            name, check.mismatches, check.max_abs_diff
        );
    }

    let reference = time_phase(device, config, "reference", || {
        device.add(&a, &b).map(|_| ())
    })?;
    info!("reference: {:.3} us per call", reference.per_call_us);

    Ok(BenchReport {
        name: name.to_owned(),
        n,
        device: device.ordinal(),
        execution_units: device.num_units(),
        launch: LaunchConfig::for_num_elems(total),
        custom,
        check,
        reference,
    })
}

/// Untimed warm-up, then a timed batch closed by a barrier
fn time_phase<F>(device: &Device, config: &BenchConfig, label: &str, mut op: F) -> Result<Timing>
where
    F: FnMut() -> Result<()>,
{
    eprintln!(
        "{:>12} {} ({} runs)",
        "Warming".bright_green(),
        label,
        config.warmup
    );
    for _ in 0..config.warmup {
        op()?;
    }
    device.synchronize()?;

    eprintln!(
        "{:>12} {} ({} runs)",
        "Timing".bright_green(),
        label,
        config.iterations
    );
    let start = Instant::now();
    for _ in 0..config.iterations {
        op()?;
    }
    device.synchronize()?;
    Ok(Timing::new(config.iterations, start.elapsed()))
}
