use add2::error::{Logging, Step};
use add2::{launch_add2, run_benchmark, BenchConfig, Device, Overrides};

use std::env;
use std::path::*;
use structopt::StructOpt;

/// Benchmark the add2 kernel against the native element-wise addition
#[derive(StructOpt, Debug)]
#[structopt(
    name = "add2-bench",
    setting = structopt::clap::AppSettings::ColoredHelp
)]
struct Opt {
    /// Config file (default: add2.toml searched upwards from the current directory)
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Side length of the square arrays
    #[structopt(short = "n", long = "size")]
    size: Option<usize>,
    /// Untimed invocations before each timed batch
    #[structopt(long = "warmup")]
    warmup: Option<usize>,
    /// Timed invocations
    #[structopt(long = "iters")]
    iterations: Option<usize>,
    /// Absolute tolerance of the correctness check
    #[structopt(long = "atol")]
    atol: Option<f32>,
    /// Relative tolerance of the correctness check
    #[structopt(long = "rtol")]
    rtol: Option<f32>,
    /// Seed of the input data
    #[structopt(long = "seed")]
    seed: Option<u64>,
    /// Execution units of the device
    #[structopt(long = "threads")]
    threads: Option<usize>,
    /// Device ordinal
    #[structopt(long = "device")]
    device: Option<usize>,
    /// Print the report as JSON
    #[structopt(long = "json")]
    json: bool,
    /// Verbose logging, repeat for more
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

impl Opt {
    fn overrides(&self) -> Overrides {
        Overrides {
            n: self.size,
            warmup: self.warmup,
            iterations: self.iterations,
            atol: self.atol,
            rtol: self.rtol,
            seed: self.seed,
            threads: self.threads,
            device: self.device,
        }
    }
}

// Library records go through the `log` facade, the subscriber picks them up
fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("add2={}", level))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> add2::error::Result<()> {
    let opt = Opt::from_args();
    init_logger(opt.verbose);

    let mut config = match &opt.config {
        Some(path) => BenchConfig::load(path)?,
        None => {
            let cwd = env::current_dir().log(Step::Config, "Cannot get current directory")?;
            BenchConfig::discover(&cwd)?
        }
    };
    config.override_with(&opt.overrides());
    config.validate()?;

    let device = Device::with_threads(config.device, config.threads)?;
    let report = run_benchmark(&device, &config, "add2 kernel", |c, a, b, n| {
        launch_add2(&device, c, a, b, n)
    })?;

    if opt.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
