use dirs::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::*;
use toml;

use crate::error::*;

pub const CONFIG_FILE_NAME: &str = "add2.toml";

/// Benchmark settings, read from the `[bench]` table of `add2.toml`
///
/// ```text
/// [bench]
/// n = 2048
/// iterations = 500
/// seed = 42
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Side length of the square arrays
    pub n: usize,
    pub warmup: usize,
    pub iterations: usize,
    pub atol: f32,
    pub rtol: f32,
    /// Fixed seed of the input data, fresh entropy when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Execution units of the device, one per CPU when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    pub device: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            n: 1024,
            warmup: 10,
            iterations: 100,
            atol: 1e-5,
            rtol: 0.0,
            seed: None,
            threads: None,
            device: 0,
        }
    }
}

/// Values set on the command line; `None` keeps the configured value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub n: Option<usize>,
    pub warmup: Option<usize>,
    pub iterations: Option<usize>,
    pub atol: Option<f32>,
    pub rtol: Option<f32>,
    pub seed: Option<u64>,
    pub threads: Option<usize>,
    pub device: Option<usize>,
}

#[derive(Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    bench: BenchConfig,
}

impl BenchConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).log(Step::Config, "Invalid benchmark configuration")?;
        file.bench.validate()?;
        Ok(file.bench)
    }

    /// Read the configuration at `path`, a leading `~` is the home directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_home(path.as_ref())?;
        let contents = fs::read_to_string(&path).log(Step::Config, "Cannot read config file")?;
        info!("Load config from {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Search `add2.toml` upwards from `start`, then in the user config directory
    ///
    /// Falls back to the defaults when no file exists.
    pub fn discover(start: &Path) -> Result<Self> {
        let user = config_dir().map(|dir| dir.join("add2").join(CONFIG_FILE_NAME));
        match find_config(start).or_else(|| user.filter(|p| p.exists())) {
            Some(path) => Self::load(path),
            None => {
                debug!("No {} found, use defaults", CONFIG_FILE_NAME);
                Ok(Self::default())
            }
        }
    }

    /// Apply command-line values on top of the file values
    ///
    /// Does not validate, call `validate` on the result.
    pub fn override_with(&mut self, overrides: &Overrides) {
        let o = overrides;
        self.n = o.n.unwrap_or(self.n);
        self.warmup = o.warmup.unwrap_or(self.warmup);
        self.iterations = o.iterations.unwrap_or(self.iterations);
        self.atol = o.atol.unwrap_or(self.atol);
        self.rtol = o.rtol.unwrap_or(self.rtol);
        self.seed = o.seed.or(self.seed);
        self.threads = o.threads.or(self.threads);
        self.device = o.device.unwrap_or(self.device);
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(precondition(Step::Config, "n must be at least 1"));
        }
        if self.n.checked_mul(self.n).is_none() {
            return Err(precondition(Step::Config, format!("n = {} overflows", self.n)));
        }
        if self.iterations == 0 {
            return Err(precondition(Step::Config, "iterations must be at least 1"));
        }
        if !(self.atol >= 0.0) || !(self.rtol >= 0.0) {
            return Err(precondition(
                Step::Config,
                "tolerances must be non-negative numbers",
            ));
        }
        if self.threads == Some(0) {
            return Err(precondition(Step::Config, "threads must be at least 1"));
        }
        Ok(())
    }

    /// Element count of one array
    pub fn num_elems(&self) -> usize {
        self.n * self.n
    }

    pub fn as_toml(&self) -> Result<String> {
        let file = ConfigFile {
            bench: self.clone(),
        };
        toml::to_string(&file).log(Step::Config, "Cannot serialize config")
    }
}

/// Walk up from `start` to the first directory holding `add2.toml`
pub fn find_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|path| path.is_file())
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    if !path.starts_with("~") {
        return Ok(path.to_owned());
    }
    let home = home_dir().ok_or_else(|| err_msg(Step::Config, "Home directory not found"))?;
    let rest = path
        .strip_prefix("~")
        .log(Step::Config, "Invalid config path")?;
    Ok(home.join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempdir::TempDir;

    #[test]
    fn defaults() {
        let cfg = BenchConfig::default();
        assert_eq!(cfg.n, 1024);
        assert_eq!(cfg.warmup, 10);
        assert_eq!(cfg.iterations, 100);
        assert_eq!(cfg.atol, 1e-5);
        assert_eq!(cfg.num_elems(), 1024 * 1024);
    }

    #[test]
    fn partial_table() {
        let cfg = BenchConfig::from_toml_str("[bench]\nn = 33\nseed = 7\n").unwrap();
        assert_eq!(cfg.n, 33);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.iterations, 100);
    }

    #[test]
    fn empty_file() {
        assert_eq!(
            BenchConfig::from_toml_str("").unwrap(),
            BenchConfig::default()
        );
    }

    #[test]
    fn unknown_key() {
        assert!(BenchConfig::from_toml_str("[bench]\nblock = 128\n").is_err());
    }

    #[test]
    fn invalid_values() {
        assert!(BenchConfig::from_toml_str("[bench]\nn = 0\n").is_err());
        assert!(BenchConfig::from_toml_str("[bench]\niterations = 0\n").is_err());
        assert!(BenchConfig::from_toml_str("[bench]\natol = -1.0\n").is_err());
        assert!(BenchConfig::from_toml_str("[bench]\nthreads = 0\n").is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = BenchConfig::default();
        cfg.n = 64;
        cfg.seed = Some(3);
        let text = cfg.as_toml().unwrap();
        assert!(text.starts_with("[bench]"));
        assert_eq!(BenchConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn flags_replace_file_values() {
        let mut cfg = BenchConfig::from_toml_str("[bench]\nn = 64\nwarmup = 2\nseed = 5\n").unwrap();
        cfg.override_with(&Overrides {
            n: Some(128),
            iterations: Some(7),
            threads: Some(3),
            ..Overrides::default()
        });
        assert_eq!(cfg.n, 128);
        assert_eq!(cfg.iterations, 7);
        assert_eq!(cfg.threads, Some(3));
        // unset flags keep what the file says
        assert_eq!(cfg.warmup, 2);
        assert_eq!(cfg.seed, Some(5));
        assert_eq!(cfg.atol, 1e-5);
        assert_eq!(cfg.device, 0);
    }

    #[test]
    fn no_flags_keep_config() {
        let mut cfg = BenchConfig::default();
        cfg.seed = Some(11);
        let before = cfg.clone();
        cfg.override_with(&Overrides::default());
        assert_eq!(cfg, before);
    }

    #[test]
    fn overridden_values_are_validated() {
        let mut cfg = BenchConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.override_with(&Overrides {
            n: Some(0),
            ..Overrides::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn find_in_parent() {
        let dir = TempDir::new("add2-config").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        let mut f = fs::File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        f.write_all(b"[bench]\nn = 16\n").unwrap();

        assert_eq!(
            find_config(&nested),
            Some(dir.path().join(CONFIG_FILE_NAME))
        );
        assert_eq!(BenchConfig::discover(&nested).unwrap().n, 16);
    }

    #[test]
    fn load_missing() {
        let dir = TempDir::new("add2-config").unwrap();
        assert!(BenchConfig::load(dir.path().join(CONFIG_FILE_NAME)).is_err());
    }
}
