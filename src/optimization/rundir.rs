use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::chains::{Chain, ChainSet};
use super::state::SolverStateSnapshot;
use crate::errors::{HarvestError, InversionError, InversionResult};

pub const PROBLEM_FILE: &str = "problem.json";
pub const CONFIG_FILE: &str = "config.json";
pub const SAMPLES_FILE: &str = "samples.jsonl";
pub const STATE_FILE: &str = "state.json";
pub const CHAINS_DIR: &str = "chains";
pub const HARVEST_DIR: &str = "harvest";
pub const ENSEMBLE_FILE: &str = "ensemble.json";

/// What to do with a run directory that already holds files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RundirPolicy {
    /// Refuse to touch it.
    #[default]
    Fail,
    /// Delete and start over.
    Force,
    /// Rename aside to `<rundir>.NNNN`, then start over.
    Preserve,
    /// Continue from the stored checkpoint.
    Resume,
}

/// Static description of the problem a rundir was produced for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub name: String,
    pub parameter_names: Vec<String>,
    pub bounds: Vec<(f64, f64)>,
    pub target_ids: Vec<String>,
    pub bootstrap_weights: Vec<Vec<f64>>,
}

/// One line of `samples.jsonl`. `misfits` is absent for failed evaluations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub index: u64,
    pub x: Vec<f64>,
    #[serde(default)]
    pub misfits: Option<Vec<[f64; 2]>>,
}

/// Number of regular files below `path`.
pub fn count_files(path: &Path) -> usize {
    WalkDir::new(path)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

fn is_populated(path: &Path) -> InversionResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    Ok(fs::read_dir(path)?.next().is_some())
}

fn preserve_target(path: &Path) -> PathBuf {
    let mut n = 1;
    loop {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(format!(".{:04}", n));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> InversionResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut w, value)?;
        w.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> InversionResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Working directory owned by one solver run.
#[derive(Clone, Debug)]
pub struct Rundir {
    path: PathBuf,
}

impl Rundir {
    /// Handle on an existing rundir, for reading.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Make `path` ready for a run under `policy`.
    ///
    /// Returns the rundir and whether a checkpoint is to be resumed. With
    /// [`RundirPolicy::Fail`] a populated directory is left untouched and
    /// reported as [`InversionError::ResumeConflict`].
    pub fn prepare(path: impl Into<PathBuf>, policy: RundirPolicy) -> InversionResult<(Self, bool)> {
        let path = path.into();

        if is_populated(&path)? {
            match policy {
                RundirPolicy::Fail => {
                    return Err(InversionError::ResumeConflict {
                        nfiles: count_files(&path),
                        path,
                    });
                }
                RundirPolicy::Force => {
                    warn!(rundir = %path.display(), "removing existing run directory");
                    fs::remove_dir_all(&path)?;
                }
                RundirPolicy::Preserve => {
                    let aside = preserve_target(&path);
                    info!(rundir = %path.display(), to = %aside.display(), "preserving existing run directory");
                    fs::rename(&path, &aside)?;
                }
                RundirPolicy::Resume => {
                    if !path.join(STATE_FILE).is_file() {
                        return Err(InversionError::ResumeConflict {
                            nfiles: count_files(&path),
                            path,
                        });
                    }
                    debug!(rundir = %path.display(), "resuming from checkpoint");
                    return Ok((Self { path }, true));
                }
            }
        }

        fs::create_dir_all(path.join(CHAINS_DIR))?;
        Ok((Self { path }, false))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chains_dir(&self) -> PathBuf {
        self.path.join(CHAINS_DIR)
    }

    pub fn ensemble_path(&self) -> PathBuf {
        self.path.join(HARVEST_DIR).join(ENSEMBLE_FILE)
    }

    pub fn write_problem(&self, info: &ProblemInfo) -> InversionResult<()> {
        write_json(&self.path.join(PROBLEM_FILE), info)
    }

    pub fn read_problem(&self) -> InversionResult<ProblemInfo> {
        read_json(&self.path.join(PROBLEM_FILE))
    }

    pub fn write_config<T: Serialize>(&self, config: &T) -> InversionResult<()> {
        write_json(&self.path.join(CONFIG_FILE), config)
    }

    pub fn read_config<T: DeserializeOwned>(&self) -> InversionResult<T> {
        read_json(&self.path.join(CONFIG_FILE))
    }

    pub fn append_samples(&self, records: &[SampleRecord]) -> InversionResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.join(SAMPLES_FILE))?;
        let mut w = BufWriter::new(file);
        for r in records {
            serde_json::to_writer(&mut w, r)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_chains(&self, chains: &ChainSet) -> InversionResult<()> {
        let dir = self.chains_dir();
        fs::create_dir_all(&dir)?;
        for chain in &chains.chains {
            write_json(&dir.join(format!("chain_{:03}.json", chain.ichain)), chain)?;
        }
        Ok(())
    }

    /// Load every `chains/chain_*.json`, ordered by chain number.
    pub fn read_chains(&self) -> InversionResult<ChainSet> {
        let dir = self.chains_dir();
        let pattern = format!(
            "{}/chain_*.json",
            glob::Pattern::escape(&dir.to_string_lossy())
        );

        let mut chains = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry.map_err(|e| e.into_error())?;
            let chain: Chain = read_json(&path)?;
            chains.push(chain);
        }

        if chains.is_empty() {
            return Err(HarvestError::MissingChains(dir).into());
        }
        chains.sort_by_key(|c| c.ichain);
        Ok(ChainSet { chains })
    }

    pub fn write_state(&self, snapshot: &SolverStateSnapshot) -> InversionResult<()> {
        write_json(&self.path.join(STATE_FILE), snapshot)
    }

    pub fn read_state(&self) -> InversionResult<Option<SolverStateSnapshot>> {
        let path = self.path.join(STATE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn write_ensemble<T: Serialize>(&self, ensemble: &T) -> InversionResult<()> {
        fs::create_dir_all(self.path.join(HARVEST_DIR))?;
        write_json(&self.ensemble_path(), ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn fail_policy_leaves_directory_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("keep.txt"), b"data").unwrap();

        let err = Rundir::prepare(&dir, RundirPolicy::Fail).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResumeConflict);
        assert_eq!(fs::read(dir.join("keep.txt")).unwrap(), b"data");
        assert_eq!(count_files(&dir), 1);
    }

    #[test]
    fn preserve_renames_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("old.txt"), b"x").unwrap();

        let (rd, resumed) = Rundir::prepare(&dir, RundirPolicy::Preserve).unwrap();
        assert!(!resumed);
        assert!(rd.chains_dir().is_dir());
        assert!(!dir.join("old.txt").exists());
        assert!(tmp.path().join("run.0001").join("old.txt").is_file());
    }

    #[test]
    fn force_clears_and_chains_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("old.txt"), b"x").unwrap();

        let (rd, _) = Rundir::prepare(&dir, RundirPolicy::Force).unwrap();
        assert!(!dir.join("old.txt").exists());

        let mut set = ChainSet::new(11, 2);
        set.offer(0, &[1.0], &[1.0; 12]);
        rd.write_chains(&set).unwrap();
        let back = rd.read_chains().unwrap();
        assert_eq!(back, set);
        assert_eq!(back.chains[11].ichain, 11);
    }

    #[test]
    fn resume_requires_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("junk"), b"x").unwrap();
        assert!(Rundir::prepare(&dir, RundirPolicy::Resume).is_err());
    }

    #[test]
    fn missing_chains_is_a_harvest_error() {
        let tmp = tempfile::tempdir().unwrap();
        let rd = Rundir::open(tmp.path());
        let err = rd.read_chains().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Harvest);
    }
}
