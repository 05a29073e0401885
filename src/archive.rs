//! Retrieval from dated tape archives.
//!
//! A store lists several candidate archives for a cycle (paths and names that
//! changed over the years). The first candidate that exists on HPSS is used:
//! the requested members are extracted into the output directory, moved out of
//! the directory structure they had inside the archive, and any directories
//! left behind by the extraction are removed. A tool that fails after
//! extracting some members only makes the others unavailable; a tool that
//! extracts nothing is a transport error.

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::config::{ArchiveFormat, NameTemplates, StoreSpec};
use crate::error::{Error, Result};
use crate::request::{AnlOrFcst, FileType};
use crate::retriever::StoreOutcome;
use crate::sources::join_location;
use crate::template::fill;
use crate::transport::{ProbeMode, Transport, is_nonempty_file};

/// Key under which missing archives are recorded.
pub const ARCHIVE_KEY: &str = "archive";
/// Key under which files missing after extraction are recorded.
pub const EXTRACTED_KEY: &str = "hpss";

/// One possible archive location for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCandidate {
    pub path: String,
    /// Archive file names; the first is the existence witness.
    pub names: Vec<String>,
    pub internal_dir: String,
    /// Templates of the files wanted from inside the archive.
    pub file_names: Vec<String>,
}

impl ArchiveCandidate {
    fn archive(&self, i: usize) -> Option<String> {
        self.names.get(i).map(|n| join_location(&self.path, n))
    }
}

/// Build the candidate list for one request from a store spec.
///
/// Archive paths and archive names pair positionally unless the store sets
/// `check_all`, in which case every path is tried with every name. Internal
/// directories and per-archive file name groups follow the archive name index.
pub fn candidates(
    spec: &StoreSpec,
    file_type: Option<FileType>,
    anl_or_fcst: AnlOrFcst,
    file_names: &NameTemplates,
) -> Result<Vec<ArchiveCandidate>> {
    let paths = spec.archive_paths();
    let names = spec.archive_file_names(file_type, anl_or_fcst)?;
    let dirs = spec.archive_internal_dirs(file_type, anl_or_fcst)?;

    if paths.is_empty() || names.is_empty() {
        return Err(Error::Config("archive_path and archive_file_names must both be set".into()));
    }

    let pairs: Vec<(&String, usize)> = if paths.len() == names.len() {
        paths.iter().zip(0..).collect()
    } else if spec.check_all {
        paths
            .iter()
            .flat_map(|p| (0..names.len()).map(move |j| (p, j)))
            .collect()
    } else {
        return Err(Error::Config(format!(
            "{} archive paths cannot be paired with {} archive file names",
            paths.len(),
            names.len()
        )));
    };

    let internal_dir = |j: usize| -> Result<String> {
        match dirs.len() {
            1 => Ok(dirs[0].clone()),
            n if n == names.len() => Ok(dirs[j].clone()),
            n => Err(Error::Config(format!(
                "{n} archive_internal_dir entries do not match {} archive file names",
                names.len()
            ))),
        }
    };

    let per_archive_names = file_names.is_nested() && file_names.len() == names.len();
    pairs
        .into_iter()
        .map(|(path, j)| {
            Ok(ArchiveCandidate {
                path: path.clone(),
                names: names.groups()[j].clone(),
                internal_dir: internal_dir(j)?,
                file_names: if per_archive_names {
                    file_names.groups()[j].clone()
                } else {
                    file_names.flatten()
                },
            })
        })
        .collect()
}

/// What one resolver pass works on.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveJob<'a> {
    pub cycle_date: &'a NaiveDateTime,
    pub fcst_hrs: &'a [u32],
    /// `None` is the deterministic run.
    pub members: &'a [Option<u32>],
    pub ens_group: Option<u32>,
    /// Output directory template, filled per member.
    pub output_path: &'a str,
}

pub struct ArchiveResolver<'a> {
    transport: &'a dyn Transport,
    format: ArchiveFormat,
    probe_count: usize,
}

impl<'a> ArchiveResolver<'a> {
    pub fn new(transport: &'a dyn Transport, spec: &StoreSpec) -> Self {
        Self {
            transport,
            format: spec.archive_format,
            probe_count: spec.probe_count.max(1),
        }
    }

    /// Return the index of the first candidate whose witness archives exist,
    /// with the rendered path of the archive to extract from.
    pub fn find_archive(
        &self,
        candidates: &[ArchiveCandidate],
        cycle_date: &NaiveDateTime,
        ens_group: Option<u32>,
        work_dir: &Path,
    ) -> Result<Option<(usize, String)>> {
        'candidates: for (i, candidate) in candidates.iter().enumerate() {
            let witnesses = candidate.names.len().min(self.probe_count);
            let mut first = None;
            for w in 0..witnesses {
                let Some(template) = candidate.archive(w) else {
                    continue 'candidates;
                };
                let path = fill(&template, cycle_date, 0, None, ens_group)?;
                if !self.transport.probe_archive(&path, ProbeMode::List, work_dir)? {
                    continue 'candidates;
                }
                first.get_or_insert(path);
            }
            if let Some(path) = first {
                info!("Found HPSS file: {path}");
                return Ok(Some((i, path)));
            }
        }
        Ok(None)
    }

    pub fn retrieve(&self, candidates: &[ArchiveCandidate], job: &ArchiveJob<'_>) -> Result<StoreOutcome> {
        let mut outcome = StoreOutcome::default();

        let first_dir = output_dir(job, job.members.first().copied().flatten())?;
        fs::create_dir_all(&first_dir)?;

        debug!(
            "Will try to look for: {:?}",
            candidates.iter().map(|c| (&c.path, &c.names)).collect::<Vec<_>>()
        );
        let Some((which, archive)) = self.find_archive(candidates, job.cycle_date, job.ens_group, &first_dir)? else {
            warn!("No archive files were found!");
            let tried = candidates.iter().filter_map(|c| c.archive(0));
            outcome.unavailable.extend(ARCHIVE_KEY, tried);
            return Ok(outcome);
        };
        debug!("Using archive candidate {which}");
        let candidate = &candidates[which];
        info!("Files in archive are named: {:?}", candidate.file_names);

        for &mem in job.members {
            let out_dir = output_dir(job, mem)?;
            fs::create_dir_all(&out_dir)?;
            info!("Will place files in {}", out_dir.display());

            let internal_dir = fill(&candidate.internal_dir, job.cycle_date, 0, mem, job.ens_group)?;
            let mut sources = Vec::new();
            for name in &candidate.file_names {
                let path = join_location(&internal_dir, name);
                for &fcst_hr in job.fcst_hrs {
                    sources.push(fill(&path, job.cycle_date, fcst_hr, mem, job.ens_group)?);
                }
            }

            let (extracted, staged) = match self.format {
                ArchiveFormat::Zip => {
                    if !self.transport.probe_archive(&archive, ProbeMode::Get, &out_dir)? {
                        outcome.unavailable.extend(EXTRACTED_KEY, sources.iter().cloned());
                        continue;
                    }
                    let local = out_dir.join(file_name(&archive));
                    (self.transport.unzip(&local, &sources, &out_dir), Some(local))
                }
                ArchiveFormat::Tar => (self.transport.extract_tar(&archive, &sources, &out_dir), None),
            };

            // Reconcile even when extraction failed part way.
            let (found, missing) = reconcile(&out_dir, &sources)?;
            clean_up(&out_dir, &sources, staged.as_deref())?;

            if let Err(e) = extracted {
                if found.is_empty() {
                    return Err(e);
                }
                warn!("Extraction from {archive} was incomplete: {e}");
            }

            outcome.unavailable.extend(EXTRACTED_KEY, missing);
            outcome.record_staged(&out_dir, found);
        }

        Ok(outcome)
    }
}

fn output_dir(job: &ArchiveJob<'_>, mem: Option<u32>) -> Result<PathBuf> {
    Ok(PathBuf::from(fill(job.output_path, job.cycle_date, 0, mem, None)?))
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Path of an archive member under `out_dir`, ignoring `.` and leading `/`.
fn local_path(out_dir: &Path, source: &str) -> PathBuf {
    let mut p = out_dir.to_path_buf();
    for c in Path::new(source).components() {
        if let Component::Normal(part) = c {
            p.push(part);
        }
    }
    p
}

/// Move extracted files to the top of `out_dir`. Returns the file names now
/// present and the sources that are still missing.
fn reconcile(out_dir: &Path, sources: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for source in sources {
        let extracted = local_path(out_dir, source);
        let name = file_name(source);
        let expected = out_dir.join(&name);

        if !is_nonempty_file(&extracted) {
            info!("File does not exist: {}", extracted.display());
            missing.push(source.clone());
            continue;
        }
        if extracted != expected {
            info!("Moving {} to {}", extracted.display(), expected.display());
            fs::rename(&extracted, &expected)?;
        }
        found.push(name);
    }
    Ok((found, missing))
}

/// Remove directories the extraction created, if empty, and the staged
/// archive. Never removes `out_dir` itself.
fn clean_up(out_dir: &Path, sources: &[String], staged: Option<&Path>) -> Result<()> {
    for source in sources {
        let mut dir = local_path(out_dir, source);
        while dir.pop() && dir != out_dir && dir.starts_with(out_dir) {
            if !dir.is_dir() {
                continue;
            }
            if fs::remove_dir(&dir).is_err() {
                break;
            }
            info!("Removed {}", dir.display());
        }
    }

    if let Some(local) = staged {
        if local.exists() {
            info!("Removing staged archive {}", local.display());
            fs::remove_file(local)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataLocations;
    use crate::request::ExternalModel;

    const SPEC: &str = r#"
FV3GFS:
  hpss:
    protocol: htar
    archive_path:
      - /NCEPPROD/rh{yyyy}/{yyyymmdd}
      - /NCEPPROD/rh{yyyy}/{yyyymmdd}
    archive_internal_dir:
      - ./gfs.{yyyymmdd}/{hh}
      - ./gfs.{yyyymmdd}/{hh}/atmos
    archive_file_names:
      - old_gfs.{yyyymmdd}_{hh}.pgrb2.tar
      - ["gfs.{yyyymmdd}_{hh}.pgrb2.tar", "gfs.{yyyymmdd}_{hh}.pgrb2b.tar"]
    file_names:
      - gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}
"#;

    fn spec() -> StoreSpec {
        DataLocations::from_yaml_str(SPEC)
            .unwrap()
            .model(ExternalModel::Fv3gfs)
            .unwrap()
            .store("hpss")
            .unwrap()
            .clone()
    }

    #[test]
    fn candidates_follow_archive_name_index() {
        let spec = spec();
        let names = spec.file_names(None, AnlOrFcst::Fcst).unwrap();
        let cands = candidates(&spec, None, AnlOrFcst::Fcst, &names).unwrap();
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].internal_dir, "./gfs.{yyyymmdd}/{hh}");
        assert_eq!(cands[1].internal_dir, "./gfs.{yyyymmdd}/{hh}/atmos");
        assert_eq!(cands[1].names.len(), 2);
        assert_eq!(
            cands[1].archive(0).unwrap(),
            "/NCEPPROD/rh{yyyy}/{yyyymmdd}/gfs.{yyyymmdd}_{hh}.pgrb2.tar"
        );
        assert_eq!(cands[0].file_names, vec!["gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}"]);
    }

    #[test]
    fn unequal_paths_and_names_need_check_all() {
        let text = "GDAS:\n  hpss:\n    protocol: htar\n    archive_path: /a\n    archive_file_names: [x.tar, y.tar]\n    file_names: f\n";
        let locs = DataLocations::from_yaml_str(text).unwrap();
        let spec = locs.model(ExternalModel::Gdas).unwrap().store("hpss").unwrap();
        let names = spec.file_names(None, AnlOrFcst::Anl).unwrap();
        assert!(matches!(
            candidates(spec, None, AnlOrFcst::Anl, &names),
            Err(Error::Config(_))
        ));

        let text = text.replace("protocol: htar", "protocol: htar\n    check_all: true");
        let locs = DataLocations::from_yaml_str(&text).unwrap();
        let spec = locs.model(ExternalModel::Gdas).unwrap().store("hpss").unwrap();
        assert_eq!(candidates(spec, None, AnlOrFcst::Anl, &names).unwrap().len(), 2);
    }

    #[test]
    fn local_paths_drop_dot_and_root() {
        let out = Path::new("/tmp/out");
        assert_eq!(local_path(out, "./gfs.20220625/12/f"), PathBuf::from("/tmp/out/gfs.20220625/12/f"));
        assert_eq!(local_path(out, "/abs/f"), PathBuf::from("/tmp/out/abs/f"));
        assert_eq!(local_path(out, "f"), PathBuf::from("/tmp/out/f"));
    }

    #[test]
    fn reconcile_flattens_and_cleans_extracted_tree() {
        let out = tempfile::tempdir().unwrap();
        let nested = out.path().join("gfs.20220625").join("12").join("atmos");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("gfs.t12z.pgrb2.0p25.f006"), b"GRIB").unwrap();

        let sources = vec![
            "./gfs.20220625/12/atmos/gfs.t12z.pgrb2.0p25.f006".to_string(),
            "./gfs.20220625/12/atmos/gfs.t12z.pgrb2.0p25.f009".to_string(),
        ];
        let (found, missing) = reconcile(out.path(), &sources).unwrap();
        assert_eq!(found, vec!["gfs.t12z.pgrb2.0p25.f006"]);
        assert_eq!(missing, vec![sources[1].clone()]);
        assert!(is_nonempty_file(&out.path().join("gfs.t12z.pgrb2.0p25.f006")));

        let staged = out.path().join("archive.zip");
        fs::write(&staged, b"PK").unwrap();
        clean_up(out.path(), &sources, Some(&staged)).unwrap();
        assert!(!out.path().join("gfs.20220625").exists());
        assert!(!staged.exists());
        assert!(out.path().is_dir());
    }

    #[test]
    fn clean_up_keeps_non_empty_directories() {
        let out = tempfile::tempdir().unwrap();
        let nested = out.path().join("sub");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("keep"), b"x").unwrap();
        clean_up(out.path(), &["sub/gone".to_string()], None).unwrap();
        assert!(nested.join("keep").exists());
    }
}
