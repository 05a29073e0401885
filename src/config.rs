//! Loader for the data locations file.
//!
//! The file maps an external model name to its data stores, and each store to
//! the protocol, locations and naming conventions used to fetch from it:
//!
//! ```yaml
//! HRRR:
//!   aws:
//!     protocol: download
//!     url: https://noaa-hrrr-bdp-pds.s3.amazonaws.com/hrrr.{yyyymmdd}/conus
//!     file_names:
//!       anl:
//!         - hrrr.t{hh}z.wrfprsf00.grib2
//!       fcst:
//!         - hrrr.t{hh}z.wrfprsf{fcst_hr:02d}.grib2
//! ```
//!
//! Values that may be a single string or a list are normalised to lists here,
//! and naming conventions nested by file type and/or `anl`/`fcst` are resolved
//! to a flat [`NameTemplates`] for one request.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::request::{AnlOrFcst, ExternalModel, FileType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Disk,
    Download,
    #[serde(alias = "archive")]
    Htar,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Tar,
    Zip,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// A naming convention as written in the file: a bare template, a list whose
/// entries may themselves be lists, or a map keyed by file type or by
/// `anl`/`fcst`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameSpec {
    Template(String),
    List(Vec<NameEntry>),
    Keyed(BTreeMap<String, NameSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameEntry {
    One(String),
    Group(Vec<String>),
}

impl NameSpec {
    /// Pick the variant for `file_type` (when the names are keyed by it) and
    /// then for `anl_or_fcst`.
    pub fn resolve(&self, file_type: Option<FileType>, anl_or_fcst: AnlOrFcst) -> Result<NameTemplates> {
        match self {
            NameSpec::Template(t) => Ok(NameTemplates {
                groups: vec![vec![t.clone()]],
                nested: false,
            }),
            NameSpec::List(entries) => {
                let mut nested = false;
                let groups = entries
                    .iter()
                    .map(|e| match e {
                        NameEntry::One(t) => vec![t.clone()],
                        NameEntry::Group(g) => {
                            nested = true;
                            g.clone()
                        }
                    })
                    .collect();
                Ok(NameTemplates { groups, nested })
            }
            NameSpec::Keyed(map) => {
                if let Some(inner) = file_type.and_then(|ft| map.get(ft.as_str())) {
                    return inner.resolve(None, anl_or_fcst);
                }
                if let Some(inner) = map.get(anl_or_fcst.as_str()) {
                    return inner.resolve(None, anl_or_fcst);
                }
                let wanted = match file_type {
                    Some(ft) => format!("{ft}/{anl_or_fcst}"),
                    None => anl_or_fcst.to_string(),
                };
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                Err(Error::Config(format!(
                    "no naming convention for {wanted}; available keys: {keys:?}"
                )))
            }
        }
    }
}

/// Ordered groups of templates. A bare template is a one-element group;
/// `nested` records whether the source listed explicit sub-lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTemplates {
    groups: Vec<Vec<String>>,
    nested: bool,
}

impl NameTemplates {
    /// Each template becomes its own group.
    pub fn from_templates<S: Into<String>>(templates: impl IntoIterator<Item = S>) -> Self {
        Self {
            groups: templates.into_iter().map(|t| vec![t.into()]).collect(),
            nested: false,
        }
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }

    pub fn flatten(&self) -> Vec<String> {
        self.groups.iter().flatten().cloned().collect()
    }
}

/// Static description of one data store for one external model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSpec {
    pub protocol: Protocol,
    #[serde(default)]
    url: Option<OneOrMany>,
    #[serde(default)]
    archive_path: Option<OneOrMany>,
    #[serde(default)]
    archive_file_names: Option<NameSpec>,
    #[serde(default)]
    archive_internal_dir: Option<NameSpec>,
    #[serde(default)]
    pub archive_format: ArchiveFormat,
    #[serde(default)]
    file_names: Option<NameSpec>,
    #[serde(default)]
    pub check_all: bool,
    /// How many of a candidate's archive names must exist before the
    /// candidate is accepted. Only the first name is checked by default.
    #[serde(default = "StoreSpec::default_probe_count")]
    pub probe_count: usize,
}

impl StoreSpec {
    fn default_probe_count() -> usize {
        1
    }

    pub fn urls(&self) -> Vec<String> {
        self.url.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
    }

    pub fn archive_paths(&self) -> Vec<String> {
        self.archive_path.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
    }

    pub fn file_names(&self, file_type: Option<FileType>, anl_or_fcst: AnlOrFcst) -> Result<NameTemplates> {
        let spec = self
            .file_names
            .as_ref()
            .ok_or_else(|| Error::Config("no file_names naming convention configured".into()))?;
        let names = spec.resolve(file_type, anl_or_fcst)?;
        if names.is_empty() {
            return Err(Error::Config("file_names resolved to an empty list".into()));
        }
        Ok(names)
    }

    pub fn has_file_names(&self) -> bool {
        self.file_names.is_some()
    }

    pub fn archive_file_names(&self, file_type: Option<FileType>, anl_or_fcst: AnlOrFcst) -> Result<NameTemplates> {
        let spec = self
            .archive_file_names
            .as_ref()
            .ok_or_else(|| Error::Config("no archive_file_names configured".into()))?;
        spec.resolve(file_type, anl_or_fcst)
    }

    /// Internal archive directories; a single empty entry when none are set.
    pub fn archive_internal_dirs(&self, file_type: Option<FileType>, anl_or_fcst: AnlOrFcst) -> Result<Vec<String>> {
        match &self.archive_internal_dir {
            None => Ok(vec![String::new()]),
            Some(spec) => {
                let dirs = spec.resolve(file_type, anl_or_fcst)?.flatten();
                if dirs.is_empty() {
                    Ok(vec![String::new()])
                } else {
                    Ok(dirs)
                }
            }
        }
    }
}

/// All stores known for one external model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub check_all: bool,
    #[serde(flatten)]
    pub stores: BTreeMap<String, StoreSpec>,
}

impl ModelSpec {
    pub fn store(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.get(name)
    }
}

/// The whole data locations file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct DataLocations {
    models: BTreeMap<String, ModelSpec>,
}

impl DataLocations {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read data locations file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(text)?;
        value.apply_merge()?;
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn model(&self, model: ExternalModel) -> Option<&ModelSpec> {
        self.models.get(model.as_str())
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
FV3GFS:
  hpss:
    protocol: htar
    archive_path:
      - /NCEPPROD/hpssprod/runhistory/rh{yyyy}/{yyyymm}/{yyyymmdd}
      - /NCEPPROD/hpssprod/runhistory/rh{yyyy}/{yyyymm}/{yyyymmdd}
    archive_internal_dir:
      - ./gfs.{yyyymmdd}/{hh}
      - ./gfs.{yyyymmdd}/{hh}/atmos
    archive_file_names:
      grib2:
        anl:
          - gpfs_dell1_nco_ops_com_gfs_prod_gfs.{yyyymmdd}_{hh}.gfs_pgrb2.tar
          - com_gfs_prod_gfs.{yyyymmdd}_{hh}.gfs_pgrb2.tar
      nemsio:
        fcst:
          - ["a_{yyyymmdd}_nemsioa.tar", "a_{yyyymmdd}_nemsiob.tar"]
          - ["b_{yyyymmdd}_nemsioa.tar", "b_{yyyymmdd}_nemsiob.tar"]
    file_names:
      grib2:
        anl:
          - gfs.t{hh}z.pgrb2.0p25.f000
        fcst:
          - gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}
  aws:
    protocol: download
    url: https://noaa-gfs-bdp-pds.s3.amazonaws.com/gfs.{yyyymmdd}/{hh}/atmos
    file_names:
      anl: gfs.t{hh}z.pgrb2.0p25.f000
      fcst: gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}
HRRR:
  check_all: true
  hpss:
    protocol: htar
    archive_format: zip
    probe_count: 2
    archive_path: /hpss/{yyyymmdd}
    archive_file_names: hrrr.{yyyymmdd}_conus{bin6}.wrf.zip
    file_names: "{yy}{jjj}{hh}00{fcst_hr:02d}00"
"#;

    #[test]
    fn loads_models_and_stores() {
        let locs = DataLocations::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(locs.model_names().collect::<Vec<_>>(), vec!["FV3GFS", "HRRR"]);

        let gfs = locs.model(ExternalModel::Fv3gfs).unwrap();
        assert!(!gfs.check_all);
        assert_eq!(gfs.store("hpss").unwrap().protocol, Protocol::Htar);
        assert_eq!(gfs.store("aws").unwrap().protocol, Protocol::Download);
        assert!(gfs.store("nomads").is_none());

        let hrrr = locs.model(ExternalModel::Hrrr).unwrap();
        assert!(hrrr.check_all);
        let hpss = hrrr.store("hpss").unwrap();
        assert_eq!(hpss.archive_format, ArchiveFormat::Zip);
        assert_eq!(hpss.probe_count, 2);
        assert_eq!(gfs.store("hpss").unwrap().probe_count, 1);
        assert_eq!(hpss.archive_paths(), vec!["/hpss/{yyyymmdd}"]);
        assert!(locs.model(ExternalModel::Nam).is_none());
    }

    #[test]
    fn resolves_nested_names() {
        let locs = DataLocations::from_yaml_str(SAMPLE).unwrap();
        let hpss = locs.model(ExternalModel::Fv3gfs).unwrap().store("hpss").unwrap();

        let names = hpss.file_names(Some(FileType::Grib2), AnlOrFcst::Fcst).unwrap();
        assert_eq!(names.flatten(), vec!["gfs.t{hh}z.pgrb2.0p25.f{fcst_hr:03d}"]);
        assert!(!names.is_nested());

        let archives = hpss.archive_file_names(Some(FileType::Nemsio), AnlOrFcst::Fcst).unwrap();
        assert!(archives.is_nested());
        assert_eq!(archives.len(), 2);
        assert_eq!(archives.groups()[1], vec!["b_{yyyymmdd}_nemsioa.tar", "b_{yyyymmdd}_nemsiob.tar"]);

        assert!(matches!(
            hpss.archive_file_names(Some(FileType::Netcdf), AnlOrFcst::Anl),
            Err(Error::Config(_))
        ));

        let dirs = hpss.archive_internal_dirs(None, AnlOrFcst::Anl).unwrap();
        assert_eq!(dirs.len(), 2);
    }

    #[test]
    fn file_type_is_skipped_when_names_are_keyed_by_anl_or_fcst() {
        let locs = DataLocations::from_yaml_str(SAMPLE).unwrap();
        let aws = locs.model(ExternalModel::Fv3gfs).unwrap().store("aws").unwrap();
        let names = aws.file_names(Some(FileType::Grib2), AnlOrFcst::Anl).unwrap();
        assert_eq!(names.flatten(), vec!["gfs.t{hh}z.pgrb2.0p25.f000"]);
        assert_eq!(aws.archive_internal_dirs(None, AnlOrFcst::Anl).unwrap(), vec![""]);
    }

    #[test]
    fn merge_keys_are_applied() {
        let text = r#"
RAP:
  hpss: &rap
    protocol: htar
    archive_path: /a
    archive_file_names: a.tar
    file_names: rap.t{hh}z
  aws:
    <<: *rap
    protocol: download
    url: https://example.com/rap
"#;
        let locs = DataLocations::from_yaml_str(text).unwrap();
        let aws = locs.model(ExternalModel::Rap).unwrap().store("aws").unwrap();
        assert_eq!(aws.protocol, Protocol::Download);
        assert_eq!(aws.urls(), vec!["https://example.com/rap"]);
        assert!(aws.has_file_names());
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let text = "GDAS:\n  ftp:\n    protocol: ftp\n";
        assert!(DataLocations::from_yaml_str(text).is_err());
    }
}
