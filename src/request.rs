use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

/// Whether analysis or forecast files are wanted; selects the naming variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnlOrFcst {
    Anl,
    Fcst,
}

impl AnlOrFcst {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnlOrFcst::Anl => "anl",
            AnlOrFcst::Fcst => "fcst",
        }
    }
}

impl FromStr for AnlOrFcst {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anl" => Ok(AnlOrFcst::Anl),
            "fcst" => Ok(AnlOrFcst::Fcst),
            other => Err(Error::InvalidRequest(format!(
                "anl_or_fcst must be anl or fcst, got {other}"
            ))),
        }
    }
}

impl fmt::Display for AnlOrFcst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External model file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Grib2,
    Nemsio,
    Netcdf,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Grib2 => "grib2",
            FileType::Nemsio => "nemsio",
            FileType::Netcdf => "netcdf",
        }
    }
}

impl FromStr for FileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grib2" => Ok(FileType::Grib2),
            "nemsio" => Ok(FileType::Nemsio),
            "netcdf" => Ok(FileType::Netcdf),
            other => Err(Error::InvalidRequest(format!(
                "file_type must be one of grib2, nemsio, netcdf; got {other}"
            ))),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source model label. Names are case-sensitive and match the top-level keys
/// of the data locations file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalModel {
    Fv3gfs,
    Gdas,
    Gefs,
    Gsmgfs,
    Hrrr,
    Nam,
    Rap,
    RapX,
    HrrrX,
}

impl ExternalModel {
    pub const ALL: [ExternalModel; 9] = [
        ExternalModel::Fv3gfs,
        ExternalModel::Gdas,
        ExternalModel::Gefs,
        ExternalModel::Gsmgfs,
        ExternalModel::Hrrr,
        ExternalModel::Nam,
        ExternalModel::Rap,
        ExternalModel::RapX,
        ExternalModel::HrrrX,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalModel::Fv3gfs => "FV3GFS",
            ExternalModel::Gdas => "GDAS",
            ExternalModel::Gefs => "GEFS",
            ExternalModel::Gsmgfs => "GSMGFS",
            ExternalModel::Hrrr => "HRRR",
            ExternalModel::Nam => "NAM",
            ExternalModel::Rap => "RAP",
            ExternalModel::RapX => "RAPx",
            ExternalModel::HrrrX => "HRRRx",
        }
    }
}

impl FromStr for ExternalModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ExternalModel::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidRequest(format!("unknown external model: {s}")))
    }
}

impl fmt::Display for ExternalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand a compact integer list.
///
/// - one value: that value
/// - two values: inclusive `start..=stop`
/// - three values: inclusive `start..=stop` stepping by the third value
/// - more: used as given
pub fn expand_arg_list(values: &[u32]) -> Result<Vec<u32>> {
    let out: Vec<u32> = match *values {
        [] => Vec::new(),
        [start, stop] => (start..=stop).collect(),
        [start, stop, by] => {
            if by == 0 {
                return Err(Error::InvalidRequest(format!(
                    "increment must be > 0 in {values:?}"
                )));
            }
            (start..=stop).step_by(by as usize).collect()
        }
        _ => values.to_vec(),
    };

    if out.is_empty() {
        return Err(Error::InvalidRequest(format!(
            "{values:?} does not describe any values"
        )));
    }
    Ok(out)
}

/// Bucket members into ensemble groups of ten: `group = member / 10 + 1`.
pub fn ens_groups(members: &[u32]) -> BTreeMap<u32, Vec<u32>> {
    let mut groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for &mem in members {
        groups.entry(ens_group(mem)).or_default().push(mem);
    }
    groups
}

pub fn ens_group(mem: u32) -> u32 {
    mem / 10 + 1
}

/// One retrieval, fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub external_model: ExternalModel,
    pub anl_or_fcst: AnlOrFcst,
    pub cycle_date: NaiveDateTime,
    /// Already expanded; never empty.
    pub fcst_hrs: Vec<u32>,
    /// Empty for deterministic retrieval.
    pub members: Vec<u32>,
    /// Priority order, lower case.
    pub data_stores: Vec<String>,
    pub file_type: Option<FileType>,
    /// Destination directory template; may contain `{mem}`.
    pub output_path: String,
    pub input_file_path: Option<String>,
    pub file_templates: Vec<String>,
    pub summary_file: Option<String>,
}

impl RetrievalRequest {
    /// `fcst_hrs` is given in compact form and expanded with [`expand_arg_list`].
    pub fn new(
        external_model: ExternalModel,
        anl_or_fcst: AnlOrFcst,
        cycle_date: NaiveDateTime,
        fcst_hrs: &[u32],
        output_path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            external_model,
            anl_or_fcst,
            cycle_date,
            fcst_hrs: expand_arg_list(fcst_hrs)?,
            members: Vec::new(),
            data_stores: Vec::new(),
            file_type: None,
            output_path: output_path.into(),
            input_file_path: None,
            file_templates: Vec::new(),
            summary_file: None,
        })
    }

    pub fn data_stores<S: AsRef<str>>(mut self, stores: impl IntoIterator<Item = S>) -> Self {
        self.data_stores = stores
            .into_iter()
            .map(|s| s.as_ref().trim().to_ascii_lowercase())
            .collect();
        self
    }

    /// Members are given in compact form, like forecast hours.
    pub fn members(mut self, members: &[u32]) -> Result<Self> {
        self.members = if members.is_empty() {
            Vec::new()
        } else {
            expand_arg_list(members)?
        };
        Ok(self)
    }

    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn input_file_path(mut self, path: impl Into<String>) -> Self {
        self.input_file_path = Some(path.into());
        self
    }

    pub fn file_templates<S: Into<String>>(mut self, templates: impl IntoIterator<Item = S>) -> Self {
        self.file_templates = templates.into_iter().map(Into::into).collect();
        self
    }

    pub fn summary_file(mut self, name: impl Into<String>) -> Self {
        self.summary_file = Some(name.into());
        self
    }

    /// Members to iterate over; `None` stands for the deterministic run.
    pub fn member_slots(&self) -> Vec<Option<u32>> {
        if self.members.is_empty() {
            vec![None]
        } else {
            self.members.iter().copied().map(Some).collect()
        }
    }

    /// Argument combinations that can be rejected before touching any store.
    pub fn validate(&self) -> Result<()> {
        if self.fcst_hrs.is_empty() {
            return Err(Error::InvalidRequest("no forecast hours requested".into()));
        }
        if self.data_stores.is_empty() {
            return Err(Error::InvalidRequest("no data stores requested".into()));
        }
        if self.data_stores.iter().any(|s| s == "disk")
            && self.input_file_path.as_deref().is_none_or(str::is_empty)
        {
            return Err(Error::Config(
                "an input_file_path is required when disk is a data store".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cycle() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 6, 25)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn expands_compact_lists() {
        assert_eq!(expand_arg_list(&[6]).unwrap(), vec![6]);
        assert_eq!(expand_arg_list(&[6, 12]).unwrap(), vec![6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(expand_arg_list(&[3, 30, 6]).unwrap(), vec![3, 9, 15, 21, 27]);
        assert_eq!(expand_arg_list(&[6, 12, 3]).unwrap(), vec![6, 9, 12]);
        assert_eq!(expand_arg_list(&[3, 24, 3]).unwrap().len(), 8);
        assert_eq!(expand_arg_list(&[1, 2, 3, 4]).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn rejects_empty_expansions() {
        assert!(expand_arg_list(&[]).is_err());
        assert!(expand_arg_list(&[12, 6]).is_err());
        assert!(expand_arg_list(&[0, 12, 0]).is_err());
    }

    #[test]
    fn groups_members_by_tens() {
        let groups = ens_groups(&[1, 2, 9, 10, 11, 25]);
        assert_eq!(groups.get(&1), Some(&vec![1, 2, 9]));
        assert_eq!(groups.get(&2), Some(&vec![10, 11]));
        assert_eq!(groups.get(&3), Some(&vec![25]));
    }

    #[test]
    fn parses_enums() {
        assert_eq!("FV3GFS".parse::<ExternalModel>().unwrap(), ExternalModel::Fv3gfs);
        assert_eq!("RAPx".parse::<ExternalModel>().unwrap(), ExternalModel::RapX);
        assert!("fv3gfs".parse::<ExternalModel>().is_err());
        assert_eq!("fcst".parse::<AnlOrFcst>().unwrap(), AnlOrFcst::Fcst);
        assert_eq!("netcdf".parse::<FileType>().unwrap(), FileType::Netcdf);
    }

    #[test]
    fn disk_store_needs_input_path() {
        let req = RetrievalRequest::new(ExternalModel::Hrrr, AnlOrFcst::Anl, cycle(), &[0], "/tmp/out")
            .unwrap()
            .data_stores(["HPSS", "disk"]);
        assert_eq!(req.data_stores, vec!["hpss", "disk"]);
        assert!(matches!(req.validate(), Err(Error::Config(_))));
        assert!(req.input_file_path("/data/{yyyymmddhh}").validate().is_ok());
    }

    #[test]
    fn member_slots() {
        let req = RetrievalRequest::new(ExternalModel::Gefs, AnlOrFcst::Anl, cycle(), &[6], "out")
            .unwrap();
        assert_eq!(req.member_slots(), vec![None]);
        let req = req.members(&[1, 3]).unwrap();
        assert_eq!(req.member_slots(), vec![Some(1), Some(2), Some(3)]);
    }
}
