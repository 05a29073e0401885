//! Summary manifest consumed by the downstream workflow.
//!
//! The default form is a shell-sourceable `KEY=value` file; a name ending in
//! `.json` gets the same content as JSON instead.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::date::yyyymmddhh;
use crate::error::Result;
use crate::request::RetrievalRequest;
use crate::retriever::Retrieval;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Summary {
    pub data_src: String,
    pub extrn_mdl_cdate: String,
    pub extrn_mdl_staging_dir: String,
    pub extrn_mdl_fns: Vec<String>,
    pub extrn_mdl_fhrs: Vec<u32>,
}

impl Summary {
    pub fn to_shell(&self) -> String {
        let fhrs: Vec<String> = self.extrn_mdl_fhrs.iter().map(u32::to_string).collect();
        format!(
            "DATA_SRC={}\nEXTRN_MDL_CDATE={}\nEXTRN_MDL_STAGING_DIR={}\nEXTRN_MDL_FNS=( {} )\nEXTRN_MDL_FHRS=( {} )\n",
            self.data_src,
            self.extrn_mdl_cdate,
            self.extrn_mdl_staging_dir,
            self.extrn_mdl_fns.join(" "),
            fhrs.join(" "),
        )
    }
}

/// Write one summary into every staging directory of `retrieval`.
/// Returns the paths written.
pub fn write_summary(req: &RetrievalRequest, retrieval: &Retrieval, name: &str) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for staged in &retrieval.staged {
        let summary = Summary {
            data_src: retrieval.data_store.clone(),
            extrn_mdl_cdate: yyyymmddhh(&req.cycle_date),
            extrn_mdl_staging_dir: staged.dir.display().to_string(),
            extrn_mdl_fns: staged.files.clone(),
            extrn_mdl_fhrs: req.fcst_hrs.clone(),
        };
        let path = staged.dir.join(name);
        write_one(&summary, &path)?;
        written.push(path);
    }
    Ok(written)
}

fn write_one(summary: &Summary, path: &Path) -> Result<()> {
    let contents = if path.extension().is_some_and(|e| e == "json") {
        serde_json::to_string_pretty(summary)?
    } else {
        summary.to_shell()
    };
    info!("Writing a summary file to {}", path.display());
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::parse_cycle_date;
    use crate::request::{AnlOrFcst, ExternalModel};
    use crate::retriever::StagedDir;

    fn fixture(dir: &Path) -> (RetrievalRequest, Retrieval) {
        let req = RetrievalRequest::new(
            ExternalModel::Fv3gfs,
            AnlOrFcst::Fcst,
            parse_cycle_date("2022062512").unwrap(),
            &[6, 12, 3],
            dir.display().to_string(),
        )
        .unwrap();
        let retrieval = Retrieval {
            data_store: "hpss".to_string(),
            staged: vec![StagedDir {
                dir: dir.to_path_buf(),
                files: vec!["f006".into(), "f009".into(), "f012".into()],
            }],
        };
        (req, retrieval)
    }

    #[test]
    fn writes_shell_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (req, retrieval) = fixture(dir.path());
        let paths = write_summary(&req, &retrieval, "extrn_mdl_var_defns.sh").unwrap();
        let text = fs::read_to_string(&paths[0]).unwrap();
        assert!(text.contains("DATA_SRC=hpss\n"));
        assert!(text.contains("EXTRN_MDL_CDATE=2022062512\n"));
        assert!(text.contains(&format!("EXTRN_MDL_STAGING_DIR={}\n", dir.path().display())));
        assert!(text.contains("EXTRN_MDL_FNS=( f006 f009 f012 )\n"));
        assert!(text.contains("EXTRN_MDL_FHRS=( 6 9 12 )\n"));
    }

    #[test]
    fn writes_json_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (req, retrieval) = fixture(dir.path());
        let paths = write_summary(&req, &retrieval, "summary.json").unwrap();
        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(v["DATA_SRC"], "hpss");
        assert_eq!(v["EXTRN_MDL_FHRS"], serde_json::json!([6, 9, 12]));
    }
}
