use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::archive::{self, ArchiveJob, ArchiveResolver};
use crate::config::{DataLocations, ModelSpec, NameTemplates, Protocol, StoreSpec};
use crate::error::{Error, Result};
use crate::request::{RetrievalRequest, ens_group, ens_groups};
use crate::sources::{join_location, pair_locations};
use crate::summary::write_summary;
use crate::template::fill;
use crate::transport::{SystemTransport, Transport, TransportOptions};

/// Name of the data store served from user-supplied disk locations.
pub const DISK_STORE: &str = "disk";

/// Items that could not be retrieved, keyed by store or archive stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Unavailable(BTreeMap<String, Vec<String>>);

impl Unavailable {
    pub fn record(&mut self, key: &str, item: impl Into<String>) {
        self.0.entry(key.to_string()).or_default().push(item.into());
    }

    /// Adds nothing (not even the key) when `items` is empty.
    pub fn extend(&mut self, key: &str, items: impl IntoIterator<Item = String>) {
        let items: Vec<String> = items.into_iter().collect();
        if !items.is_empty() {
            self.0.entry(key.to_string()).or_default().extend(items);
        }
    }

    pub fn merge(&mut self, other: Unavailable) {
        for (key, items) in other.0 {
            self.extend(&key, items);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, items)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{key}: {}", items.join(", "))?;
        }
        Ok(())
    }
}

/// Files placed in one output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedDir {
    pub dir: PathBuf,
    pub files: Vec<String>,
}

/// Result of trying one data store.
#[derive(Debug, Clone, Default)]
pub struct StoreOutcome {
    pub unavailable: Unavailable,
    pub staged: Vec<StagedDir>,
}

impl StoreOutcome {
    pub fn record_staged(&mut self, dir: &Path, files: impl IntoIterator<Item = String>) {
        let idx = match self.staged.iter().position(|s| s.dir == dir) {
            Some(i) => i,
            None => {
                self.staged.push(StagedDir {
                    dir: dir.to_path_buf(),
                    files: Vec::new(),
                });
                self.staged.len() - 1
            }
        };
        let entry = &mut self.staged[idx];
        for f in files {
            if !entry.files.contains(&f) {
                entry.files.push(f);
            }
        }
    }

    fn merge(&mut self, other: StoreOutcome) {
        self.unavailable.merge(other.unavailable);
        for s in other.staged {
            self.record_staged(&s.dir, s.files);
        }
    }
}

/// A successful retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    /// The store that supplied every file.
    pub data_store: String,
    pub staged: Vec<StagedDir>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Disk,
    Download,
}

/// Tries data stores in priority order until one supplies every requested file.
pub struct Retriever {
    locations: DataLocations,
    transport: Box<dyn Transport>,
}

impl Retriever {
    pub fn new(locations: DataLocations, transport: impl Transport + 'static) -> Self {
        Self {
            locations,
            transport: Box::new(transport),
        }
    }

    pub fn with_system_transport(locations: DataLocations, opts: TransportOptions) -> Result<Self> {
        Ok(Self::new(locations, SystemTransport::new(opts)?))
    }

    pub fn locations(&self) -> &DataLocations {
        &self.locations
    }

    /// Retrieve everything `req` asks for.
    ///
    /// Stores are tried in order and the first one that supplies every file
    /// wins; later stores are not contacted. The summary file, if requested, is
    /// only written on success.
    pub fn retrieve(&self, req: &RetrievalRequest) -> Result<Retrieval> {
        req.validate()?;

        let empty = ModelSpec::default();
        let mut stores: Vec<&str> = req.data_stores.iter().map(String::as_str).collect();
        let model = match self.locations.model(req.external_model) {
            Some(m) => m,
            None if req.input_file_path.is_some() => {
                info!(
                    "No data stores have been defined for {}! Only checking provided disk location.",
                    req.external_model
                );
                stores.retain(|s| *s == DISK_STORE);
                if stores.is_empty() {
                    stores.push(DISK_STORE);
                }
                &empty
            }
            None => {
                return Err(Error::Config(format!(
                    "no data stores have been defined for {}",
                    req.external_model
                )));
            }
        };

        let wants_archive = stores
            .iter()
            .any(|s| model.store(s).is_some_and(|spec| spec.protocol == Protocol::Htar));
        let archive_tools = !wants_archive || self.transport.archive_tools_available();
        if !archive_tools {
            error!(
                "An HPSS data store was requested, but the HPSS tools are not available. \
                 This data store is only available on NOAA compute platforms."
            );
        }

        let mut unavailable = Unavailable::default();
        for store in stores {
            info!("Checking {store} for {}", req.external_model);

            let outcome = if store == DISK_STORE {
                self.from_disk(req, model)?
            } else {
                let spec = model.store(store).ok_or_else(|| {
                    Error::Config(format!("no information is available for {store}"))
                })?;
                if spec.protocol == Protocol::Htar && !archive_tools {
                    let mut outcome = StoreOutcome::default();
                    outcome.unavailable.record(archive::ARCHIVE_KEY, store);
                    outcome
                } else {
                    self.from_store(req, model, store, spec)?
                }
            };

            if outcome.unavailable.is_empty() {
                let retrieval = Retrieval {
                    data_store: store.to_string(),
                    staged: outcome.staged,
                };
                if let Some(name) = &req.summary_file {
                    write_summary(req, &retrieval, name)?;
                }
                info!("All requested files retrieved from {store}");
                return Ok(retrieval);
            }

            warn!("Requested files are unavailable from {store}");
            debug!("Unavailable from {store}: {}", outcome.unavailable);
            unavailable = outcome.unavailable;
        }

        error!("Could not find any of the requested files.");
        Err(Error::Unavailable(unavailable))
    }

    fn from_disk(&self, req: &RetrievalRequest, model: &ModelSpec) -> Result<StoreOutcome> {
        let input = req.input_file_path.as_deref().ok_or_else(|| {
            Error::Config("an input_file_path is required when disk is a data store".into())
        })?;

        // Files staged on disk by hand usually keep their archive names.
        let templates = if !req.file_templates.is_empty() {
            NameTemplates::from_templates(req.file_templates.iter().cloned())
        } else {
            model
                .store("hpss")
                .filter(|spec| spec.has_file_names())
                .map(|spec| spec.file_names(req.file_type, req.anl_or_fcst))
                .transpose()?
                .ok_or_else(|| {
                    Error::Config(
                        "no file naming convention found; provide file templates on the command line or in the config file"
                            .into(),
                    )
                })?
        };
        debug!("Disk file names are: {:?}", templates.flatten());

        self.get_requested_files(
            req,
            Method::Disk,
            DISK_STORE,
            &[input.to_string()],
            &templates,
            model.check_all,
        )
    }

    fn from_store(
        &self,
        req: &RetrievalRequest,
        model: &ModelSpec,
        store: &str,
        spec: &StoreSpec,
    ) -> Result<StoreOutcome> {
        let templates = spec.file_names(req.file_type, req.anl_or_fcst)?;
        let check_all = model.check_all || spec.check_all;

        match spec.protocol {
            Protocol::Download => self.get_requested_files(
                req,
                Method::Download,
                store,
                &spec.urls(),
                &templates,
                check_all,
            ),
            Protocol::Disk => {
                let locations = match &req.input_file_path {
                    Some(p) => vec![p.clone()],
                    None => spec.urls(),
                };
                self.get_requested_files(req, Method::Disk, store, &locations, &templates, check_all)
            }
            Protocol::Htar => self.from_archive(req, spec, &templates),
        }
    }

    fn from_archive(
        &self,
        req: &RetrievalRequest,
        spec: &StoreSpec,
        templates: &NameTemplates,
    ) -> Result<StoreOutcome> {
        let candidates = archive::candidates(spec, req.file_type, req.anl_or_fcst, templates)?;
        let resolver = ArchiveResolver::new(self.transport.as_ref(), spec);

        if req.members.is_empty() {
            let job = ArchiveJob {
                cycle_date: &req.cycle_date,
                fcst_hrs: &req.fcst_hrs,
                members: &[None],
                ens_group: None,
                output_path: &req.output_path,
            };
            return resolver.retrieve(&candidates, &job);
        }

        let mut outcome = StoreOutcome::default();
        for (group, members) in ens_groups(&req.members) {
            let slots: Vec<Option<u32>> = members.into_iter().map(Some).collect();
            let job = ArchiveJob {
                cycle_date: &req.cycle_date,
                fcst_hrs: &req.fcst_hrs,
                members: &slots,
                ens_group: Some(group),
                output_path: &req.output_path,
            };
            outcome.merge(resolver.retrieve(&candidates, &job)?);
        }
        Ok(outcome)
    }

    /// Copy or download every (member, forecast hour, location, template)
    /// combination into the member's output directory.
    fn get_requested_files(
        &self,
        req: &RetrievalRequest,
        method: Method,
        key: &str,
        locations: &[String],
        templates: &NameTemplates,
        check_all: bool,
    ) -> Result<StoreOutcome> {
        let pairs = pair_locations(locations, templates, check_all)?;
        info!("Getting files named like {:?}", templates.flatten());

        let mut outcome = StoreOutcome::default();
        for mem in req.member_slots() {
            let group = mem.map(ens_group);
            let out_dir = PathBuf::from(fill(&req.output_path, &req.cycle_date, 0, mem, None)?);
            fs::create_dir_all(&out_dir)?;
            info!("Retrieved files will be placed here: {}", out_dir.display());

            // Keyed by (template, forecast hour) so files are listed template first.
            let mut found: Vec<((usize, usize), String)> = Vec::new();
            for (h, &fcst_hr) in req.fcst_hrs.iter().enumerate() {
                let render = |loc: &str, template: &str| {
                    fill(&join_location(loc, template), &req.cycle_date, fcst_hr, mem, group)
                };

                if check_all {
                    // Any location may hold any file: look until found.
                    for (t, template) in pairs[0].1.iter().enumerate() {
                        let mut tried = Vec::new();
                        let mut hit = None;
                        for (loc, _) in &pairs {
                            let path = render(loc, template)?;
                            debug!("Full file path: {path}");
                            if self.fetch(method, &path, &out_dir)? {
                                hit = Some(path);
                                break;
                            }
                            tried.push(path);
                        }
                        match hit {
                            Some(path) => found.push(((t, h), base_name(&path))),
                            None => outcome.unavailable.extend(key, tried),
                        }
                    }
                    continue;
                }

                let mut t = 0;
                for (loc, group_templates) in &pairs {
                    let first = t;
                    t += group_templates.len();
                    for (i, template) in group_templates.iter().enumerate() {
                        let path = render(loc, template)?;
                        debug!("Full file path: {path}");
                        if !self.fetch(method, &path, &out_dir)? {
                            outcome.unavailable.record(key, path);
                            // Skip the rest of this location once one file is missing.
                            break;
                        }
                        found.push(((first + i, h), base_name(&path)));
                    }
                }
            }

            if !found.is_empty() {
                found.sort_by_key(|(order, _)| *order);
                outcome.record_staged(&out_dir, found.into_iter().map(|(_, name)| name));
            }
        }
        Ok(outcome)
    }

    fn fetch(&self, method: Method, path: &str, out_dir: &Path) -> Result<bool> {
        match method {
            Method::Disk => self.transport.copy_from_disk(Path::new(path), out_dir),
            Method::Download => self.transport.download(path, out_dir),
        }
    }
}

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
