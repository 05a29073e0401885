#![forbid(unsafe_code)]

//! Retrieval of external model data for regional NWP cycles.
//!
//! Initial and boundary condition files for a forecast cycle come from one of
//! several data stores: a directory on disk, an HTTP(S) endpoint, or a dated
//! tape archive on HPSS. A YAML data locations file describes, per external
//! model and store, where the files live and how they are named; names and
//! paths are templates filled from the cycle date, forecast hour and ensemble
//! member. Stores are tried in priority order and the first one that supplies
//! every requested file wins.
//!
//! **Quick start**
//! ```no_run
//! use extrn_retrieve::{
//!     AnlOrFcst, DataLocations, ExternalModel, FileType, RetrievalRequest, Retriever,
//!     TransportOptions, parse_cycle_date,
//! };
//!
//! let locations = DataLocations::from_path("data_locations.yml")?;
//! let retriever = Retriever::with_system_transport(locations, TransportOptions::default())?;
//!
//! let request = RetrievalRequest::new(
//!     ExternalModel::Fv3gfs,
//!     AnlOrFcst::Fcst,
//!     parse_cycle_date("2022062512")?,
//!     &[6, 12, 3],
//!     "/scratch/lbcs",
//! )?
//! .data_stores(["hpss", "aws"])
//! .file_type(FileType::Grib2)
//! .summary_file("extrn_mdl_var_defns.sh");
//!
//! let retrieval = retriever.retrieve(&request)?;
//! println!("retrieved from {}", retrieval.data_store);
//! # Ok::<(), extrn_retrieve::Error>(())
//! ```

mod archive;
mod config;
mod date;
mod error;
mod request;
mod retriever;
mod sources;
mod summary;
mod template;
mod transport;

pub use crate::archive::{ArchiveCandidate, ArchiveJob, ArchiveResolver, candidates as archive_candidates};
pub use crate::config::{ArchiveFormat, DataLocations, ModelSpec, NameTemplates, Protocol, StoreSpec};
pub use crate::date::{bin6, hh_even, parse_cycle_date};
pub use crate::error::{Error, Result};
pub use crate::request::{AnlOrFcst, ExternalModel, FileType, RetrievalRequest, ens_groups, expand_arg_list};
pub use crate::retriever::{Retrieval, Retriever, StagedDir, StoreOutcome, Unavailable};
pub use crate::sources::pair_locations;
pub use crate::summary::{Summary, write_summary};
pub use crate::template::{PLACEHOLDERS, fill};
pub use crate::transport::{ProbeMode, SystemTransport, Transport, TransportOptions, is_nonempty_file};
