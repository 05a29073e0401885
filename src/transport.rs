//! Single-file data movement: disk copies, HTTP(S) downloads and the HPSS
//! tools (`hsi`, `htar`) plus `unzip`.
//!
//! Every operation takes the directory it works in explicitly. External
//! commands are started with that directory as their working directory, so the
//! working directory of this process is never changed.

use std::env;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use url::Url;

use crate::error::{Error, Result};

/// What `probe_archive` does with an archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Check that the path exists without transferring it.
    List,
    /// Stage the whole object into the destination directory.
    Get,
}

impl ProbeMode {
    fn as_hsi_command(&self) -> &'static str {
        match self {
            ProbeMode::List => "ls",
            ProbeMode::Get => "get",
        }
    }
}

/// One unit of data movement per protocol.
///
/// `Ok(false)` means the object is not there; `Err` is reserved for the
/// transfer mechanism itself failing.
pub trait Transport {
    /// Copy `source` into `dest_dir`, keeping its file name.
    fn copy_from_disk(&self, source: &Path, dest_dir: &Path) -> Result<bool>;

    /// Fetch `url` into `dest_dir`, named after the last path segment.
    fn download(&self, url: &str, dest_dir: &Path) -> Result<bool>;

    fn probe_archive(&self, path: &str, mode: ProbeMode, dest_dir: &Path) -> Result<bool>;

    /// Extract `members` from a tar archive on HPSS into `dest_dir`.
    ///
    /// `htar` exits non-zero when any member is absent, so an error here may
    /// still leave the other members extracted.
    fn extract_tar(&self, archive: &str, members: &[String], dest_dir: &Path) -> Result<()>;

    /// Extract `members` from a zip archive already staged in `dest_dir`.
    fn unzip(&self, archive: &Path, members: &[String], dest_dir: &Path) -> Result<()>;

    /// Whether the archive tools can be run at all.
    fn archive_tools_available(&self) -> bool {
        true
    }
}

/// True iff `path` is a regular file with at least one byte.
pub fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Per-attempt timeout for downloads.
    pub timeout: Duration,
    pub attempts: u32,
    pub hsi: String,
    pub htar: String,
    pub unzip: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            attempts: 3,
            hsi: "hsi".to_string(),
            htar: "htar".to_string(),
            unzip: "unzip".to_string(),
        }
    }
}

enum Fetch {
    Done,
    Missing(StatusCode),
}

/// Transport backed by the local filesystem, `reqwest` and the HPSS tools.
#[derive(Debug, Clone)]
pub struct SystemTransport {
    opts: TransportOptions,
    http: HttpClient,
}

impl SystemTransport {
    pub fn new(opts: TransportOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("extrn-retrieve/0.1"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(opts.timeout)
            .build()?;

        Ok(Self { opts, http })
    }

    fn fetch_once(&self, url: &Url, target: &Path) -> Result<Fetch> {
        let existing = fs::metadata(target).map(|m| m.len()).unwrap_or(0);

        let mut req = self.http.get(url.clone());
        if existing > 0 {
            debug!("resuming {url} from byte {existing}");
            req = req.header(RANGE, format!("bytes={existing}-"));
        }
        let resp = req.send()?;
        let status = resp.status();

        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE
        ) {
            return Ok(Fetch::Missing(status));
        }
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // The partial file is already complete.
            return Ok(Fetch::Done);
        }

        let mut resp = resp.error_for_status()?;
        let mut file = if status == StatusCode::PARTIAL_CONTENT {
            OpenOptions::new().append(true).open(target)?
        } else {
            File::create(target)?
        };
        resp.copy_to(&mut file)?;
        Ok(Fetch::Done)
    }

    fn run(&self, program: &str, args: &[&str], dest_dir: &Path) -> Result<Output> {
        let line = command_line(program, args);
        info!("Running command: {line} (in {})", dest_dir.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(dest_dir)
            .output()
            .map_err(|e| Error::transport(&line, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("{program} stdout: {}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!("{program} stderr: {}", stderr.trim_end());
        }
        Ok(output)
    }
}

impl Transport for SystemTransport {
    /// Whether the HPSS access tool can be found on `PATH`.
    fn archive_tools_available(&self) -> bool {
        find_on_path(&self.opts.hsi).is_some()
    }

    fn copy_from_disk(&self, source: &Path, dest_dir: &Path) -> Result<bool> {
        if !source.is_file() {
            info!("File does not exist on disk: {}", source.display());
            return Ok(false);
        }
        let Some(name) = source.file_name() else {
            return Ok(false);
        };
        let target = dest_dir.join(name);
        info!("Copying {} to {}", source.display(), target.display());
        match fs::copy(source, &target) {
            Ok(_) => Ok(is_nonempty_file(&target)),
            Err(e) => {
                warn!("Copy of {} failed: {e}", source.display());
                Ok(false)
            }
        }
    }

    fn download(&self, url: &str, dest_dir: &Path) -> Result<bool> {
        let parsed = Url::parse(url)?;
        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Config(format!("url has no file name: {url}")))?;
        let target = dest_dir.join(&name);

        let attempts = self.opts.attempts.max(1);
        for attempt in 1..=attempts {
            info!("Downloading {url} (attempt {attempt}/{attempts})");
            match self.fetch_once(&parsed, &target) {
                Ok(Fetch::Done) => return Ok(is_nonempty_file(&target)),
                Ok(Fetch::Missing(status)) => {
                    info!("{url} is not available: {status}");
                    return Ok(false);
                }
                Err(e) => warn!("Download attempt {attempt} of {url} failed: {e}"),
            }
        }

        warn!("Giving up on {url} after {attempts} attempts");
        if target.exists() {
            debug!("Removing partial download {}", target.display());
            fs::remove_file(&target)?;
        }
        Ok(false)
    }

    fn probe_archive(&self, path: &str, mode: ProbeMode, dest_dir: &Path) -> Result<bool> {
        let output = self.run(&self.opts.hsi, &[mode.as_hsi_command(), path], dest_dir)?;
        if !output.status.success() {
            warn!("{path} is not available!");
            return Ok(false);
        }
        match mode {
            ProbeMode::List => Ok(true),
            ProbeMode::Get => {
                let staged = Path::new(path)
                    .file_name()
                    .map(|n| dest_dir.join(n))
                    .unwrap_or_else(|| dest_dir.to_path_buf());
                Ok(is_nonempty_file(&staged))
            }
        }
    }

    fn extract_tar(&self, archive: &str, members: &[String], dest_dir: &Path) -> Result<()> {
        let mut args = vec!["-xvf", archive];
        args.extend(members.iter().map(String::as_str));
        let output = self.run(&self.opts.htar, &args, dest_dir)?;
        if !output.status.success() {
            return Err(Error::transport(
                command_line(&self.opts.htar, &args),
                failure_detail(&output),
            ));
        }
        Ok(())
    }

    fn unzip(&self, archive: &Path, members: &[String], dest_dir: &Path) -> Result<()> {
        let archive = archive.to_string_lossy();
        let mut args = vec!["-o", &*archive];
        args.extend(members.iter().map(String::as_str));
        let output = self.run(&self.opts.unzip, &args, dest_dir)?;
        match output.status.code() {
            // 1: warnings only; 11: none of the requested members matched.
            Some(0) | Some(1) => Ok(()),
            Some(11) => {
                warn!("None of the requested files were found in {archive}");
                Ok(())
            }
            _ => Err(Error::transport(
                command_line(&self.opts.unzip, &args),
                failure_detail(&output),
            )),
        }
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for a in args {
        line.push(' ');
        line.push_str(a);
    }
    line
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    format!("{} {}", output.status, last.trim())
}

fn find_on_path(program: impl AsRef<OsStr>) -> Option<PathBuf> {
    let program = program.as_ref();
    if Path::new(program).components().count() > 1 {
        return Path::new(program).is_file().then(|| PathBuf::from(program));
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SystemTransport {
        SystemTransport::new(TransportOptions::default()).unwrap()
    }

    #[test]
    fn copies_existing_files() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("gfs.t12z.pgrb2.0p25.f006");
        fs::write(&src, b"GRIB").unwrap();

        assert!(transport().copy_from_disk(&src, dest_dir.path()).unwrap());
        assert_eq!(
            fs::read(dest_dir.path().join("gfs.t12z.pgrb2.0p25.f006")).unwrap(),
            b"GRIB"
        );
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let dest_dir = tempfile::tempdir().unwrap();
        let missing = dest_dir.path().join("nope").join("file");
        assert!(!transport().copy_from_disk(&missing, dest_dir.path()).unwrap());
    }

    #[test]
    fn empty_copies_do_not_count() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("empty");
        fs::write(&src, b"").unwrap();
        assert!(!transport().copy_from_disk(&src, dest_dir.path()).unwrap());
    }

    #[test]
    fn missing_archive_tool_is_a_transport_error() {
        let opts = TransportOptions {
            hsi: "definitely-not-an-hsi-binary".to_string(),
            ..TransportOptions::default()
        };
        let t = SystemTransport::new(opts).unwrap();
        assert!(!t.archive_tools_available());
        let dir = tempfile::tempdir().unwrap();
        let err = t.probe_archive("/NCEPPROD/x.tar", ProbeMode::List, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn download_needs_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            transport().download("https://example.com/", dir.path()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            transport().download("not a url", dir.path()),
            Err(Error::Url(_))
        ));
    }

    #[test]
    fn failed_downloads_leave_no_partial_file() {
        let opts = TransportOptions {
            timeout: Duration::from_secs(2),
            attempts: 1,
            ..TransportOptions::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("gfs.t12z.pgrb2.0p25.f006");
        fs::write(&partial, b"GRI").unwrap();

        // Nothing listens on the discard port.
        let got = SystemTransport::new(opts)
            .unwrap()
            .download("http://127.0.0.1:9/gfs.t12z.pgrb2.0p25.f006", dir.path())
            .unwrap();
        assert!(!got);
        assert!(!partial.exists());
    }

    #[test]
    fn formats_command_lines() {
        assert_eq!(command_line("htar", &["-xvf", "a.tar", "b"]), "htar -xvf a.tar b");
    }
}
