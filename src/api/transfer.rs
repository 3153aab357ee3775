//! Upload/download strategies for moving files to and from the platform.
//!
//! Two interchangeable strategies exist: the platform's transfer tool,
//! used for batch uploads and large downloads when it is installed, and
//! plain HTTP against the files endpoints otherwise. The client picks one
//! per call; callers never see the difference beyond speed.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::api::ApiError;

/// Marker printed by the transfer tool for every file it uploads
const FILE_ID_MARKER: &str = "File ID";

/// HTTP downloads are streamed to disk in chunks of this size
const DOWNLOAD_CHUNK: usize = 131_072; // 128 KiB

/// Result of an upload: remote ids when the caller asked for them,
/// otherwise a collective success flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upload {
    Ids(Vec<String>),
    Complete(bool),
}

impl Upload {
    /// Remote ids carried by this outcome, empty when none were requested
    pub fn ids(self) -> Vec<String> {
        match self {
            Upload::Ids(ids) => ids,
            Upload::Complete(_) => Vec::new(),
        }
    }
}

pub trait Transfer {
    fn upload(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError>;

    fn download(
        &self,
        file_id: &str,
        dest_dir: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> Result<bool, ApiError>;
}

/// Batch transfers through the platform's command-line tool
pub struct CliTransfer<'a> {
    pub base_url: &'a str,
    pub token: &'a str,
    pub program: &'a Path,
}

impl Transfer for CliTransfer<'_> {
    fn upload(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError> {
        info!("Uploading {} files through the transfer tool", files.len());
        let mut command = Command::new(self.program);
        command
            .arg("-X")
            .arg(self.base_url)
            .arg("upload")
            .arg("-p")
            .arg(self.token)
            .arg("-f")
            .args(files);
        let stdout = run(command)?;

        match want_ids {
            true => Ok(Upload::Ids(parse_upload_ids(&stdout))),
            false => Ok(Upload::Complete(true)),
        }
    }

    fn download(
        &self,
        file_id: &str,
        dest_dir: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> Result<bool, ApiError> {
        info!("Downloading {file_name} through the transfer tool");
        let mut command = Command::new(self.program);
        command
            .arg("-X")
            .arg(self.base_url)
            .arg("download-file")
            .arg("-fid")
            .arg(file_id)
            .arg("-o")
            .arg(dest_dir)
            .arg("-p")
            .arg(self.token);
        run(command)?;

        Ok(verify_size(&dest_dir.join(file_name), expected_size))
    }
}

/// Run the transfer tool to completion; a non-zero exit is fatal
fn run(mut command: Command) -> Result<String, ApiError> {
    let output = command
        .output()
        .map_err(|source| ApiError::Spawn { source })?;
    if !output.status.success() {
        return Err(ApiError::Process {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract one remote id per marker line, in output order.
///
/// The tool prints a line containing `File ID` for every uploaded file;
/// the id is the second-to-last whitespace-separated token.
fn parse_upload_ids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.contains(FILE_ID_MARKER))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            tokens.len().checked_sub(2).map(|i| tokens[i].to_string())
        })
        .collect()
}

/// Per-file transfers over the files endpoints
pub struct HttpTransfer<'a> {
    pub base_url: &'a str,
    pub http: &'a Client,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

impl Transfer for HttpTransfer<'_> {
    fn upload(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            ids.push(self.upload_one(file)?);
        }

        match want_ids {
            true => Ok(Upload::Ids(ids)),
            false => Ok(Upload::Complete(ids.len() == files.len())),
        }
    }

    fn download(
        &self,
        file_id: &str,
        dest_dir: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> Result<bool, ApiError> {
        let url = format!("{}/api/v2/files/{}/contents/", self.base_url, file_id);
        let mut response = self.http.get(url).send()?.error_for_status()?;

        let dest = dest_dir.join(file_name);
        let mut out = fs::File::create(&dest)?;
        let mut buffer = vec![0u8; DOWNLOAD_CHUNK];
        loop {
            let n = response.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            out.write_all(&buffer[..n])?;
        }
        drop(out);

        Ok(verify_size(&dest, expected_size))
    }
}

impl HttpTransfer<'_> {
    fn upload_one(&self, file: &Path) -> Result<String, ApiError> {
        info!("Uploading {} over HTTP", file.display());
        let url = format!("{}/api/v2/files/contents/", self.base_url);
        let form = Form::new().file("file", file)?;
        let response = self.http.post(url).multipart(form).send()?.error_for_status()?;
        let uploaded: UploadedFile = response.json()?;
        Ok(uploaded.id)
    }
}

/// A transfer only counts when the destination exists with exactly the
/// expected size; anything else is reported as failure, never an error.
pub(crate) fn verify_size(dest: &Path, expected_size: u64) -> bool {
    let actual = match fs::metadata(dest) {
        Ok(metadata) => metadata.len(),
        Err(_) => {
            warn!("Expected download at {} is missing", dest.display());
            return false;
        }
    };

    if actual != expected_size {
        warn!(
            "Size mismatch for {}: expected {expected_size} bytes, found {actual}",
            dest.display()
        );
        return false;
    }
    true
}
