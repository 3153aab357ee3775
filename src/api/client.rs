use std::path::{Path, PathBuf};

use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use crate::api::transfer::{CliTransfer, HttpTransfer, Transfer, Upload};
use crate::api::types::{JobStatus, RemoteFile, RunProgress, RunStatus};
use crate::api::ApiError;
use crate::config::Settings;
use crate::job::spec::JobSpec;

/// Name of the platform's transfer tool, probed on PATH at construction
const TRANSFER_TOOL: &str = "rescale-cli";

/// Downloads above this size go through the transfer tool when available
const CLI_DOWNLOAD_THRESHOLD: u64 = 134_217_728; // 128 MiB

/// Client over the platform's REST service.
///
/// Holds only immutable configuration and the authorization header; a
/// fresh client is constructed per submission worker so nothing mutable
/// is ever shared between submissions.
pub struct RescaleApi {
    base_url: String,
    token: String,
    http: Client,
    transfer_tool: Option<PathBuf>,
}

#[derive(Deserialize)]
struct CreatedJob {
    id: String,
}

#[derive(Deserialize)]
struct PriorityEcho {
    priority: i64,
}

#[derive(Deserialize)]
struct StatusList {
    results: Vec<JobStatus>,
}

#[derive(Deserialize)]
struct FilePage {
    results: Vec<RemoteFile>,
    next: Option<String>,
    count: usize,
}

impl RescaleApi {
    pub fn new(settings: &Settings) -> Result<RescaleApi, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", settings.api_key))
            .map_err(|_| ApiError::Credential)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder().default_headers(headers).build()?;

        let transfer_tool = which::which(TRANSFER_TOOL).ok();
        match &transfer_tool {
            Some(path) => info!("Transfer tool found at {}", path.display()),
            None => info!("No transfer tool on PATH, falling back to HTTP transfers"),
        }

        Ok(RescaleApi {
            base_url: settings.api_base_url.clone(),
            token: settings.api_key.clone(),
            http,
            transfer_tool,
        })
    }

    pub fn get_run_status(&self, job_id: &str, run_index: u32) -> Result<RunStatus, ApiError> {
        let url = format!("{}/api/v2/jobs/{}/runs/{}/", self.base_url, job_id, run_index);
        let response = self.http.get(url).send()?.error_for_status()?;
        Ok(response.json()?)
    }

    pub fn is_run_started(&self, job_id: &str, run_index: u32) -> Result<RunProgress, ApiError> {
        Ok(self.get_run_status(job_id, run_index)?.started())
    }

    pub fn is_run_completed(&self, job_id: &str, run_index: u32) -> Result<RunProgress, ApiError> {
        Ok(self.get_run_status(job_id, run_index)?.completed())
    }

    pub fn create_job(&self, spec: &JobSpec) -> Result<String, ApiError> {
        let url = format!("{}/api/v2/jobs/", self.base_url);
        let response = self.http.post(url).json(spec).send()?.error_for_status()?;
        let created: CreatedJob = response.json()?;
        info!("Created job {}", created.id);
        Ok(created.id)
    }

    /// True iff the service acknowledged the submit with a non-empty body;
    /// callers must treat false as failure even though no error is raised.
    pub fn submit_job(&self, job_id: &str) -> Result<bool, ApiError> {
        let url = format!("{}/api/v2/jobs/{}/submit/", self.base_url, job_id);
        let response = self.http.post(url).send()?.error_for_status()?;
        Ok(!response.text()?.is_empty())
    }

    pub fn get_job_statuses(&self, job_id: &str) -> Result<Vec<JobStatus>, ApiError> {
        let url = format!("{}/api/v2/jobs/{}/statuses/", self.base_url, job_id);
        let response = self.http.get(url).send()?.error_for_status()?;
        let list: StatusList = response.json()?;
        Ok(list.results)
    }

    pub fn is_job_started(&self, job_id: &str) -> Result<bool, ApiError> {
        Ok(has_status(&self.get_job_statuses(job_id)?, "Started"))
    }

    pub fn is_job_completed(&self, job_id: &str) -> Result<bool, ApiError> {
        Ok(has_status(&self.get_job_statuses(job_id)?, "Completed"))
    }

    /// Only attempted once the job has at least one status entry; `None`
    /// means the call was skipped for that reason.
    pub fn prioritize_job(
        &self,
        organization: &str,
        job_id: &str,
        priority: i64,
    ) -> Result<Option<bool>, ApiError> {
        if self.get_job_statuses(job_id)?.is_empty() {
            return Ok(None);
        }

        let url = format!(
            "{}/api/v2/organizations/{}/job-prioritization/",
            self.base_url, organization
        );
        let body = serde_json::json!({ "job": job_id, "priority": priority });
        let response = self.http.post(url).json(&body).send()?.error_for_status()?;
        let echo: PriorityEcho = response.json()?;
        Ok(Some(echo.priority == priority))
    }

    /// Success is detected by substring containment of the project id in
    /// the raw response body; the service has never guaranteed a
    /// structured field for it, so the check stays deliberately loose.
    pub fn assign_project(
        &self,
        organization: &str,
        job_id: &str,
        project_id: &str,
    ) -> Result<bool, ApiError> {
        let url = format!(
            "{}/api/v2/organizations/{}/jobs/{}/project-assignment/",
            self.base_url, organization, job_id
        );
        let body = serde_json::json!({ "projectId": project_id });
        let response = self.http.post(url).json(&body).send()?.error_for_status()?;
        Ok(response.text()?.contains(project_id))
    }

    /// Walk the paginated file listing to exhaustion. Returns `None` when
    /// the accumulated listing disagrees with the server-reported count.
    pub fn get_all_files(&self, job_id: &str) -> Result<Option<Vec<RemoteFile>>, ApiError> {
        let mut files: Vec<RemoteFile> = Vec::new();
        let mut url = format!("{}/api/v2/jobs/{}/files/", self.base_url, job_id);

        loop {
            let response = self.http.get(url.as_str()).send()?.error_for_status()?;
            let FilePage { results, next, count } = response.json()?;
            files.extend(results);

            match next {
                Some(next_url) => url = next_url,
                None => {
                    if files.len() == count {
                        return Ok(Some(files));
                    }
                    warn!(
                        "File listing for {job_id} returned {} entries, server reported {count}",
                        files.len()
                    );
                    return Ok(None);
                }
            }
        }
    }

    /// Upload a batch of files, dispatching to the transfer tool when it
    /// is installed and to HTTP multipart otherwise.
    pub fn upload_files(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError> {
        match &self.transfer_tool {
            Some(program) => CliTransfer {
                base_url: &self.base_url,
                token: &self.token,
                program,
            }
            .upload(files, want_ids),
            None => HttpTransfer {
                base_url: &self.base_url,
                http: &self.http,
            }
            .upload(files, want_ids),
        }
    }

    pub fn upload_file(&self, file: &Path, want_ids: bool) -> Result<Upload, ApiError> {
        let files = [file.to_path_buf()];
        self.upload_files(&files, want_ids)
    }

    /// Download one file, verifying the destination size exactly matches.
    /// The transfer tool is only worth its startup cost for large files.
    pub fn download_file(
        &self,
        file_id: &str,
        dest_dir: &Path,
        file_name: &str,
        expected_size: u64,
    ) -> Result<bool, ApiError> {
        match &self.transfer_tool {
            Some(program) if expected_size > CLI_DOWNLOAD_THRESHOLD => CliTransfer {
                base_url: &self.base_url,
                token: &self.token,
                program,
            }
            .download(file_id, dest_dir, file_name, expected_size),
            _ => HttpTransfer {
                base_url: &self.base_url,
                http: &self.http,
            }
            .download(file_id, dest_dir, file_name, expected_size),
        }
    }
}

/// True iff at least one status entry matches
fn has_status(statuses: &[JobStatus], wanted: &str) -> bool {
    statuses.iter().any(|entry| entry.status == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(name: &str) -> JobStatus {
        serde_json::from_value(json!({"status": name})).expect("status entry")
    }

    #[test]
    fn job_is_started_when_any_entry_says_so() {
        let statuses = vec![status("Queued"), status("Started"), status("Validated")];
        assert!(has_status(&statuses, "Started"));
        assert!(!has_status(&statuses, "Completed"));
    }

    #[test]
    fn no_entries_means_nothing_matches() {
        assert!(!has_status(&[], "Started"));
    }
}
