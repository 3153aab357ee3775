//! End-to-end orchestration of one job submission.
//!
//! A worker uploads the case's input files, builds the job payload for
//! the selected profile, creates and submits the job, and reports the
//! outcome. Log lines flow through a text channel shared across all
//! submissions; terminal outcomes through a second, structured channel.
//! Failures are terminal, nothing is retried, and nothing escapes the
//! worker as a panic.

/// Single-slot queue the workers drain on
pub mod queue;

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use log::{debug, warn};

use crate::api::client::RescaleApi;
use crate::api::transfer::Upload;
use crate::api::ApiError;
use crate::config::Settings;
use crate::job::profile::{Profile, ProfileError, SpecInputs};
use crate::job::spec::JobSpec;

/// Release submissions use the production profiles; test submissions use
/// the internal test profile and are pinned to a project after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Release,
    Test { project_id: String },
}

/// Caller-validated selections for one submission
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub core_type: String,
    pub version: String,
    /// total cores across all nodes; becomes `coresPerSlot`
    pub ncores: u32,
    /// walltime limit in hours
    pub walltime: String,
    /// ordered upload list: macro files first, then the simulation file
    pub file_paths: Vec<PathBuf>,
    pub macro_file: String,
    pub sim_file: String,
}

/// Classification attached to every failure on the outcome channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RequestFailed,
    ProcessFailed,
    SizeMismatch,
    UploadError,
    SubmissionError,
    InvalidProfile,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Terminal signal for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished { message: String },
    Failed { kind: ErrorKind, message: String },
}

/// Submission lifecycle; failures are terminal, nothing moves backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Uploading,
    Submitting,
    Finished,
    Failed,
}

/// The worker-side view of the API: exactly the calls one submission
/// makes, so tests can stand in a double.
pub trait SubmitApi {
    fn upload_files(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError>;
    fn create_job(&self, spec: &JobSpec) -> Result<String, ApiError>;
    fn assign_project(
        &self,
        organization: &str,
        job_id: &str,
        project_id: &str,
    ) -> Result<bool, ApiError>;
    fn submit_job(&self, job_id: &str) -> Result<bool, ApiError>;
}

impl SubmitApi for RescaleApi {
    fn upload_files(&self, files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError> {
        RescaleApi::upload_files(self, files, want_ids)
    }

    fn create_job(&self, spec: &JobSpec) -> Result<String, ApiError> {
        RescaleApi::create_job(self, spec)
    }

    fn assign_project(
        &self,
        organization: &str,
        job_id: &str,
        project_id: &str,
    ) -> Result<bool, ApiError> {
        RescaleApi::assign_project(self, organization, job_id, project_id)
    }

    fn submit_job(&self, job_id: &str) -> Result<bool, ApiError> {
        RescaleApi::submit_job(self, job_id)
    }
}

pub struct SubmitWorker {
    settings: Settings,
    mode: Mode,
    request: SubmitRequest,
    log: Sender<String>,
    outcomes: Sender<Outcome>,
    state: State,
}

impl SubmitWorker {
    pub fn new(
        settings: Settings,
        mode: Mode,
        request: SubmitRequest,
        log: Sender<String>,
        outcomes: Sender<Outcome>,
    ) -> SubmitWorker {
        SubmitWorker {
            settings,
            mode,
            request,
            log,
            outcomes,
            state: State::Created,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Run against a fresh client. Every failure ends up on the outcome
    /// channel; nothing propagates out of the worker.
    pub fn run(&mut self) {
        match RescaleApi::new(&self.settings) {
            Ok(api) => self.run_with(&api),
            Err(err) => self.fail(
                ErrorKind::RequestFailed,
                format!("Can't construct API client: {err}"),
            ),
        }
    }

    pub fn run_with(&mut self, api: &dyn SubmitApi) {
        let mode = self.mode.clone();
        let request = self.request.clone();

        // resolve the profile before anything touches the network
        let test_mode = matches!(mode, Mode::Test { .. });
        let profile = match Profile::for_core_type(&request.core_type, test_mode) {
            Ok(profile) => profile,
            Err(err) => {
                self.emit(format!("Error in job submission: {err}"));
                return self.fail(ErrorKind::InvalidProfile, err.to_string());
            }
        };

        let file_ids = match self.upload(api, &request) {
            Some(ids) => ids,
            None => return,
        };

        self.submit(api, &mode, &request, profile, &file_ids);
    }

    fn upload(&mut self, api: &dyn SubmitApi, request: &SubmitRequest) -> Option<Vec<String>> {
        self.state = State::Uploading;
        let first = request
            .file_paths
            .first()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        self.emit(format!("Uploading {first} and related files"));

        let ids = match api.upload_files(&request.file_paths, true) {
            Ok(upload) => upload.ids(),
            Err(err) => {
                self.emit(format!("Error during upload: {err}"));
                self.fail(api_kind(&err), err.to_string());
                return None;
            }
        };

        if ids.is_empty() {
            self.emit(format!("Upload failed: {first} and related files"));
            self.fail(
                ErrorKind::UploadError,
                format!("Failed to upload {first} and related files"),
            );
            return None;
        }

        self.emit(format!("Upload successful: {first} and related files"));
        Some(ids)
    }

    fn submit(
        &mut self,
        api: &dyn SubmitApi,
        mode: &Mode,
        request: &SubmitRequest,
        profile: Profile,
        file_ids: &[String],
    ) {
        self.state = State::Submitting;
        self.emit(format!("Submitting job {}", request.sim_file));

        // job name is the simulation filename up to its first dot
        let job_name = request
            .sim_file
            .split('.')
            .next()
            .unwrap_or(&request.sim_file);

        let inputs = SpecInputs {
            file_ids,
            macro_file: &request.macro_file,
            sim_file: &request.sim_file,
            job_name,
            software: &self.settings.software,
            version: &request.version,
            license_server: &self.settings.license_server,
            core_type: &request.core_type,
            cores_per_slot: request.ncores,
            slots: "1",
            walltime: &request.walltime,
            project_code: &self.settings.project_code,
        };
        let spec = match profile.build(&inputs) {
            Ok(spec) => spec,
            Err(err) => {
                self.emit(format!("Error in job submission: {err}"));
                return self.fail(profile_kind(&err), err.to_string());
            }
        };

        let job_id = match api.create_job(&spec) {
            Ok(id) => id,
            Err(err) => {
                self.emit(format!("Error in job submission: {err}"));
                return self.fail(api_kind(&err), err.to_string());
            }
        };

        if let Mode::Test { project_id } = mode {
            match api.assign_project("rescale", &job_id, project_id) {
                Ok(true) => {}
                Ok(false) => {
                    let message = format!("Failed to assign project: {project_id}");
                    self.emit(format!("Error in job submission: {message}"));
                    return self.fail(ErrorKind::SubmissionError, message);
                }
                Err(err) => {
                    self.emit(format!("Error in job submission: {err}"));
                    return self.fail(api_kind(&err), err.to_string());
                }
            }
        }

        match api.submit_job(&job_id) {
            Ok(true) => {
                self.emit(format!("The job is submitted successfully (Job ID: {job_id})"));
                self.state = State::Finished;
                let _ = self.outcomes.send(Outcome::Finished {
                    message: format!("Done to submit the job(JOB ID: {job_id})."),
                });
            }
            Ok(false) => {
                let message = format!("Failed to submit the job: {job_id}");
                self.emit(format!("Error in job submission: {message}"));
                self.fail(ErrorKind::SubmissionError, message);
            }
            Err(err) => {
                self.emit(format!("Error in job submission: {err}"));
                self.fail(api_kind(&err), err.to_string());
            }
        }
    }

    /// Deliver one log line in emission order; the channel is the user's
    /// view, the log crate keeps a diagnostic copy.
    fn emit(&self, line: String) {
        debug!("{line}");
        let _ = self.log.send(line);
    }

    fn fail(&mut self, kind: ErrorKind, message: String) {
        self.state = State::Failed;
        warn!("Submission failed ({kind}): {message}");
        let _ = self.outcomes.send(Outcome::Failed { kind, message });
    }
}

fn api_kind(err: &ApiError) -> ErrorKind {
    match err {
        ApiError::Request(_) | ApiError::Credential => ErrorKind::RequestFailed,
        ApiError::Process { .. } | ApiError::Spawn { .. } => ErrorKind::ProcessFailed,
        ApiError::Io(_) => ErrorKind::UploadError,
    }
}

fn profile_kind(err: &ProfileError) -> ErrorKind {
    match err {
        ProfileError::InvalidProfile(_) => ErrorKind::InvalidProfile,
        ProfileError::Render(_) | ProfileError::LicenseConfig { .. } => ErrorKind::ConfigError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::Write;
    use std::sync::mpsc::{channel, Receiver};

    struct MockApi {
        upload_ids: Option<Vec<String>>,
        assign_ok: bool,
        submit_ok: bool,
        upload_calls: Cell<u32>,
        create_calls: Cell<u32>,
        assign_calls: Cell<u32>,
        submit_calls: Cell<u32>,
        created_spec: RefCell<Option<JobSpec>>,
    }

    impl MockApi {
        fn with_ids(ids: Vec<String>) -> MockApi {
            MockApi {
                upload_ids: Some(ids),
                assign_ok: true,
                submit_ok: true,
                upload_calls: Cell::new(0),
                create_calls: Cell::new(0),
                assign_calls: Cell::new(0),
                submit_calls: Cell::new(0),
                created_spec: RefCell::new(None),
            }
        }

        fn failing_upload() -> MockApi {
            MockApi {
                upload_ids: None,
                ..MockApi::with_ids(Vec::new())
            }
        }
    }

    impl SubmitApi for MockApi {
        fn upload_files(&self, _files: &[PathBuf], want_ids: bool) -> Result<Upload, ApiError> {
            self.upload_calls.set(self.upload_calls.get() + 1);
            assert!(want_ids);
            match &self.upload_ids {
                Some(ids) => Ok(Upload::Ids(ids.clone())),
                None => Err(ApiError::Spawn {
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "rescale-cli"),
                }),
            }
        }

        fn create_job(&self, spec: &JobSpec) -> Result<String, ApiError> {
            self.create_calls.set(self.create_calls.get() + 1);
            *self.created_spec.borrow_mut() = Some(spec.clone());
            Ok("J1".to_string())
        }

        fn assign_project(
            &self,
            organization: &str,
            job_id: &str,
            _project_id: &str,
        ) -> Result<bool, ApiError> {
            self.assign_calls.set(self.assign_calls.get() + 1);
            assert_eq!(organization, "rescale");
            assert_eq!(job_id, "J1");
            Ok(self.assign_ok)
        }

        fn submit_job(&self, job_id: &str) -> Result<bool, ApiError> {
            self.submit_calls.set(self.submit_calls.get() + 1);
            assert_eq!(job_id, "J1");
            Ok(self.submit_ok)
        }
    }

    fn settings() -> Settings {
        Settings {
            api_base_url: "https://x.test".to_string(),
            api_key: "k".to_string(),
            license_server: "27000@host".to_string(),
            project_code: "P1".to_string(),
            software: "starccmp+".to_string(),
        }
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            core_type: "hematite".to_string(),
            version: "15.02.009".to_string(),
            ncores: 192,
            walltime: "72".to_string(),
            file_paths: vec![PathBuf::from("case/run.sim"), PathBuf::from("case/run.java")],
            macro_file: "run.java".to_string(),
            sim_file: "run.sim".to_string(),
        }
    }

    fn worker(mode: Mode, request: SubmitRequest) -> (SubmitWorker, Receiver<String>, Receiver<Outcome>) {
        let (log_tx, log_rx) = channel();
        let (outcome_tx, outcome_rx) = channel();
        let worker = SubmitWorker::new(settings(), mode, request, log_tx, outcome_tx);
        (worker, log_rx, outcome_rx)
    }

    fn failed_kind(outcome: Outcome) -> ErrorKind {
        match outcome {
            Outcome::Failed { kind, .. } => kind,
            Outcome::Finished { message } => panic!("unexpected success: {message}"),
        }
    }

    /// Point the test profile at a throwaway license file
    fn stub_starccmp_config() {
        let path = std::env::temp_dir().join("autopilot-starccmp-test.json");
        let mut file = fs_file(&path);
        file.write_all(br#"{"CDLMD_LICENSE_FILE": "29000@lic.test", "LM_PROJECT": "LMP"}"#)
            .expect("written");
        std::env::set_var("STARCCMP_CONFIG", &path);
    }

    fn fs_file(path: &std::path::Path) -> std::fs::File {
        std::fs::File::create(path).expect("license stub")
    }

    #[test]
    fn finished_outcome_carries_the_job_id() {
        let (mut worker, log_rx, outcome_rx) = worker(Mode::Release, request());
        let api = MockApi::with_ids(vec!["10".to_string(), "11".to_string()]);
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Finished);
        match outcome_rx.try_recv().expect("outcome") {
            Outcome::Finished { message } => assert!(message.contains("J1")),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let spec = api.created_spec.borrow().clone().expect("spec created");
        let ids: Vec<&str> = spec.jobanalyses[0]
            .input_files
            .iter()
            .map(|file| file.id.as_str())
            .collect();
        assert_eq!(ids, vec!["10", "11"]);
        assert_eq!(spec.jobanalyses[0].hardware.core_type, "hematite");
        assert_eq!(spec.jobanalyses[0].hardware.cores_per_slot, 192);
        assert_eq!(spec.name, "run");
        assert_eq!(api.assign_calls.get(), 0);

        let lines: Vec<String> = log_rx.try_iter().collect();
        assert!(lines.first().expect("log lines").starts_with("Uploading"));
        assert!(lines.last().expect("log lines").contains("Job ID: J1"));
    }

    #[test]
    fn invalid_core_type_fails_before_any_call() {
        let mut bad = request();
        bad.core_type = "granite".to_string();
        let (mut worker, _log_rx, outcome_rx) = worker(Mode::Release, bad);
        let api = MockApi::with_ids(vec!["10".to_string()]);
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Failed);
        assert_eq!(
            failed_kind(outcome_rx.try_recv().expect("outcome")),
            ErrorKind::InvalidProfile
        );
        assert_eq!(api.upload_calls.get(), 0);
        assert_eq!(api.create_calls.get(), 0);
    }

    #[test]
    fn empty_upload_is_an_upload_error() {
        let (mut worker, log_rx, outcome_rx) = worker(Mode::Release, request());
        let api = MockApi::with_ids(Vec::new());
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Failed);
        match outcome_rx.try_recv().expect("outcome") {
            Outcome::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::UploadError);
                assert!(message.contains("case/run.sim"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.create_calls.get(), 0);
        assert_eq!(api.submit_calls.get(), 0);

        let lines: Vec<String> = log_rx.try_iter().collect();
        assert!(lines.iter().any(|line| line.starts_with("Upload failed")));
    }

    #[test]
    fn upload_process_failure_keeps_its_kind() {
        let (mut worker, _log_rx, outcome_rx) = worker(Mode::Release, request());
        let api = MockApi::failing_upload();
        worker.run_with(&api);

        assert_eq!(
            failed_kind(outcome_rx.try_recv().expect("outcome")),
            ErrorKind::ProcessFailed
        );
        assert_eq!(api.create_calls.get(), 0);
    }

    #[test]
    fn false_submit_is_a_submission_error() {
        let (mut worker, _log_rx, outcome_rx) = worker(Mode::Release, request());
        let mut api = MockApi::with_ids(vec!["10".to_string()]);
        api.submit_ok = false;
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Failed);
        match outcome_rx.try_recv().expect("outcome") {
            Outcome::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::SubmissionError);
                assert!(message.contains("J1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.submit_calls.get(), 1);
    }

    #[test]
    fn test_mode_assigns_the_project_before_submitting() {
        stub_starccmp_config();
        let mode = Mode::Test {
            project_id: "PRJ7".to_string(),
        };
        let (mut worker, _log_rx, outcome_rx) = worker(mode, request());
        let api = MockApi::with_ids(vec!["10".to_string()]);
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Finished);
        assert!(matches!(
            outcome_rx.try_recv().expect("outcome"),
            Outcome::Finished { .. }
        ));
        assert_eq!(api.assign_calls.get(), 1);
        assert_eq!(api.submit_calls.get(), 1);

        let spec = api.created_spec.borrow().clone().expect("spec created");
        assert_eq!(
            spec.jobanalyses[0].env_vars.get("LM_PROJECT"),
            Some(&"LMP".to_string())
        );
        assert!(spec.jobanalyses[0].user_defined_license_settings.is_none());
        assert!(spec.jobanalyses[0].command.contains("-batch run "));
    }

    #[test]
    fn failed_project_assignment_is_terminal() {
        stub_starccmp_config();
        let mode = Mode::Test {
            project_id: "PRJ7".to_string(),
        };
        let (mut worker, _log_rx, outcome_rx) = worker(mode, request());
        let mut api = MockApi::with_ids(vec!["10".to_string()]);
        api.assign_ok = false;
        worker.run_with(&api);

        assert_eq!(worker.state(), State::Failed);
        match outcome_rx.try_recv().expect("outcome") {
            Outcome::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::SubmissionError);
                assert!(message.contains("PRJ7"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.submit_calls.get(), 0);
    }
}
