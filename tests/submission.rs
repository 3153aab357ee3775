//! Drive the submission pipeline end to end against a scripted service
//! double: two case directories queued behind one another, a shared log
//! channel read on the caller's side, and structured outcomes.

use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};

use autopilot::api::transfer::Upload;
use autopilot::api::ApiError;
use autopilot::config::Settings;
use autopilot::job::spec::JobSpec;
use autopilot::worker::queue::SerialQueue;
use autopilot::worker::{Mode, Outcome, SubmitApi, SubmitRequest, SubmitWorker};

/// Service double that hands out scripted ids and records every payload
struct ScriptedApi {
    ids: Vec<String>,
    job_id: String,
    specs: Arc<Mutex<Vec<JobSpec>>>,
}

impl SubmitApi for ScriptedApi {
    fn upload_files(&self, _files: &[PathBuf], _want_ids: bool) -> Result<Upload, ApiError> {
        Ok(Upload::Ids(self.ids.clone()))
    }

    fn create_job(&self, spec: &JobSpec) -> Result<String, ApiError> {
        self.specs.lock().unwrap().push(spec.clone());
        Ok(self.job_id.clone())
    }

    fn assign_project(
        &self,
        _organization: &str,
        _job_id: &str,
        _project_id: &str,
    ) -> Result<bool, ApiError> {
        Ok(true)
    }

    fn submit_job(&self, _job_id: &str) -> Result<bool, ApiError> {
        Ok(true)
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

fn request(case: &str, sim: &str, java: &str) -> SubmitRequest {
    SubmitRequest {
        core_type: "hematite".to_string(),
        version: "15.02.009".to_string(),
        ncores: 192,
        walltime: "72".to_string(),
        file_paths: vec![
            PathBuf::from(format!("{case}/{java}")),
            PathBuf::from(format!("{case}/{sim}")),
        ],
        macro_file: java.to_string(),
        sim_file: sim.to_string(),
    }
}

#[test]
fn queued_submissions_run_serially_and_finish() {
    let (log_tx, log_rx) = channel::<String>();
    let (outcome_tx, outcome_rx) = channel::<Outcome>();
    let specs = Arc::new(Mutex::new(Vec::new()));

    let queue = SerialQueue::new();
    for (case, sim, java, job_id) in [
        ("case1", "run1.sim", "run1.java", "J1"),
        ("case2", "run2.sim", "run2.java", "J2"),
    ] {
        let api = ScriptedApi {
            ids: vec!["10".to_string(), "11".to_string()],
            job_id: job_id.to_string(),
            specs: Arc::clone(&specs),
        };
        let mut worker = SubmitWorker::new(
            settings(),
            Mode::Release,
            request(case, sim, java),
            log_tx.clone(),
            outcome_tx.clone(),
        );
        queue.enqueue(move || worker.run_with(&api));
    }
    drop(log_tx);
    drop(outcome_tx);
    queue.join();

    // both submissions finished, in queue order
    let outcomes: Vec<Outcome> = outcome_rx.try_iter().collect();
    assert_eq!(outcomes.len(), 2);
    match &outcomes[0] {
        Outcome::Finished { message } => assert!(message.contains("J1")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    match &outcomes[1] {
        Outcome::Finished { message } => assert!(message.contains("J2")),
        other => panic!("unexpected outcome: {other:?}"),
    }

    // the first job's terminal log line precedes the second job's first
    let lines: Vec<String> = log_rx.try_iter().collect();
    assert_eq!(lines.len(), 8);
    assert!(lines[0].contains("run1.java"));
    assert!(lines[3].contains("Job ID: J1"));
    assert!(lines[4].contains("run2.java"));
    assert!(lines[7].contains("Job ID: J2"));

    // both payloads embedded the uploaded ids and the selected tier
    let specs = specs.lock().unwrap();
    assert_eq!(specs.len(), 2);
    for spec in specs.iter() {
        let analysis = &spec.jobanalyses[0];
        let ids: Vec<&str> = analysis.input_files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "11"]);
        assert_eq!(analysis.hardware.core_type, "hematite");
    }
    assert_eq!(specs[0].name, "run1");
    assert_eq!(specs[1].name, "run2");
}
