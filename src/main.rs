use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use autopilot::api::client::RescaleApi;
use autopilot::config::{self, Settings};
use autopilot::job::profile::CoreType;
use autopilot::worker::queue::SerialQueue;
use autopilot::worker::{Mode, Outcome, SubmitRequest, SubmitWorker};

#[derive(Parser)]
#[command(
    name = "autopilot",
    about = "Submit STAR-CCM+ batch jobs to the Rescale platform",
    version
)]
struct Cli {
    /// configuration record with API credentials and license settings
    #[arg(long, default_value = "config_miscellaneous.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload each case directory and submit it as one batch job
    Submit {
        #[arg(long, value_enum, default_value_t = CoreType::Hematite)]
        coretype: CoreType,
        /// analysis version code, e.g. 15.02.009-r8
        #[arg(long)]
        version_code: String,
        /// nodes allocated per job
        #[arg(long, default_value_t = 3)]
        nodes: u32,
        /// walltime limit in hours
        #[arg(long, default_value = "72")]
        walltime: String,
        /// submit with the internal test profile, pinned to this project
        #[arg(long)]
        test_project: Option<String>,
        /// case directories, each holding one .sim and one .java file
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Report job- and run-level status
    Status {
        job_id: String,
        /// run index to probe
        #[arg(long, default_value_t = 1)]
        run: u32,
    },
    /// Download every file of a job, verifying sizes
    Fetch {
        job_id: String,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
    /// Move a job up or down within an organization's queue
    Prioritize {
        job_id: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        priority: i64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let settings = config::load(&cli.config)?;

    match cli.command {
        Command::Submit {
            coretype,
            version_code,
            nodes,
            walltime,
            test_project,
            dirs,
        } => submit(settings, coretype, version_code, nodes, walltime, test_project, &dirs),
        Command::Status { job_id, run } => status(&settings, &job_id, run),
        Command::Fetch { job_id, dest } => fetch(&settings, &job_id, &dest),
        Command::Prioritize { job_id, org, priority } => {
            prioritize(&settings, &job_id, &org, priority)
        }
    }
}

fn submit(
    settings: Settings,
    coretype: CoreType,
    version_code: String,
    nodes: u32,
    walltime: String,
    test_project: Option<String>,
    dirs: &[PathBuf],
) -> Result<()> {
    let mode = match test_project {
        Some(project_id) => Mode::Test { project_id },
        None => Mode::Release,
    };

    let (log_tx, log_rx) = channel::<String>();
    let (outcome_tx, outcome_rx) = channel::<Outcome>();

    // submissions run in the background; this thread keeps printing
    let printer = thread::spawn(move || {
        for line in log_rx {
            println!("{line}");
        }
    });

    let queue = SerialQueue::new();
    let mut queued = 0;
    for dir in dirs {
        let case = match scan_case_dir(dir) {
            Ok(case) => case,
            Err(err) => {
                warn!("Skipping {}: {err}", dir.display());
                continue;
            }
        };

        let request = SubmitRequest {
            core_type: coretype.to_string(),
            version: version_code.clone(),
            ncores: nodes * coretype.cores_per_node(),
            walltime: walltime.clone(),
            file_paths: case.upload_paths,
            macro_file: case.macro_file,
            sim_file: case.sim_file,
        };
        let mut worker = SubmitWorker::new(
            settings.clone(),
            mode.clone(),
            request,
            log_tx.clone(),
            outcome_tx.clone(),
        );
        queue.enqueue(move || worker.run());
        queued += 1;
    }
    drop(log_tx);
    drop(outcome_tx);

    if queued == 0 {
        queue.join();
        let _ = printer.join();
        bail!("no submittable case directory was given");
    }
    info!("Queued {queued} submissions");

    let mut failures = 0;
    for _ in 0..queued {
        match outcome_rx.recv() {
            Ok(Outcome::Finished { message }) => info!("{message}"),
            Ok(Outcome::Failed { kind, message }) => {
                error!("{kind}: {message}");
                failures += 1;
            }
            Err(_) => break,
        }
    }

    queue.join();
    let _ = printer.join();

    if failures > 0 {
        bail!("{failures} of {queued} submissions failed");
    }
    Ok(())
}

struct CaseDir {
    upload_paths: Vec<PathBuf>,
    macro_file: String,
    sim_file: String,
}

/// A submittable case directory holds exactly one simulation file and
/// exactly one macro; the macro is uploaded first, the simulation last.
fn scan_case_dir(dir: &Path) -> Result<CaseDir> {
    let mut sim_files = Vec::new();
    let mut macro_files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("can't read {}", dir.display()))? {
        let path = entry?.path();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("sim") => sim_files.push(path),
            Some("java") => macro_files.push(path),
            _ => {}
        }
    }

    let sim = match sim_files.as_slice() {
        [sim] => sim.clone(),
        [] => bail!("no .sim file found"),
        _ => bail!("more than one .sim file found"),
    };
    let macro_path = match macro_files.as_slice() {
        [macro_path] => macro_path.clone(),
        [] => bail!("no .java macro found"),
        _ => bail!("more than one .java macro found"),
    };

    Ok(CaseDir {
        upload_paths: vec![macro_path.clone(), sim.clone()],
        macro_file: file_name(&macro_path)?,
        sim_file: file_name(&sim)?,
    })
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .with_context(|| format!("unusable file name: {}", path.display()))
}

fn status(settings: &Settings, job_id: &str, run: u32) -> Result<()> {
    let api = RescaleApi::new(settings)?;

    let started = api.is_job_started(job_id)?;
    let completed = api.is_job_completed(job_id)?;
    println!("job {job_id}: started={started} completed={completed}");

    let run_started = api.is_run_started(job_id, run)?;
    let run_completed = api.is_run_completed(job_id, run)?;
    println!("run {run}: started: {run_started}, completed: {run_completed}");
    Ok(())
}

fn fetch(settings: &Settings, job_id: &str, dest: &Path) -> Result<()> {
    let api = RescaleApi::new(settings)?;

    let files = match api.get_all_files(job_id)? {
        Some(files) => files,
        None => bail!("file listing for {job_id} is inconsistent, try again"),
    };
    info!("Downloading {} files to {}", files.len(), dest.display());

    let mut failures = 0;
    for file in &files {
        println!("Downloading {}", file.name);
        if !api.download_file(&file.id, dest, &file.name, file.size)? {
            warn!("Download of {} failed size verification", file.name);
            failures += 1;
        }
    }
    if failures > 0 {
        bail!("{failures} of {} downloads failed", files.len());
    }
    Ok(())
}

fn prioritize(settings: &Settings, job_id: &str, org: &str, priority: i64) -> Result<()> {
    let api = RescaleApi::new(settings)?;

    match api.prioritize_job(org, job_id, priority)? {
        None => println!("job {job_id} has no statuses yet, prioritization not attempted"),
        Some(true) => println!("job {job_id} prioritized at {priority}"),
        Some(false) => bail!("service did not accept priority {priority} for job {job_id}"),
    }
    Ok(())
}
