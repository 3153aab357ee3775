use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::job::spec::{
    Analysis, Feature, FeatureSet, Hardware, InputFile, JobAnalysis, JobSpec, LicenseSettings,
};

/// Hardware tiers offered to the caller
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum CoreType {
    Hematite,
    Natrolite,
}

impl CoreType {
    /// physical cores on one node of this tier
    pub fn cores_per_node(&self) -> u32 {
        match self {
            CoreType::Hematite => 64,
            CoreType::Natrolite => 96,
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CoreType::Hematite => write!(f, "hematite"),
            CoreType::Natrolite => write!(f, "natrolite"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    /// the caller picked a core type no profile covers
    #[error("Invalid coretype: {0}")]
    InvalidProfile(String),
    #[error("can't render command template: {0}")]
    Render(#[from] tinytemplate::error::Error),
    #[error("can't load license settings at {path}: {reason}")]
    LicenseConfig { path: String, reason: String },
}

/// Everything a profile needs to assemble a job payload
#[derive(Debug)]
pub struct SpecInputs<'a> {
    pub file_ids: &'a [String],
    pub macro_file: &'a str,
    pub sim_file: &'a str,
    pub job_name: &'a str,
    pub software: &'a str,
    pub version: &'a str,
    pub license_server: &'a str,
    pub core_type: &'a str,
    pub cores_per_slot: u32,
    pub slots: &'a str,
    pub walltime: &'a str,
    pub project_code: &'a str,
}

/// A profile pairs a core type with a command template and the
/// environment variables injected into the job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Profile {
    Hematite,
    Natrolite,
    /// internal profile for license smoke tests
    Test,
}

impl Profile {
    /// Map the caller's core-type selection onto a profile
    pub fn for_core_type(core_type: &str, test_mode: bool) -> Result<Profile, ProfileError> {
        if test_mode {
            return Ok(Profile::Test);
        }
        match core_type {
            "hematite" => Ok(Profile::Hematite),
            "natrolite" => Ok(Profile::Natrolite),
            other => Err(ProfileError::InvalidProfile(other.to_string())),
        }
    }

    pub fn build(&self, inputs: &SpecInputs) -> Result<JobSpec, ProfileError> {
        /// included command templates, one per profile
        static HEMATITE: &str =
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/hematite.txt"));
        static NATROLITE: &str =
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/natrolite.txt"));
        static TEST: &str =
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/test.txt"));

        match self {
            Profile::Hematite => build_production(inputs, HEMATITE),
            Profile::Natrolite => build_production(inputs, NATROLITE),
            Profile::Test => build_test(inputs, TEST),
        }
    }
}

/// Rendering context for a command template
#[derive(Serialize)]
struct CommandContext {
    macro_file: String,
    sim_file: String,
}

/// Render the profile's shell command using TinyTemplate.
///
/// The run timestamp and run-id variables stay shell constructs in the
/// rendered script; only the filenames are substituted here.
fn render_command(template: &'static str, inputs: &SpecInputs) -> Result<String, ProfileError> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("command", template)?;

    let context = CommandContext {
        macro_file: inputs.macro_file.to_string(),
        sim_file: inputs.sim_file.to_string(),
    };
    let rendered = tt.render("command", &context)?;
    Ok(rendered.trim_end().to_string())
}

fn build_production(inputs: &SpecInputs, template: &'static str) -> Result<JobSpec, ProfileError> {
    let command = render_command(template, inputs)?;

    let mut env_vars = BTreeMap::new();
    env_vars.insert(
        "CDLMD_LICENSE_FILE".to_string(),
        inputs.license_server.to_string(),
    );

    let license = LicenseSettings {
        feature_sets: vec![FeatureSet {
            name: "USER_SPECIFIED".to_string(),
            features: vec![Feature {
                name: "ccmppower".to_string(),
                count: "1".to_string(),
            }],
        }],
    };

    Ok(assemble(inputs, command, env_vars, Some(license)))
}

fn build_test(inputs: &SpecInputs, template: &'static str) -> Result<JobSpec, ProfileError> {
    let starccmp = load_starccmp_config()?;
    let command = render_command(template, inputs)?;

    let mut env_vars = BTreeMap::new();
    env_vars.insert("CDLMD_LICENSE_FILE".to_string(), starccmp.cdlmd_license_file);
    env_vars.insert("LM_PROJECT".to_string(), starccmp.lm_project);

    // test jobs carry no user-defined license settings
    Ok(assemble(inputs, command, env_vars, None))
}

fn assemble(
    inputs: &SpecInputs,
    command: String,
    env_vars: BTreeMap<String, String>,
    license: Option<LicenseSettings>,
) -> JobSpec {
    JobSpec {
        is_low_priority: false,
        name: inputs.job_name.to_string(),
        jobanalyses: vec![JobAnalysis {
            env_vars,
            use_rescale_license: "false".to_string(),
            on_demand_license_seller: String::new(),
            user_defined_license_settings: license,
            command,
            analysis: Analysis {
                code: inputs.software.to_string(),
                version: inputs.version.to_string(),
            },
            hardware: Hardware {
                cores_per_slot: inputs.cores_per_slot,
                walltime: inputs.walltime.to_string(),
                slots: inputs.slots.to_string(),
                core_type: inputs.core_type.to_string(),
            },
            input_files: inputs
                .file_ids
                .iter()
                .map(|id| InputFile { id: id.clone() })
                .collect(),
        }],
        project_id: inputs.project_code.to_string(),
    }
}

/// License details for internal test jobs, kept outside the repository
/// in the user's own configuration directory.
#[derive(Debug, Deserialize)]
struct StarccmpConfig {
    #[serde(rename = "CDLMD_LICENSE_FILE")]
    cdlmd_license_file: String,
    #[serde(rename = "LM_PROJECT")]
    lm_project: String,
}

fn load_starccmp_config() -> Result<StarccmpConfig, ProfileError> {
    let path = starccmp_config_path();
    let raw = fs::read_to_string(&path).map_err(|err| ProfileError::LicenseConfig {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|err| ProfileError::LicenseConfig {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

/// `STARCCMP_CONFIG` overrides the default location, for test harnesses
fn starccmp_config_path() -> PathBuf {
    match env::var_os("STARCCMP_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => dirs::home_dir()
            .unwrap_or_default()
            .join(".config/rescale/starccmp.json"),
    }
}
