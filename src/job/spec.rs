use std::collections::BTreeMap;

use serde::Serialize;

/// Payload for the job-creation endpoint.
///
/// Field names and value types follow the wire format of the service,
/// including its string-typed `slots`, `walltime`, and license flags.
/// Built fresh per submission and immutable once assembled.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub is_low_priority: bool,
    pub name: String,
    pub jobanalyses: Vec<JobAnalysis>,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAnalysis {
    pub env_vars: BTreeMap<String, String>,
    /// the service expects a string here, not a boolean
    pub use_rescale_license: String,
    pub on_demand_license_seller: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_defined_license_settings: Option<LicenseSettings>,
    pub command: String,
    pub analysis: Analysis,
    pub hardware: Hardware,
    pub input_files: Vec<InputFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub code: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    pub cores_per_slot: u32,
    /// hours, as a string on the wire
    pub walltime: String,
    pub slots: String,
    pub core_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFile {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSettings {
    pub feature_sets: Vec<FeatureSet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureSet {
    pub name: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    pub name: String,
    pub count: String,
}
