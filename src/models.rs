use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Birth details as submitted by the front end.
///
/// Either `latitude`/`longitude` or a free-text `location` must be present;
/// the timezone offset is derived from the coordinates when not supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirthInput {
    /// YYYY-MM-DD
    pub date: String,
    /// HH:MM or HH:MM:SS
    pub time: String,
    /// Offset like +05:30; derived from location when missing
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Free-text place name, e.g. "City, Country"
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_ayanamsa")]
    pub ayanamsa: i64,
    #[serde(default = "default_language")]
    pub la: String,
}

fn default_ayanamsa() -> i64 {
    1 // Lahiri
}

fn default_language() -> String {
    "en".to_string()
}

impl BirthInput {
    /// HH:MM input normalized to HH:MM:SS
    pub fn normalized_time(&self) -> String {
        if self.time.split(':').count() == 3 {
            self.time.clone()
        } else {
            format!("{}:00", self.time)
        }
    }

    /// Full ISO-8601 datetime with offset, e.g. `1990-04-12T06:45:00+05:30`
    pub fn iso_datetime(&self) -> crate::errors::Result<String> {
        let tz = self
            .timezone
            .as_deref()
            .ok_or_else(|| crate::errors::AppError::BadRequest("timezone missing".to_string()))?;
        Ok(format!("{}T{}{}", self.date, self.normalized_time(), tz))
    }

    /// `lat,lon` pair in the upstream provider's format
    pub fn coordinates(&self) -> crate::errors::Result<String> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Ok(format!("{},{}", lat, lon)),
            _ => Err(crate::errors::AppError::BadRequest(
                "coordinates missing".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeRequest {
    pub birth: BirthInput,
    #[serde(default = "default_divisional")]
    pub include_divisional: Vec<String>,
    #[serde(default = "default_true")]
    pub include_transits: bool,
    /// ISO datetime for the transit snapshot; defaults to now
    #[serde(default)]
    pub transit_datetime: Option<String>,
}

fn default_divisional() -> Vec<String> {
    [
        "lagna",
        "navamsa",
        "drekkana",
        "chaturthamsa",
        "dasamsa",
        "saptamsa",
        "dwadasamsa",
        "shodasamsa",
        "vimsamsa",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

/// Pass-through cache of the upstream responses plus request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub kundli: Value,
    pub divisional: Map<String, Value>,
    #[serde(default)]
    pub transits: Option<Value>,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub provider: String,
    pub ayanamsa: i64,
    pub language: String,
    pub advanced: bool,
    pub birth: BirthEcho,
    pub effective_datetime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirthEcho {
    pub date: String,
    pub time: String,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub compute: ComputeResponse,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmAnalyzeResponse {
    pub analysis: String,
    pub rationale: Option<Value>,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<ComputeResponse>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub used_charts: Vec<String>,
    pub trace: Vec<String>,
    /// Number of refinement iterations the loop actually ran
    pub refinement: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartRequest {
    pub compute: ComputeResponse,
    pub chart_type: String,
    #[serde(default = "default_chart_style")]
    pub chart_style: String,
}

fn default_chart_style() -> String {
    "north-indian".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShadbalaRequest {
    #[serde(flatten)]
    pub birth: BirthInput,
    pub name: String,
    #[serde(default = "default_gender")]
    pub gender: String,
    #[serde(default)]
    pub place: Option<String>,
}

fn default_gender() -> String {
    "male".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub has_openai: bool,
    pub account_bound: bool,
    pub has_locationiq: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoResolveResponse {
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub offset: String,
    #[serde(rename = "timeZone")]
    pub time_zone: Option<String>,
}
