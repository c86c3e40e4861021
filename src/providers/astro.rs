//! Seam over the astrology provider so handlers can be exercised against a
//! scripted double, mirroring how [`ChatModel`](super::ChatModel) decouples
//! the chat endpoints from the hosted LLM.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait AstroProvider: Send + Sync {
    /// Natal chart summary; the flag reports whether the advanced tier
    /// answered.
    async fn kundli(
        &self,
        coordinates: &str,
        datetime: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<(Value, bool)>;

    async fn divisional(
        &self,
        coordinates: &str,
        datetime: &str,
        chart_type: &str,
        ayanamsa: i64,
        la: &str,
    ) -> Result<Value>;

    async fn transit(&self, coordinates: &str, datetime: &str, ayanamsa: i64) -> Result<Value>;

    async fn shadbala_pdf(
        &self,
        name: &str,
        gender: &str,
        coordinates: &str,
        datetime: &str,
        place: &str,
        la: &str,
    ) -> Result<Vec<u8>>;
}

/// Test double returning canned payloads. Chart types listed in
/// `fail_charts` error out the way an upstream refusal would, which is how
/// tests exercise the per-chart degradation paths.
pub struct ScriptedAstro {
    pub kundli: Value,
    pub advanced: bool,
    pub divisional: Value,
    pub transit: Value,
    pub fail_charts: Vec<String>,
    pub shadbala: Option<Vec<u8>>,
}

impl Default for ScriptedAstro {
    fn default() -> Self {
        Self {
            kundli: json!({ "data": {} }),
            advanced: true,
            divisional: json!({ "data": { "divisional_positions": [] } }),
            transit: json!({ "data": { "planet_position": [] } }),
            fail_charts: Vec::new(),
            shadbala: None,
        }
    }
}

#[async_trait]
impl AstroProvider for ScriptedAstro {
    async fn kundli(
        &self,
        _coordinates: &str,
        _datetime: &str,
        _ayanamsa: i64,
        _la: &str,
    ) -> Result<(Value, bool)> {
        Ok((self.kundli.clone(), self.advanced))
    }

    async fn divisional(
        &self,
        _coordinates: &str,
        _datetime: &str,
        chart_type: &str,
        _ayanamsa: i64,
        _la: &str,
    ) -> Result<Value> {
        if self.fail_charts.iter().any(|c| c == chart_type) {
            anyhow::bail!("{} chart unavailable", chart_type);
        }
        Ok(self.divisional.clone())
    }

    async fn transit(&self, _coordinates: &str, _datetime: &str, _ayanamsa: i64) -> Result<Value> {
        Ok(self.transit.clone())
    }

    async fn shadbala_pdf(
        &self,
        _name: &str,
        _gender: &str,
        _coordinates: &str,
        _datetime: &str,
        _place: &str,
        _la: &str,
    ) -> Result<Vec<u8>> {
        self.shadbala
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no report available"))
    }
}
