//! Location and timezone resolution with multi-provider fall-through.
//!
//! Providers are tried in a fixed priority order, each exactly once per
//! request: a keyed provider first when configured, then public fallbacks.
//! A provider failure (network error or non-2xx) falls through silently to
//! the next; an unresolved result is reported to the caller, never guessed.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const NOMINATIM_USER_AGENT: &str =
    "jyotish-api/0.1 (+https://github.com/jyotish-api; contact: admin@example.org)";

/// Format a UTC offset in seconds as `+HH:MM` / `-HH:MM`.
pub fn format_offset(seconds: i64) -> String {
    let sign = if seconds >= 0 { '+' } else { '-' };
    let sec = seconds.abs();
    format!("{}{:02}:{:02}", sign, sec / 3600, (sec % 3600) / 60)
}

#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: Option<String>,
    /// IANA zone id when the geocoder happens to return one (Open-Meteo does)
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedTimezone {
    pub time_zone: String,
    pub offset: String,
}

/// Wall-clock UTC offset of `tzid` at the given local date/time.
pub fn offset_from_tzid(date: &str, time: &str, tzid: &str) -> Option<String> {
    let t = if time.split(':').count() == 3 {
        time.to_string()
    } else {
        format!("{}:00", time)
    };
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(&t, "%H:%M:%S").ok()?;
    let naive = NaiveDateTime::new(date, time);
    let tz = Tz::from_str(tzid).ok()?;
    let aware = tz.from_local_datetime(&naive).earliest()?;
    let seconds = aware.offset().fix().local_minus_utc() as i64;
    Some(format_offset(seconds))
}

/// Resolves free-text places to coordinates and coordinates to timezones.
///
/// Results are memoized for the process lifetime; the caches live on the
/// resolver instance rather than in module statics so state stays scoped to
/// the application.
#[derive(Clone)]
pub struct GeoResolver {
    http: Client,
    locationiq_key: Option<String>,
    geo_cache: Arc<Mutex<HashMap<String, ResolvedLocation>>>,
    tz_cache: Arc<Mutex<HashMap<String, ResolvedTimezone>>>,
}

impl GeoResolver {
    pub fn new(http: Client, locationiq_key: Option<String>) -> Self {
        Self {
            http,
            locationiq_key,
            geo_cache: Arc::new(Mutex::new(HashMap::new())),
            tz_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve a free-text place name to coordinates.
    ///
    /// Order: LocationIQ (if keyed) -> cache -> Nominatim -> Open-Meteo.
    pub async fn geocode(&self, location: &str) -> Option<ResolvedLocation> {
        if let Some(key) = self.locationiq_key.clone() {
            match self.geocode_locationiq(&key, location).await {
                Ok(Some(found)) => {
                    self.remember_location(location, &found);
                    return Some(found);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("LocationIQ geocode failed for {:?}: {}", location, e),
            }
        }

        if let Some(cached) = self.geo_cache.lock().unwrap().get(location).cloned() {
            return Some(cached);
        }

        match self.geocode_nominatim(location).await {
            Ok(Some(found)) => {
                self.remember_location(location, &found);
                return Some(found);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Nominatim geocode failed for {:?}: {}", location, e),
        }

        match self.geocode_open_meteo(location).await {
            Ok(Some(found)) => {
                self.remember_location(location, &found);
                return Some(found);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Open-Meteo geocode failed for {:?}: {}", location, e),
        }

        None
    }

    fn remember_location(&self, query: &str, found: &ResolvedLocation) {
        self.geo_cache
            .lock()
            .unwrap()
            .insert(query.to_string(), found.clone());
    }

    async fn geocode_locationiq(
        &self,
        key: &str,
        location: &str,
    ) -> anyhow::Result<Option<ResolvedLocation>> {
        let resp = self
            .http
            .get("https://us1.locationiq.com/v1/search")
            .query(&[("key", key), ("q", location), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?;
        let arr: Vec<Value> = resp.json().await?;
        Ok(arr.first().and_then(|item| {
            Some(ResolvedLocation {
                latitude: parse_coord(item.get("lat")?)?,
                longitude: parse_coord(item.get("lon")?)?,
                display_name: item
                    .get("display_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timezone: None,
            })
        }))
    }

    async fn geocode_nominatim(&self, location: &str) -> anyhow::Result<Option<ResolvedLocation>> {
        // Nominatim's usage policy requires an identifying User-Agent
        let resp = self
            .http
            .get("https://nominatim.openstreetmap.org/search")
            .header("User-Agent", NOMINATIM_USER_AGENT)
            .query(&[
                ("q", location),
                ("format", "json"),
                ("addressdetails", "1"),
                ("limit", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;
        let arr: Vec<Value> = resp.json().await?;
        Ok(arr.first().and_then(|item| {
            Some(ResolvedLocation {
                latitude: parse_coord(item.get("lat")?)?,
                longitude: parse_coord(item.get("lon")?)?,
                display_name: item
                    .get("display_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timezone: None,
            })
        }))
    }

    async fn geocode_open_meteo(&self, location: &str) -> anyhow::Result<Option<ResolvedLocation>> {
        let resp = self
            .http
            .get("https://geocoding-api.open-meteo.com/v1/search")
            .query(&[("name", location), ("count", "1")])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = resp.json().await?;
        let Some(item) = data.get("results").and_then(Value::as_array).and_then(|a| a.first())
        else {
            return Ok(None);
        };
        Ok(Some(ResolvedLocation {
            latitude: item
                .get("latitude")
                .and_then(parse_coord)
                .ok_or_else(|| anyhow::anyhow!("missing latitude"))?,
            longitude: item
                .get("longitude")
                .and_then(parse_coord)
                .ok_or_else(|| anyhow::anyhow!("missing longitude"))?,
            display_name: item.get("name").and_then(Value::as_str).map(str::to_string),
            timezone: item
                .get("timezone")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }

    /// Resolve coordinates to an IANA zone name and a `+HH:MM` offset.
    ///
    /// Order: cache -> LocationIQ (if keyed) -> timeapi.io -> Open-Meteo
    /// timezone -> Open-Meteo geocode tz-id -> India bounding-box heuristic.
    pub async fn timezone_for_coords(&self, lat: f64, lon: f64) -> Option<ResolvedTimezone> {
        let key = format!("{:.6},{:.6}", lat, lon);
        if let Some(cached) = self.tz_cache.lock().unwrap().get(&key).cloned() {
            return Some(cached);
        }

        if let Some(liq_key) = self.locationiq_key.clone() {
            match self.tz_locationiq(&liq_key, lat, lon).await {
                Ok(Some(tz)) => return Some(self.remember_timezone(&key, tz)),
                Ok(None) => {}
                Err(e) => tracing::debug!("LocationIQ timezone failed for {}: {}", key, e),
            }
        }

        match self.tz_timeapi(lat, lon).await {
            Ok(Some(tz)) => return Some(self.remember_timezone(&key, tz)),
            Ok(None) => {}
            Err(e) => tracing::debug!("timeapi.io timezone failed for {}: {}", key, e),
        }

        match self.tz_open_meteo(lat, lon).await {
            Ok(Some(tz)) => return Some(self.remember_timezone(&key, tz)),
            Ok(None) => {}
            Err(e) => tracing::debug!("Open-Meteo timezone failed for {}: {}", key, e),
        }

        match self.tz_open_meteo_geocode(lat, lon).await {
            Ok(Some(tz)) => return Some(self.remember_timezone(&key, tz)),
            Ok(None) => {}
            Err(e) => tracing::debug!("Open-Meteo geocode timezone failed for {}: {}", key, e),
        }

        // Country-specific hardening: the Indian footprint is IST
        if (6.0..=37.5).contains(&lat) && (68.0..=98.0).contains(&lon) {
            let tz = ResolvedTimezone {
                time_zone: "Asia/Kolkata".to_string(),
                offset: "+05:30".to_string(),
            };
            return Some(self.remember_timezone(&key, tz));
        }

        None
    }

    fn remember_timezone(&self, key: &str, tz: ResolvedTimezone) -> ResolvedTimezone {
        self.tz_cache
            .lock()
            .unwrap()
            .insert(key.to_string(), tz.clone());
        tz
    }

    async fn tz_locationiq(
        &self,
        key: &str,
        lat: f64,
        lon: f64,
    ) -> anyhow::Result<Option<ResolvedTimezone>> {
        let resp = self
            .http
            .get("https://us1.locationiq.com/v1/timezone.php")
            .query(&[
                ("key", key.to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = resp.json().await?;

        // Response shapes vary: `timezone` may be a string or `{ "name": .. }`,
        // the offset may be `utc_offset` text or `gmt_offset` seconds.
        let name = data
            .get("timezone")
            .or_else(|| data.get("zone_name"))
            .or_else(|| data.get("timeZone"))
            .and_then(|tz| match tz {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o
                    .get("name")
                    .or_else(|| o.get("zone_name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            });
        let offset = data
            .get("utc_offset")
            .or_else(|| data.get("offset"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                data.get("gmt_offset")
                    .or_else(|| data.get("raw_offset"))
                    .and_then(Value::as_i64)
                    .map(format_offset)
            });
        Ok(match (name, offset) {
            (Some(time_zone), Some(offset)) => Some(ResolvedTimezone { time_zone, offset }),
            _ => None,
        })
    }

    async fn tz_timeapi(&self, lat: f64, lon: f64) -> anyhow::Result<Option<ResolvedTimezone>> {
        let resp = self
            .http
            .get("https://timeapi.io/api/TimeZone/coordinate")
            .query(&[("latitude", lat.to_string()), ("longitude", lon.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = resp.json().await?;
        let Some(time_zone) = data.get("timeZone").and_then(Value::as_str) else {
            return Ok(None);
        };
        let seconds = data
            .pointer("/standardUtcOffset/seconds")
            .or_else(|| data.pointer("/currentUtcOffset/seconds"))
            .and_then(Value::as_i64);
        Ok(seconds.map(|s| ResolvedTimezone {
            time_zone: time_zone.to_string(),
            offset: format_offset(s),
        }))
    }

    async fn tz_open_meteo(&self, lat: f64, lon: f64) -> anyhow::Result<Option<ResolvedTimezone>> {
        let resp = self
            .http
            .get("https://api.open-meteo.com/v1/timezone")
            .query(&[("latitude", lat.to_string()), ("longitude", lon.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = resp.json().await?;
        let time_zone = data.get("timezone").and_then(Value::as_str);
        let seconds = data.get("utc_offset_seconds").and_then(Value::as_i64);
        Ok(match (time_zone, seconds) {
            (Some(tz), Some(s)) => Some(ResolvedTimezone {
                time_zone: tz.to_string(),
                offset: format_offset(s),
            }),
            _ => None,
        })
    }

    async fn tz_open_meteo_geocode(
        &self,
        lat: f64,
        lon: f64,
    ) -> anyhow::Result<Option<ResolvedTimezone>> {
        let resp = self
            .http
            .get("https://geocoding-api.open-meteo.com/v1/search")
            .query(&[("name", format!("{},{}", lat, lon)), ("count", "1".to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let data: Value = resp.json().await?;
        let tzid = data
            .pointer("/results/0/timezone")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(tzid) = tzid else { return Ok(None) };
        let offset = current_offset_for_tzid(&tzid).unwrap_or_else(|| "+00:00".to_string());
        Ok(Some(ResolvedTimezone {
            time_zone: tzid,
            offset,
        }))
    }
}

fn current_offset_for_tzid(tzid: &str) -> Option<String> {
    let tz = Tz::from_str(tzid).ok()?;
    let now = tz.from_utc_datetime(&Utc::now().naive_utc());
    Some(format_offset(now.offset().fix().local_minus_utc() as i64))
}

/// Geocoder coordinates arrive as either strings or numbers.
fn parse_coord(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
