//! Divisional-chart naming, payload reshaping and the chat control grammar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical chart keys and their Dn aliases, in provider order.
pub const CHART_TYPES: &[(&str, &str)] = &[
    ("lagna", "D1"),
    ("hora", "D2"),
    ("drekkana", "D3"),
    ("chaturthamsa", "D4"),
    ("saptamsa", "D7"),
    ("navamsa", "D9"),
    ("dasamsa", "D10"),
    ("dwadasamsa", "D12"),
    ("shodasamsa", "D16"),
    ("vimsamsa", "D20"),
    ("trimsamsa", "D30"),
];

const SANSKRIT_SIGNS: &[(&str, &str)] = &[
    ("Mesha", "Aries"),
    ("Vrishabha", "Taurus"),
    ("Vrishabh", "Taurus"),
    ("Mithuna", "Gemini"),
    ("Karka", "Cancer"),
    ("Karka\u{1e6d}a", "Cancer"),
    ("Simha", "Leo"),
    ("Kanya", "Virgo"),
    ("Tula", "Libra"),
    ("Vrischika", "Scorpio"),
    ("Vrichika", "Scorpio"),
    ("Dhanu", "Sagittarius"),
    ("Makara", "Capricorn"),
    ("Kumbha", "Aquarius"),
    ("Meena", "Pisces"),
];

/// Classical sign rulership, keyed by the Sanskrit name.
pub const SIGN_LORDS: &[(&str, &str)] = &[
    ("Mesha", "Mars"),
    ("Vrishabha", "Venus"),
    ("Vrishabh", "Venus"),
    ("Mithuna", "Mercury"),
    ("Karka", "Moon"),
    ("Karka\u{1e6d}a", "Moon"),
    ("Simha", "Sun"),
    ("Kanya", "Mercury"),
    ("Tula", "Venus"),
    ("Vrischika", "Mars"),
    ("Vrichika", "Mars"),
    ("Dhanu", "Jupiter"),
    ("Makara", "Saturn"),
    ("Kumbha", "Saturn"),
    ("Meena", "Jupiter"),
];

/// Translate a Sanskrit sign name to English. Idempotent on names that are
/// already English.
pub fn english_sign(name: &str) -> String {
    for (sa, en) in SANSKRIT_SIGNS {
        if *sa == name {
            return en.to_string();
        }
    }
    name.to_string()
}

pub fn sign_lord(name: &str) -> Option<&'static str> {
    SIGN_LORDS
        .iter()
        .find(|(sa, _)| *sa == name)
        .map(|(_, lord)| *lord)
}

/// Normalize any chart spelling (`D9`, `d9`, `navamsa`, `Navamsa`) to the
/// canonical lowercase key. Unknown names resolve to `None`.
pub fn canonical_chart_key(raw: &str) -> Option<&'static str> {
    let needle = raw.trim();
    if needle.is_empty() {
        return None;
    }
    for (key, alias) in CHART_TYPES {
        if needle.eq_ignore_ascii_case(key) || needle.eq_ignore_ascii_case(alias) {
            return Some(key);
        }
    }
    None
}

/// UI-facing chart shape: one row per planet placement, already translated
/// into the application's naming scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartData {
    pub chart_name: String,
    pub placements: Vec<PlanetPlacement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanetPlacement {
    pub planet: String,
    pub sign: String,
    pub degree: Option<f64>,
    /// House number 1-12
    pub house: Option<u32>,
    pub nakshatra: Option<String>,
    pub retrograde: bool,
}

/// One-to-one remap of an upstream divisional payload into [`ChartData`].
///
/// Walks `data.divisional_positions[].planet_positions[]`, tolerating missing
/// fields; Sanskrit sign names come out as English.
pub fn map_divisional_to_chart(chart_name: &str, payload: &Value) -> ChartData {
    let mut placements = Vec::new();
    let houses = payload
        .pointer("/data/divisional_positions")
        .or_else(|| payload.get("divisional_positions"))
        .and_then(Value::as_array);

    if let Some(houses) = houses {
        for house_block in houses {
            let sign = house_block
                .pointer("/rasi/name")
                .and_then(Value::as_str)
                .map(english_sign);
            let house = house_block
                .pointer("/house/number")
                .and_then(Value::as_u64)
                .map(|n| n as u32);
            let Some(positions) = house_block.get("planet_positions").and_then(Value::as_array)
            else {
                continue;
            };
            for pos in positions {
                let Some(planet) = pos.pointer("/planet/name").and_then(Value::as_str) else {
                    continue;
                };
                placements.push(PlanetPlacement {
                    planet: planet.to_string(),
                    sign: sign.clone().unwrap_or_default(),
                    degree: pos.get("sign_degree").and_then(Value::as_f64),
                    house,
                    nakshatra: pos
                        .pointer("/nakshatra/name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    retrograde: pos
                        .get("is_retrograde")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                });
            }
        }
    }

    ChartData {
        chart_name: chart_name.to_string(),
        placements,
    }
}

/// Marker line the model appends to name the charts it still needs.
pub const NEXT_CHARTS_MARKER: &str = "NEXT_CHARTS:";

/// Extract the chart keys requested on the `NEXT_CHARTS:` line of a model
/// reply. `none` (or an absent line) means no further charts; the result is
/// canonical lowercase keys, de-duplicated preserving order.
pub fn parse_next_charts(reply: &str) -> Vec<String> {
    let Some(line) = reply
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with(NEXT_CHARTS_MARKER))
    else {
        return Vec::new();
    };
    let rest = line.trim_start()[NEXT_CHARTS_MARKER.len()..].trim();
    if rest.is_empty() || rest.eq_ignore_ascii_case("none") {
        return Vec::new();
    }

    let mut seen = Vec::new();
    for token in rest.split(',') {
        if let Some(key) = canonical_chart_key(token) {
            if !seen.iter().any(|s: &String| s == key) {
                seen.push(key.to_string());
            }
        }
    }
    seen
}

/// Remove the control line from a model reply before returning it to the UI.
pub fn strip_control_line(reply: &str) -> String {
    reply
        .lines()
        .filter(|l| !l.trim_start().starts_with(NEXT_CHARTS_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

const TOPIC_CHARTS: &[(&str, &[&str])] = &[
    ("dasamsa", &["career", "job", "work", "profession", "business", "promotion"]),
    ("navamsa", &["relationship", "marriage", "partner", "spouse", "love", "wedding"]),
    ("chaturthamsa", &["asset", "property", "house", "home", "vehicle", "land", "wealth"]),
    ("saptamsa", &["child", "children", "kids", "progeny", "pregnancy"]),
];

/// Pre-select likely-relevant chart types by keyword match over four topic
/// categories. The natal chart is always consulted first.
pub fn classify_topics(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    let mut charts = vec!["lagna".to_string()];
    for (chart, keywords) in TOPIC_CHARTS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            charts.push(chart.to_string());
        }
    }
    charts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_all_twelve_signs_exactly_once() {
        let expected = [
            ("Mesha", "Aries"),
            ("Vrishabha", "Taurus"),
            ("Mithuna", "Gemini"),
            ("Karka", "Cancer"),
            ("Simha", "Leo"),
            ("Kanya", "Virgo"),
            ("Tula", "Libra"),
            ("Vrischika", "Scorpio"),
            ("Dhanu", "Sagittarius"),
            ("Makara", "Capricorn"),
            ("Kumbha", "Aquarius"),
            ("Meena", "Pisces"),
        ];
        for (sa, en) in expected {
            assert_eq!(english_sign(sa), en);
        }
    }

    #[test]
    fn sign_translation_is_idempotent_on_english() {
        for en in [
            "Aries", "Taurus", "Gemini", "Cancer", "Leo", "Virgo", "Libra", "Scorpio",
            "Sagittarius", "Capricorn", "Aquarius", "Pisces",
        ] {
            assert_eq!(english_sign(en), en);
            assert_eq!(english_sign(&english_sign(en)), en);
        }
    }

    #[test]
    fn accepts_alternate_spellings() {
        assert_eq!(english_sign("Vrishabh"), "Taurus");
        assert_eq!(english_sign("Vrichika"), "Scorpio");
        assert_eq!(sign_lord("Vrichika"), Some("Mars"));
    }

    #[test]
    fn parses_next_charts_line() {
        assert_eq!(parse_next_charts("Answer.\nNEXT_CHARTS: none"), Vec::<String>::new());
        assert_eq!(
            parse_next_charts("Answer.\nNEXT_CHARTS: D7, D9, d1"),
            vec!["saptamsa", "navamsa", "lagna"]
        );
        // duplicates and unknowns collapse
        assert_eq!(
            parse_next_charts("NEXT_CHARTS: D9, navamsa, D99"),
            vec!["navamsa"]
        );
        assert_eq!(parse_next_charts("no control line here"), Vec::<String>::new());
    }

    #[test]
    fn strips_control_line_only() {
        let reply = "Your Saturn placement suggests patience.\nNEXT_CHARTS: D10";
        assert_eq!(strip_control_line(reply), "Your Saturn placement suggests patience.");
        assert_eq!(strip_control_line("plain answer"), "plain answer");
    }

    #[test]
    fn classifies_topics_with_natal_always_first() {
        assert_eq!(classify_topics("how is my career going?"), vec!["lagna", "dasamsa"]);
        assert_eq!(
            classify_topics("marriage and children prospects"),
            vec!["lagna", "navamsa", "saptamsa"]
        );
        assert_eq!(classify_topics("tell me something"), vec!["lagna"]);
    }

    #[test]
    fn reshapes_divisional_payload() {
        let payload = json!({
            "data": {
                "divisional_positions": [
                    {
                        "rasi": {"name": "Mesha"},
                        "house": {"number": 1},
                        "planet_positions": [
                            {
                                "planet": {"name": "Sun"},
                                "sign_degree": 14.25,
                                "nakshatra": {"name": "Bharani"},
                                "is_retrograde": false
                            },
                            {
                                "planet": {"name": "Saturn"},
                                "sign_degree": 2.5,
                                "is_retrograde": true
                            }
                        ]
                    }
                ]
            }
        });
        let chart = map_divisional_to_chart("lagna", &payload);
        assert_eq!(chart.chart_name, "lagna");
        assert_eq!(chart.placements.len(), 2);
        assert_eq!(chart.placements[0].planet, "Sun");
        assert_eq!(chart.placements[0].sign, "Aries");
        assert_eq!(chart.placements[0].house, Some(1));
        assert_eq!(chart.placements[0].nakshatra.as_deref(), Some("Bharani"));
        assert!(chart.placements[1].retrograde);
    }

    #[test]
    fn canonical_keys_cover_aliases() {
        assert_eq!(canonical_chart_key("D9"), Some("navamsa"));
        assert_eq!(canonical_chart_key("d10"), Some("dasamsa"));
        assert_eq!(canonical_chart_key("Lagna"), Some("lagna"));
        assert_eq!(canonical_chart_key(" D7 "), Some("saptamsa"));
        assert_eq!(canonical_chart_key("unknown"), None);
    }
}
