//! Fact extraction from a compute result and the deterministic natal
//! summary template. Everything here reads only what the upstream actually
//! returned; nothing is invented.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::charts::{english_sign, sign_lord};
use crate::dasha::{current_period, parse_flexible_datetime, periods_from_value, DashaPeriod};
use crate::models::ComputeResponse;

#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub sign: String,
    pub house: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HouseInfo {
    pub sign: String,
    pub lord: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct Occupant {
    pub planet: String,
    pub sign: String,
}

/// Facts the analysis layers work from, pulled out of the raw upstream
/// payloads once at the boundary.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    pub moon_sign: Option<String>,
    pub moon_nakshatra: Option<String>,
    pub place: Option<String>,
    pub datetime_display: String,
    pub birth_utc: Option<DateTime<Utc>>,
    pub ascendant: Option<String>,
    pub asc_degree: Option<f64>,
    pub mahadasha: Option<DashaPeriod>,
    pub antardasha: Option<DashaPeriod>,
    /// Planet name -> D1 placement, upstream order preserved
    pub placements: Vec<(String, Placement)>,
    pub by_house: BTreeMap<u32, Vec<Occupant>>,
    pub houses: BTreeMap<u32, HouseInfo>,
    pub yoga_summaries: Vec<Value>,
}

impl Facts {
    pub fn placement(&self, planet: &str) -> Option<&Placement> {
        self.placements
            .iter()
            .find(|(name, _)| name == planet)
            .map(|(_, p)| p)
    }

    fn has(&self, planet: &str, house: Option<u32>) -> bool {
        match self.placement(planet) {
            Some(p) => house.map_or(true, |h| p.house == Some(h)),
            None => false,
        }
    }

    pub fn mahadasha_lord(&self) -> Option<&str> {
        self.mahadasha.as_ref().and_then(|p| p.name.as_deref())
    }

    pub fn antardasha_lord(&self) -> Option<&str> {
        self.antardasha.as_ref().and_then(|p| p.name.as_deref())
    }
}

pub fn extract_facts(comp: &ComputeResponse, now: DateTime<Utc>) -> Facts {
    let mut facts = Facts::default();
    let kundli = comp.kundli.pointer("/data").unwrap_or(&comp.kundli);

    facts.moon_sign = kundli
        .pointer("/nakshatra_details/chandra_rasi/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    facts.moon_nakshatra = kundli
        .pointer("/nakshatra_details/nakshatra/name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let birth = &comp.meta.birth;
    facts.place = birth.location.clone();
    facts.datetime_display = match &birth.timezone {
        Some(tz) => format!("{} {} {}", birth.date, birth.time, tz),
        None => format!("{} {}", birth.date, birth.time),
    }
    .trim()
    .to_string();
    facts.birth_utc = birth
        .timezone
        .as_ref()
        .and_then(|tz| parse_flexible_datetime(&format!("{}T{}{}", birth.date, birth.time, tz)))
        .or_else(|| parse_flexible_datetime(&format!("{}T{}", birth.date, birth.time)));

    // Ascendant and placements from the D1 chart
    let d1 = comp
        .divisional
        .get("lagna")
        .map(|v| v.pointer("/data").unwrap_or(v));
    if let Some(d1) = d1 {
        let house_blocks = d1
            .get("divisional_positions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for house_block in &house_blocks {
            let sign = house_block
                .pointer("/rasi/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let house = house_block
                .pointer("/house/number")
                .and_then(Value::as_u64)
                .map(|n| n as u32);
            if let Some(h) = house {
                if !sign.is_empty() {
                    facts.houses.insert(
                        h,
                        HouseInfo {
                            lord: sign_lord(&sign),
                            sign: sign.clone(),
                        },
                    );
                }
            }
            let positions = house_block
                .get("planet_positions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for pos in &positions {
                let Some(name) = pos.pointer("/planet/name").and_then(Value::as_str) else {
                    continue;
                };
                if name == "Ascendant" {
                    if facts.ascendant.is_none() {
                        facts.ascendant = Some(sign.clone());
                        facts.asc_degree = pos.get("sign_degree").and_then(Value::as_f64);
                    }
                    continue;
                }
                facts.placements.push((
                    name.to_string(),
                    Placement {
                        sign: sign.clone(),
                        house,
                    },
                ));
                if let Some(h) = house {
                    facts.by_house.entry(h).or_default().push(Occupant {
                        planet: name.to_string(),
                        sign: sign.clone(),
                    });
                }
            }
        }
    }

    // Vimshottari: the period list sits under `vimshottari_dasha` or at the
    // top of the kundli document depending on tier
    let dasha_root = kundli.get("vimshottari_dasha").unwrap_or(kundli);
    let periods = dasha_root
        .get("dasha_periods")
        .map(periods_from_value)
        .unwrap_or_default();
    facts.mahadasha = current_period(&periods, facts.birth_utc, now).cloned();
    facts.antardasha = facts
        .mahadasha
        .as_ref()
        .and_then(|maha| current_period(&maha.antardasha, facts.birth_utc, now).cloned());

    facts.yoga_summaries = kundli
        .get("yoga_details")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    facts
}

pub fn house_name(n: u32) -> &'static str {
    match n {
        1 => "Tanu (Self)",
        2 => "Dhana (Wealth)",
        3 => "Sahaja (Siblings)",
        4 => "Sukha (Home)",
        5 => "Putra (Creativity)",
        6 => "Ripu (Health)",
        7 => "Yuvati (Partnership)",
        8 => "Randhra (Transformation)",
        9 => "Dharma (Fortune)",
        10 => "Karma (Career)",
        11 => "Labha (Gains)",
        12 => "Vyaya (Loss/Spiritual)",
        _ => "House",
    }
}

fn date_part(s: &str) -> &str {
    s.split('T').next().unwrap_or(s)
}

/// Render the deterministic Markdown natal summary. No LLM involved; the
/// output is a pure function of the extracted facts.
pub fn render_analysis(f: &Facts) -> String {
    let mut out = String::new();
    out.push_str("## BPHS-Grounded Natal Summary\n");

    let mut birth_line = Vec::new();
    if !f.datetime_display.is_empty() {
        birth_line.push(format!("When: {}", f.datetime_display));
    }
    if let Some(place) = &f.place {
        birth_line.push(format!("Where: {}", place));
    }
    if !birth_line.is_empty() {
        let _ = writeln!(out, "- {}", birth_line.join(" | "));
    }

    if f.ascendant.is_some() || f.moon_sign.is_some() || f.moon_nakshatra.is_some() {
        out.push_str("\n### Core\n");
        if let Some(asc) = &f.ascendant {
            match f.asc_degree {
                Some(deg) => {
                    let _ = writeln!(out, "- Lagna: {} ({:.2}\u{b0})", asc, deg);
                }
                None => {
                    let _ = writeln!(out, "- Lagna: {}", asc);
                }
            }
        }
        let _ = writeln!(
            out,
            "- Moon: {}; Nakshatra: {}",
            f.moon_sign.as_deref().unwrap_or("?"),
            f.moon_nakshatra.as_deref().unwrap_or("?")
        );
    }

    if let Some(md) = f.mahadasha_lord() {
        out.push_str("\n### Vimshottari\n");
        let until = f
            .mahadasha
            .as_ref()
            .and_then(|p| p.end.as_deref())
            .map(|e| format!(" \u{2192} until {}", date_part(e)))
            .unwrap_or_default();
        let _ = writeln!(out, "- Mahadasha: {}{}", md, until);
        if let Some(ad) = f.antardasha_lord() {
            let until = f
                .antardasha
                .as_ref()
                .and_then(|p| p.end.as_deref())
                .map(|e| format!(" \u{2192} until {}", date_part(e)))
                .unwrap_or_default();
            let _ = writeln!(out, "- Antardasha: {}{}", ad, until);
        }
    }

    if !f.placements.is_empty() {
        out.push_str("\n### Selected D1 Placements\n");
        for planet in ["Mars", "Saturn", "Jupiter", "Venus", "Mercury"] {
            if let Some(p) = f.placement(planet) {
                let _ = writeln!(
                    out,
                    "- {}: {} (House {})",
                    planet,
                    p.sign,
                    p.house.map(|h| h.to_string()).unwrap_or_else(|| "?".into())
                );
            }
        }
    }

    if !f.houses.is_empty() {
        out.push_str("\n### House Highlights (D1)\n");
        for h in 1..=12u32 {
            let Some(info) = f.houses.get(&h) else { continue };
            let occ = f
                .by_house
                .get(&h)
                .map(|occ| {
                    occ.iter()
                        .map(|o| format!("{} in {}", o.planet, o.sign))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "\u{2014}".to_string());
            let _ = writeln!(
                out,
                "- {}: Sign {} ({}), Lord {}; Occupants: {}",
                house_name(h),
                info.sign,
                english_sign(&info.sign),
                info.lord.unwrap_or("?"),
                occ
            );
        }
    }

    out.push_str("\n### Guidance\n");
    if f.mahadasha_lord().is_some() {
        out.push_str(
            "- Tie major actions to current MD/AD windows; avoid over-interpreting beyond actual placements.\n",
        );
    }
    if f.has("Mars", None) {
        out.push_str("- Channel Mars intensity into deep work; manage risk and impatience.\n");
    }
    if f.has("Saturn", None) {
        out.push_str("- Favor long-horizon plans; keep speech/contracts precise.\n");
    }

    out.push_str(&render_narrative(f));
    out.push_str(&render_client_report(f));
    out.push_str(&render_house_story(f));
    out
}

fn render_narrative(f: &Facts) -> String {
    let mut out = String::new();
    out.push_str("\n\n## Your Story (Plain Language)\n");

    let mut persona = Vec::new();
    if let Some(asc) = &f.ascendant {
        persona.push(format!("rising sign {}", asc));
    }
    if let Some(moon) = &f.moon_sign {
        persona.push(format!("Moon in {}", moon));
    }
    if let Some(nak) = &f.moon_nakshatra {
        persona.push(format!("Nakshatra {}", nak));
    }
    if !persona.is_empty() {
        let _ = writeln!(
            out,
            "You come across with {} \u{2014} direct and action-oriented when focused, more reflective when you pause to plan. This is a practical reading based on your actual placements, not a template.",
            persona.join(", ")
        );
    }

    if f.has("Mars", Some(8)) {
        out.push_str("- You handle intensity well. Mars in the 8th house points to resilience, research depth, and the ability to work through complex or sensitive matters. Channel this into deep work rather than rushed moves.\n");
    }
    if f.has("Saturn", Some(2)) {
        out.push_str("- Finances and speech benefit from patience. Saturn in the 2nd suggests steady, deliberate growth and careful wording in important conversations and documents.\n");
    }
    for (h, occupants) in &f.by_house {
        if occupants.len() >= 3 {
            let _ = writeln!(
                out,
                "- A strong focus gathers in House {} ({}), with multiple planets in {}. Expect sustained developments here; lean into learning, good mentors, and ethics when making decisions.",
                h,
                house_name(*h),
                occupants[0].sign
            );
        }
    }

    if let Some(md) = f.mahadasha_lord() {
        out.push_str("\n### Timing Focus\n");
        match f.antardasha_lord() {
            Some(ad) => {
                let _ = writeln!(
                    out,
                    "- You are in {} Mahadasha with {} Antardasha. Make key moves that suit this period's tone; keep plans clear in writing and avoid overstretching.",
                    md, ad
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "- You are in {} Mahadasha. Let your main priorities follow this period's strengths; keep routines calm and measured.",
                    md
                );
            }
        }
    }
    out
}

fn render_client_report(f: &Facts) -> String {
    let mut out = String::new();
    out.push_str("\n\n## Client Report Mode\n");

    out.push_str("\n### Work & Money\n");
    if f.has("Mars", Some(8)) {
        out.push_str("- You do well in roles that need courage and depth (turnarounds, due diligence, incident/crisis work). Use intensity for deep wins, not quick clashes.\n");
    }
    if f.has("Saturn", Some(2)) {
        out.push_str("- Finances: slow and steady. Simple rules + consistent logging. Contracts and invoices in clear language save money.\n");
    }
    for (h, occupants) in &f.by_house {
        if occupants.len() >= 3 {
            match h {
                9 => out.push_str("- Growth path: learning, mentors, writing/publishing, foreign or cross-border collaborations.\n"),
                10 => out.push_str("- Growth path: responsibility and reputation\u{2014}document wins; build authority piece by piece.\n"),
                11 => out.push_str("- Growth path: networks and communities\u{2014}one strong peer group lifts outcomes.\n"),
                _ => {}
            }
        }
    }

    out.push_str("\n### Relationships & Home\n");
    if f.by_house.contains_key(&7) {
        out.push_str("- Partnership benefits from explicit agreements and regular check-ins\u{2014}small clarity prevents big friction.\n");
    } else {
        out.push_str("- Love improves with simple rituals: shared calendar, shared goals, one honest talk per week.\n");
    }
    if f.by_house.contains_key(&4) {
        out.push_str("- Home responds to gentle structure\u{2014}declutter in small batches; make rest easy to reach.\n");
    } else {
        out.push_str("- Keep home light and simple; fewer objects, more space for recovery.\n");
    }

    out.push_str("\n### Health & Mind\n");
    if f.has("Mars", Some(8)) {
        out.push_str("- Body calms the mind: 20-minute daily movement + 5-minute breath work stabilizes focus.\n");
    } else {
        out.push_str("- Short, repeatable routines beat intense bursts\u{2014}aim for consistency over perfection.\n");
    }
    if f.has("Mercury", None) {
        out.push_str("- Brain hygiene: one list, one calendar, one 'no'\u{2014}reduce open loops to think clearly.\n");
    }

    out.push_str("\n### Timing Now\n");
    if let Some(md) = f.mahadasha_lord() {
        match f.antardasha_lord() {
            Some(ad) => {
                let _ = writeln!(
                    out,
                    "- Current period: {} / {}. Aim for moves that suit this combo; prefer clear documents and precise scope.",
                    md, ad
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "- Current period: {}. Let priorities follow this period's strengths; minimize distractions.",
                    md
                );
            }
        }
    }

    out.push_str("\n### Next 90 Days\n");
    out.push_str("- Ship one proof of value (article, demo, case study, or certificate). Make it simple and visible.\n");
    out.push_str("- Tighten one money habit (auto-save %, cancel 2 subscriptions, or clear one small debt).\n");
    out.push_str("- Fix one agreement (clean contract or written scope). Future-you will thank you.\n");
    out.push_str("- Schedule a weekly 30-minute 'systems' block (money, files, tools, routines). Quiet compounding wins.\n");
    out
}

fn planet_note(planet: &str) -> &'static str {
    match planet {
        "Sun" => "vitality and visibility",
        "Moon" => "mood, care and nourishment",
        "Mars" => "drive, courage and decisive action",
        "Mercury" => "thinking, learning and communication",
        "Jupiter" => "guidance, growth and teachers",
        "Venus" => "relationships, taste and comforts",
        "Saturn" => "duty, structure and patience",
        "Rahu" => "amplification, foreign links and unconventional paths",
        "Ketu" => "simplification, detachment and insight",
        _ => "influence present",
    }
}

fn render_house_story(f: &Facts) -> String {
    if f.houses.is_empty() {
        return String::new();
    }
    let md = f.mahadasha_lord().map(str::to_string);
    let ad = f.antardasha_lord().map(str::to_string);

    let mut out = String::new();
    out.push_str("\n\n## House-by-House (Story)\n");
    for h in 1..=12u32 {
        let info = f.houses.get(&h);
        let sign = info.map(|i| i.sign.as_str()).unwrap_or("?");
        let sign_en = if sign == "?" {
            "?".to_string()
        } else {
            english_sign(sign)
        };
        let lord = info.and_then(|i| i.lord).unwrap_or("?");
        let empty = Vec::new();
        let occupants = f.by_house.get(&h).unwrap_or(&empty);

        let _ = writeln!(
            out,
            "\n### {}. {} \u{2014} {} ({}) \u{2022} Lord: {}",
            h,
            house_name(h),
            sign,
            sign_en,
            lord
        );
        if occupants.is_empty() {
            out.push_str("- No resident planets. Results flow through its lord; watch that planet's periods for developments.\n");
        } else {
            for o in occupants {
                let _ = writeln!(
                    out,
                    "- Contains {} in {}: {}.",
                    o.planet,
                    o.sign,
                    planet_note(&o.planet)
                );
            }
        }

        let mut active = Vec::new();
        if let Some(md) = &md {
            if md == lord || occupants.iter().any(|o| &o.planet == md) {
                active.push(format!("Mahadasha {}", md));
            }
        }
        if let Some(ad) = &ad {
            if ad == lord || occupants.iter().any(|o| &o.planet == ad) {
                active.push(format!("Antardasha {}", ad));
            }
        }
        if !active.is_empty() {
            let _ = writeln!(out, "- Activated now via {}.", active.join(" & "));
        }

        match h {
            1 => out.push_str("- Practical tip: mind and body routines keep you centered; start small, stay consistent.\n"),
            2 => out.push_str("- Practical tip: prefer steady budgeting and precise words in key conversations.\n"),
            7 => out.push_str("- Practical tip: spell out agreements; partnership clarity prevents friction.\n"),
            8 => out.push_str("- Practical tip: manage risk, insure wisely, and use deep work to your advantage.\n"),
            9 => out.push_str("- Practical tip: keep a mentor/learning track; align choices with your principles.\n"),
            10 => out.push_str("- Practical tip: document wins and responsibilities; build reputation through consistency.\n"),
            _ => {}
        }
    }
    out
}

/// Compact plain-text fact sheet handed to the LLM as grounding context.
pub fn fact_summary(f: &Facts, available_charts: &[String]) -> String {
    let mut out = String::new();
    if let Some(asc) = &f.ascendant {
        let _ = writeln!(out, "Ascendant: {} ({})", asc, english_sign(asc));
    }
    if let Some(moon) = &f.moon_sign {
        let _ = writeln!(
            out,
            "Moon: {} ({}); Nakshatra: {}",
            moon,
            english_sign(moon),
            f.moon_nakshatra.as_deref().unwrap_or("?")
        );
    }
    if let Some(md) = f.mahadasha_lord() {
        match f.antardasha_lord() {
            Some(ad) => {
                let _ = writeln!(out, "Current dasha: {} Mahadasha / {} Antardasha", md, ad);
            }
            None => {
                let _ = writeln!(out, "Current dasha: {} Mahadasha", md);
            }
        }
    }
    if !f.placements.is_empty() {
        out.push_str("D1 placements:\n");
        for (planet, p) in &f.placements {
            let _ = writeln!(
                out,
                "- {} in {} (house {})",
                planet,
                p.sign,
                p.house.map(|h| h.to_string()).unwrap_or_else(|| "?".into())
            );
        }
    }
    if !f.datetime_display.is_empty() {
        let _ = writeln!(out, "Birth: {}", f.datetime_display);
    }
    let _ = writeln!(out, "Available charts: {}", available_charts.join(", "));
    out
}

/// Section headings the report prompt requires the model to follow.
const REPORT_SECTIONS: &[&str] = &[
    "Overview",
    "Personality & Temperament",
    "Career & Wealth",
    "Relationships & Family",
    "Health & Vitality",
    "Current Period & Timing",
    "Remedial Guidance",
];

/// Two public-domain reference excerpts fetched as grounding context.
pub const REFERENCE_URLS: &[&str] = &[
    "https://www.sacred-texts.com/astro/bphs/bphs01.htm",
    "https://www.sacred-texts.com/astro/bphs/bphs06.htm",
];

const REFERENCE_EXCERPT_LIMIT: usize = 4000;

/// Best-effort fetch of one reference text; degrades to an empty string.
pub async fn fetch_reference(http: &reqwest::Client, url: &str) -> String {
    let result = async {
        let resp = http.get(url).send().await?.error_for_status()?;
        resp.text().await
    }
    .await;
    match result {
        Ok(text) => {
            let mut cut = REFERENCE_EXCERPT_LIMIT.min(text.len());
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text[..cut].to_string()
        }
        Err(e) => {
            tracing::warn!("reference text fetch failed for {}: {}", url, e);
            String::new()
        }
    }
}

/// Assemble the long structured report prompt: fixed section headings,
/// required inline evidence citations, and a bibliography from the fetched
/// reference excerpts.
pub fn build_report_prompt(f: &Facts, available_charts: &[String], references: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Write a structured Vedic natal report grounded ONLY in the facts below.\n\n");
    prompt.push_str("<facts>\n");
    prompt.push_str(&fact_summary(f, available_charts));
    prompt.push_str("</facts>\n\n");

    let usable: Vec<&String> = references.iter().filter(|r| !r.is_empty()).collect();
    if !usable.is_empty() {
        prompt.push_str("<references>\n");
        for (idx, text) in usable.iter().enumerate() {
            let _ = writeln!(prompt, "[R{}]\n{}\n", idx + 1, text);
        }
        prompt.push_str("</references>\n\n");
    }

    prompt.push_str("Required sections, in order:\n");
    for section in REPORT_SECTIONS {
        let _ = writeln!(prompt, "## {}", section);
    }
    prompt.push_str("\nRules:\n");
    prompt.push_str("- Cite evidence inline for every claim, e.g. (Mars in 8th) or [R1].\n");
    prompt.push_str("- End with a Bibliography section listing the references used.\n");
    prompt.push_str("- Do not make health or financial guarantees.\n");
    prompt.push_str(
        "- After the report, append a fenced ```json block with keys \"strengths\", \"risks\", \"timing\" summarizing your rationale.\n",
    );
    prompt
}

/// Extract a trailing fenced JSON block as structured rationale data.
/// The parse is best-effort; an unparseable block is discarded and the text
/// returned untouched apart from the fence removal.
pub fn extract_rationale(text: &str) -> (String, Option<Value>) {
    let Some(open) = text.rfind("```json") else {
        return (text.trim().to_string(), None);
    };
    let after = &text[open + "```json".len()..];
    let Some(close) = after.find("```") else {
        return (text.trim().to_string(), None);
    };
    let block = &after[..close];
    let rationale = serde_json::from_str::<Value>(block.trim()).ok();
    if rationale.is_none() {
        return (text.trim().to_string(), None);
    }
    let mut clean = String::new();
    clean.push_str(&text[..open]);
    clean.push_str(&after[close + 3..]);
    (clean.trim().to_string(), rationale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BirthEcho, Meta};
    use serde_json::json;

    fn sample_compute() -> ComputeResponse {
        let kundli = json!({
            "data": {
                "nakshatra_details": {
                    "chandra_rasi": {"name": "Karka"},
                    "nakshatra": {"name": "Pushya"}
                },
                "vimshottari_dasha": {
                    "dasha_periods": [
                        {
                            "name": "Saturn",
                            "start": "2010-01-01T00:00:00+00:00",
                            "end": "2029-01-01T00:00:00+00:00",
                            "antardasha": [
                                {
                                    "name": "Mercury",
                                    "start": "2022-01-01T00:00:00+00:00",
                                    "end": "2025-01-01T00:00:00+00:00"
                                }
                            ]
                        }
                    ]
                },
                "yoga_details": [{"name": "Gajakesari"}]
            }
        });
        let d1 = json!({
            "data": {
                "divisional_positions": [
                    {
                        "rasi": {"name": "Mesha"},
                        "house": {"number": 1},
                        "planet_positions": [
                            {"planet": {"name": "Ascendant"}, "sign_degree": 15.5},
                            {"planet": {"name": "Mars"}, "sign_degree": 3.2}
                        ]
                    },
                    {
                        "rasi": {"name": "Vrishabha"},
                        "house": {"number": 2},
                        "planet_positions": [
                            {"planet": {"name": "Saturn"}, "sign_degree": 11.0}
                        ]
                    }
                ]
            }
        });
        let mut divisional = serde_json::Map::new();
        divisional.insert("lagna".to_string(), d1);
        ComputeResponse {
            kundli,
            divisional,
            transits: None,
            meta: Meta {
                provider: "prokerala".into(),
                ayanamsa: 1,
                language: "en".into(),
                advanced: true,
                birth: BirthEcho {
                    date: "1990-04-12".into(),
                    time: "06:45:00".into(),
                    timezone: Some("+05:30".into()),
                    latitude: Some(12.9716),
                    longitude: Some(77.5946),
                    location: Some("Bangalore, India".into()),
                },
                effective_datetime: "1990-04-12T06:45:00+05:30".into(),
            },
        }
    }

    fn now() -> DateTime<Utc> {
        parse_flexible_datetime("2024-06-01T00:00:00+00:00").unwrap()
    }

    #[test]
    fn extracts_core_facts() {
        let facts = extract_facts(&sample_compute(), now());
        assert_eq!(facts.moon_sign.as_deref(), Some("Karka"));
        assert_eq!(facts.moon_nakshatra.as_deref(), Some("Pushya"));
        assert_eq!(facts.ascendant.as_deref(), Some("Mesha"));
        assert_eq!(facts.asc_degree, Some(15.5));
        assert_eq!(facts.mahadasha_lord(), Some("Saturn"));
        assert_eq!(facts.antardasha_lord(), Some("Mercury"));
        assert_eq!(facts.placement("Mars").unwrap().house, Some(1));
        assert_eq!(facts.houses.get(&2).unwrap().lord, Some("Venus"));
        assert_eq!(facts.yoga_summaries.len(), 1);
    }

    #[test]
    fn ascendant_is_excluded_from_placements() {
        let facts = extract_facts(&sample_compute(), now());
        assert!(facts.placement("Ascendant").is_none());
        assert_eq!(facts.placements.len(), 2);
    }

    #[test]
    fn renders_template_sections() {
        let facts = extract_facts(&sample_compute(), now());
        let text = render_analysis(&facts);
        assert!(text.contains("## BPHS-Grounded Natal Summary"));
        assert!(text.contains("### Vimshottari"));
        assert!(text.contains("Mahadasha: Saturn"));
        assert!(text.contains("## Client Report Mode"));
        assert!(text.contains("## House-by-House (Story)"));
        assert!(text.contains("Saturn in the 2nd"));
    }

    #[test]
    fn fact_summary_lists_available_charts() {
        let facts = extract_facts(&sample_compute(), now());
        let summary = fact_summary(&facts, &["lagna".to_string(), "navamsa".to_string()]);
        assert!(summary.contains("Ascendant: Mesha (Aries)"));
        assert!(summary.contains("Available charts: lagna, navamsa"));
        assert!(summary.contains("- Mars in Mesha (house 1)"));
    }

    #[test]
    fn extracts_trailing_json_rationale() {
        let text = "Report body.\n```json\n{\"strengths\": [\"focus\"]}\n```";
        let (clean, rationale) = extract_rationale(text);
        assert_eq!(clean, "Report body.");
        assert_eq!(rationale.unwrap()["strengths"][0], "focus");
    }

    #[test]
    fn discards_unparseable_rationale() {
        let text = "Report body.\n```json\nnot json\n```";
        let (clean, rationale) = extract_rationale(text);
        assert!(rationale.is_none());
        assert!(clean.contains("Report body."));
    }

    #[test]
    fn no_fence_means_no_rationale() {
        let (clean, rationale) = extract_rationale("plain text");
        assert_eq!(clean, "plain text");
        assert!(rationale.is_none());
    }
}
