//! Inline SVG rendering of a reshaped chart in the two classical layouts.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::charts::{ChartData, PlanetPlacement};
use crate::errors::{AppError, Result};

const SIZE: u32 = 400;

const SIGN_ORDER: &[&str] = &[
    "Aries",
    "Taurus",
    "Gemini",
    "Cancer",
    "Leo",
    "Virgo",
    "Libra",
    "Scorpio",
    "Sagittarius",
    "Capricorn",
    "Aquarius",
    "Pisces",
];

fn sign_number(sign: &str) -> Option<usize> {
    SIGN_ORDER.iter().position(|s| *s == sign).map(|i| i + 1)
}

fn planet_abbrev(name: &str) -> &str {
    match name {
        "Sun" => "Su",
        "Moon" => "Mo",
        "Mars" => "Ma",
        "Mercury" => "Me",
        "Jupiter" => "Ju",
        "Venus" => "Ve",
        "Saturn" => "Sa",
        "Rahu" => "Ra",
        "Ketu" => "Ke",
        "Ascendant" => "As",
        other => {
            let end = other
                .char_indices()
                .nth(2)
                .map(|(i, _)| i)
                .unwrap_or(other.len());
            &other[..end]
        }
    }
}

/// Render a chart as an inline SVG document.
///
/// `style` is `north-indian` (houses fixed, signs rotate) or `south-indian`
/// (signs fixed, planets placed by sign). Anything else is unsupported.
pub fn render_chart(chart: &ChartData, style: &str) -> Result<String> {
    match style {
        "north-indian" | "north" => Ok(render_north(chart)),
        "south-indian" | "south" => Ok(render_south(chart)),
        other => Err(AppError::NotImplemented(format!(
            "chart_style '{}' not supported",
            other
        ))),
    }
}

fn svg_header(title: &str) -> String {
    format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{s}\" height=\"{s}\" ",
            "viewBox=\"0 0 {s} {s}\" font-family=\"sans-serif\">\n",
            "<title>{t}</title>\n",
            "<rect x=\"1\" y=\"1\" width=\"{i}\" height=\"{i}\" fill=\"#fffdf5\" stroke=\"#333\" stroke-width=\"2\"/>\n"
        ),
        s = SIZE,
        i = SIZE - 2,
        t = title
    )
}

/// Anchor points for the 12 houses of the diamond layout, house 1 at top.
const NORTH_ANCHORS: &[(u32, u32)] = &[
    (200, 110),
    (100, 52),
    (48, 110),
    (110, 200),
    (48, 295),
    (100, 360),
    (200, 300),
    (300, 360),
    (352, 295),
    (295, 200),
    (352, 110),
    (300, 52),
];

fn render_north(chart: &ChartData) -> String {
    let mut by_house: BTreeMap<u32, Vec<&PlanetPlacement>> = BTreeMap::new();
    let mut house_signs: BTreeMap<u32, &str> = BTreeMap::new();
    for p in &chart.placements {
        if let Some(h) = p.house {
            by_house.entry(h).or_default().push(p);
            house_signs.entry(h).or_insert(p.sign.as_str());
        }
    }

    let mut svg = svg_header(&chart.chart_name);
    // Diagonals plus the inner diamond give the 12 classical house fields
    svg.push_str("<line x1=\"2\" y1=\"2\" x2=\"398\" y2=\"398\" stroke=\"#333\"/>\n");
    svg.push_str("<line x1=\"398\" y1=\"2\" x2=\"2\" y2=\"398\" stroke=\"#333\"/>\n");
    svg.push_str(
        "<polygon points=\"200,2 398,200 200,398 2,200\" fill=\"none\" stroke=\"#333\"/>\n",
    );

    for house in 1..=12u32 {
        let (x, y) = NORTH_ANCHORS[(house - 1) as usize];
        if let Some(sign) = house_signs.get(&house) {
            if let Some(num) = sign_number(sign) {
                let _ = writeln!(
                    svg,
                    "<text x=\"{}\" y=\"{}\" font-size=\"10\" fill=\"#999\" text-anchor=\"middle\">{}</text>",
                    x,
                    y.saturating_sub(14),
                    num
                );
            }
        }
        if let Some(planets) = by_house.get(&house) {
            let label = planets
                .iter()
                .map(|p| {
                    if p.retrograde {
                        format!("{}\u{20d7}", planet_abbrev(&p.planet))
                    } else {
                        planet_abbrev(&p.planet).to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                svg,
                "<text x=\"{}\" y=\"{}\" font-size=\"13\" fill=\"#222\" text-anchor=\"middle\">{}</text>",
                x, y, label
            );
        }
    }
    svg.push_str("</svg>\n");
    svg
}

/// Fixed sign cells of the 4x4 south-Indian grid, as (column, row).
const SOUTH_CELLS: &[(&str, u32, u32)] = &[
    ("Pisces", 0, 0),
    ("Aries", 1, 0),
    ("Taurus", 2, 0),
    ("Gemini", 3, 0),
    ("Aquarius", 0, 1),
    ("Cancer", 3, 1),
    ("Capricorn", 0, 2),
    ("Leo", 3, 2),
    ("Sagittarius", 0, 3),
    ("Scorpio", 1, 3),
    ("Libra", 2, 3),
    ("Virgo", 3, 3),
];

fn render_south(chart: &ChartData) -> String {
    let cell = SIZE / 4;
    let mut by_sign: BTreeMap<&str, Vec<&PlanetPlacement>> = BTreeMap::new();
    for p in &chart.placements {
        by_sign.entry(p.sign.as_str()).or_default().push(p);
    }

    let mut svg = svg_header(&chart.chart_name);
    for (sign, col, row) in SOUTH_CELLS {
        let x = col * cell;
        let y = row * cell;
        let _ = writeln!(
            svg,
            "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"none\" stroke=\"#333\"/>",
            x, y, cell, cell
        );
        let _ = writeln!(
            svg,
            "<text x=\"{}\" y=\"{}\" font-size=\"9\" fill=\"#999\">{}</text>",
            x + 4,
            y + 12,
            sign
        );
        if let Some(planets) = by_sign.get(sign) {
            for (idx, p) in planets.iter().enumerate() {
                let label = if p.retrograde {
                    format!("{}\u{20d7}", planet_abbrev(&p.planet))
                } else {
                    planet_abbrev(&p.planet).to_string()
                };
                let _ = writeln!(
                    svg,
                    "<text x=\"{}\" y=\"{}\" font-size=\"13\" fill=\"#222\">{}</text>",
                    x + 8 + (idx as u32 % 3) * 30,
                    y + 36 + (idx as u32 / 3) * 18,
                    label
                );
            }
        }
    }
    let _ = writeln!(
        svg,
        "<text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"#555\" text-anchor=\"middle\">{}</text>",
        SIZE / 2,
        SIZE / 2,
        chart.chart_name
    );
    svg.push_str("</svg>\n");
    svg
}
