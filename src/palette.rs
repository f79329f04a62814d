use crate::schema::{Period, PeriodType};
use serde::Serialize;

/// Colour classification of a report column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PeriodClass {
    Actual,
    Budget,
    Estimate,
    Forecast,
    CustomRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Palette {
    pub primary: &'static str,
    pub light: &'static str,
    pub text: &'static str,
}

const fn palette(primary: &'static str, light: &'static str, text: &'static str) -> Palette {
    Palette {
        primary,
        light,
        text,
    }
}

const CLASS_PALETTES: [(PeriodClass, Palette); 5] = [
    (PeriodClass::Actual, palette("#1f4e79", "#dbe8f5", "#ffffff")),
    (PeriodClass::Budget, palette("#2e7d32", "#e3f1e4", "#ffffff")),
    (PeriodClass::Estimate, palette("#ef6c00", "#fdebd9", "#ffffff")),
    (PeriodClass::Forecast, palette("#6a1b9a", "#efe2f5", "#ffffff")),
    (PeriodClass::CustomRange, palette("#00838f", "#d9f1f3", "#ffffff")),
];

const NAMED_PALETTES: [(&str, Palette); 8] = [
    ("blue", palette("#1f4e79", "#dbe8f5", "#ffffff")),
    ("green", palette("#2e7d32", "#e3f1e4", "#ffffff")),
    ("orange", palette("#ef6c00", "#fdebd9", "#ffffff")),
    ("purple", palette("#6a1b9a", "#efe2f5", "#ffffff")),
    ("teal", palette("#00838f", "#d9f1f3", "#ffffff")),
    ("red", palette("#c62828", "#f8dede", "#ffffff")),
    ("gold", palette("#f9a825", "#fef3d6", "#1a1a1a")),
    ("gray", palette("#546e7a", "#e6ebee", "#ffffff")),
];

pub fn classify(period: &Period) -> PeriodClass {
    if period.is_custom_range() {
        return PeriodClass::CustomRange;
    }
    match period.period_type {
        PeriodType::Actual => PeriodClass::Actual,
        PeriodType::Budget => PeriodClass::Budget,
        PeriodType::Estimate => PeriodClass::Estimate,
        PeriodType::Forecast => PeriodClass::Forecast,
    }
}

pub fn class_palette(class: PeriodClass) -> Palette {
    CLASS_PALETTES
        .iter()
        .find(|(c, _)| *c == class)
        .map(|(_, p)| *p)
        .unwrap_or(CLASS_PALETTES[0].1)
}

pub fn named_palette(tag: &str) -> Option<Palette> {
    let tag = tag.trim().to_ascii_lowercase();
    NAMED_PALETTES
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, p)| *p)
}

/// The column's `custom_color` tag wins when it names a known palette.
pub fn palette_for(period: &Period) -> Palette {
    period
        .custom_color
        .as_deref()
        .and_then(named_palette)
        .unwrap_or_else(|| class_palette(classify(period)))
}
