//! Advisory readings of text cells
//!
//! Labels in calculation sheets name physical quantities ("Design discharge",
//! "Slab thickness"). These helpers map such labels to a quantity with its
//! usual unit, and gather labelled cells into engineering data groups. Both
//! are keyword matches and only ever hints.

use super::integration::{Advisory, MatchSource};
use crate::types::{Document, Literal, QualifiedAddress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keyword → physical meaning, checked in order
const MEANINGS: &[(&str, &str)] = &[
    ("span", "Effective Span Length (m)"),
    ("width", "Bridge Width (m)"),
    ("discharge", "Design Discharge (cumecs)"),
    ("velocity", "Design Velocity (m/s)"),
    ("hfl", "High Flood Level (m)"),
    ("moment", "Bending Moment (kN-m)"),
    ("pressure", "Soil Pressure (kN/m²)"),
    ("factor", "Safety Factor"),
    ("grade", "Material Grade"),
    ("thickness", "Section Thickness (m)"),
    ("reinforcement", "Steel Reinforcement (mm²)"),
    ("concrete", "Concrete Grade/Strength"),
    ("load", "Applied Load (kN)"),
    ("deflection", "Deflection (mm)"),
    ("stress", "Stress (N/mm²)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataGroup {
    Stability,
    Hydraulic,
    Material,
    Geometry,
}

impl DataGroup {
    pub const ALL: [DataGroup; 4] = [
        DataGroup::Stability,
        DataGroup::Hydraulic,
        DataGroup::Material,
        DataGroup::Geometry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataGroup::Stability => "stability",
            DataGroup::Hydraulic => "hydraulic",
            DataGroup::Material => "material",
            DataGroup::Geometry => "geometry",
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            DataGroup::Stability => &[
                "overturning",
                "moment",
                "factor",
                "safety",
                "vertical",
                "horizontal",
                "load",
                "pressure",
            ],
            DataGroup::Hydraulic => &[
                "discharge", "velocity", "afflux", "scour", "hfl", "water", "flow", "regime",
            ],
            DataGroup::Material => &[
                "concrete", "steel", "grade", "strength", "modulus", "density", "yield",
            ],
            DataGroup::Geometry => &[
                "span",
                "width",
                "thickness",
                "height",
                "length",
                "dimension",
                "spacing",
            ],
        }
    }
}

impl fmt::Display for DataGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn text_cells(document: &Document) -> impl Iterator<Item = (QualifiedAddress, String)> + '_ {
    document.cells().iter().filter_map(move |cell| match &cell.value {
        Some(Literal::Text(text)) if !cell.is_formula() => Some((
            document.qualify(&cell.sheet, cell.address),
            text.to_lowercase(),
        )),
        _ => None,
    })
}

/// Physical meaning of each text cell that names a known quantity.
/// The first matching keyword wins.
pub fn parameter_meanings(document: &Document) -> BTreeMap<QualifiedAddress, Advisory<&'static str>> {
    text_cells(document)
        .filter_map(|(address, text)| {
            MEANINGS
                .iter()
                .find(|(keyword, _)| text.contains(keyword))
                .map(|(keyword, meaning)| {
                    (address, Advisory::new(*meaning, *keyword, MatchSource::CellText))
                })
        })
        .collect()
}

/// Text cells grouped by engineering data group. A cell can belong to
/// several groups; groups with no cells are left out.
pub fn data_groups(document: &Document) -> BTreeMap<DataGroup, Vec<Advisory<QualifiedAddress>>> {
    let mut groups: BTreeMap<DataGroup, Vec<Advisory<QualifiedAddress>>> = BTreeMap::new();

    for (address, text) in text_cells(document) {
        for group in DataGroup::ALL {
            if let Some(keyword) = group.keywords().iter().find(|kw| text.contains(*kw)) {
                groups.entry(group).or_default().push(Advisory::new(
                    address.clone(),
                    *keyword,
                    MatchSource::CellText,
                ));
            }
        }
    }

    for cells in groups.values_mut() {
        cells.sort();
    }
    groups
}
