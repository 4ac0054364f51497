//! Reader for per-species `<species>.pos` placement files.
//!
//! Standard species store a leading count followed by `x y z rotX rotY rotZ` records in
//! micrometres and degrees. Special-seeded species store one cell per line as a
//! sequence of raw `x y z` vertex triples.

use crate::cell_type::CellTypes;
use anyhow::{Context, Result};
use glam::DVec3;
use hemo_common::{IBox3, MechanicsVariant};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Position and orientation of one templated cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRecord {
    pub cell_id: u32,
    /// Target position of the mesh centre (µm)
    pub position_um: DVec3,
    /// Euler angles (rad) in the simulation's left-handed convention
    pub rotation: DVec3,
}

/// One special-seeded cell given by its raw vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    pub cell_id: u32,
    pub vertices_um: Vec<DVec3>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeciesPlacements {
    Templated(Vec<PlacementRecord>),
    Raw(Vec<RawCell>),
}

impl SpeciesPlacements {
    pub fn len(&self) -> usize {
        match self {
            SpeciesPlacements::Templated(r) => r.len(),
            SpeciesPlacements::Raw(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything read for one sub-domain, indexed by species id.
#[derive(Debug, Clone)]
pub struct PlacementSet {
    pub species: Vec<SpeciesPlacements>,
    /// Sum of the declared counts of all files, including records discarded locally.
    pub declared_cells: u32,
}

/// Discards templated records whose centre lies outside the local sub-domain grown by
/// the particle envelope.
#[derive(Debug, Clone, Copy)]
pub struct RegionFilter {
    pub real_domain: IBox3,
    pub envelope: i32,
    pub um_to_lu: f64,
}

impl RegionFilter {
    pub fn accepts(&self, position_um: DVec3) -> bool {
        let p = position_um * self.um_to_lu;
        let lo = (self.real_domain.min - glam::IVec3::splat(self.envelope)).as_dvec3();
        let hi = (self.real_domain.max + glam::IVec3::splat(self.envelope)).as_dvec3();
        !(p.x < lo.x || p.x > hi.x || p.y < lo.y || p.y > hi.y || p.z < lo.z || p.z > hi.z)
    }
}

/// Converts file angles (degrees, right-handed) to simulation angles (radians, left-handed).
pub fn convert_rotation(degrees: DVec3) -> DVec3 {
    degrees * (std::f64::consts::PI / 180.0) * -1.0
}

pub struct PlacementFileReader {
    filter: Option<RegionFilter>,
}

impl PlacementFileReader {
    pub fn new(filter: Option<RegionFilter>) -> Self {
        PlacementFileReader { filter }
    }

    /// Reads the placement files of all species in declaration order.
    ///
    /// Cell ids are assigned sequentially across species starting at 0, so every
    /// sub-domain reading the same files derives the same ids.
    pub fn read_all(&self, cell_types: &CellTypes, paths: &[PathBuf]) -> Result<PlacementSet> {
        let mut next_id = 0u32;
        let mut declared_cells = 0u32;
        let mut species = Vec::with_capacity(cell_types.len());
        for (cell_type, path) in cell_types.iter().zip(paths) {
            let Some(text) = read_optional(path)? else {
                warn!(
                    "Particle positions input file {} for '{}' does not exist, seeding zero cells.",
                    path.display(), cell_type.name
                );
                species.push(match cell_type.mechanics_variant {
                    MechanicsVariant::Standard => SpeciesPlacements::Templated(Vec::new()),
                    MechanicsVariant::SpecialSeeded => SpeciesPlacements::Raw(Vec::new()),
                });
                continue;
            };
            let (placements, declared) = match cell_type.mechanics_variant {
                MechanicsVariant::Standard => {
                    let (records, declared) = self.parse_templated(&text, &mut next_id);
                    (SpeciesPlacements::Templated(records), declared)
                }
                MechanicsVariant::SpecialSeeded => {
                    let (cells, declared) = parse_raw(&text, &mut next_id);
                    (SpeciesPlacements::Raw(cells), declared)
                }
            };
            info!(
                "Particle count in file ({}): {}, kept {} for this sub-domain.",
                cell_type.name, declared, placements.len()
            );
            declared_cells += declared;
            species.push(placements);
        }
        Ok(PlacementSet { species, declared_cells })
    }

    /// Parses a standard placement file. Returns the kept records and the declared count.
    ///
    /// Every parsed record consumes a cell id, including records discarded by the region
    /// filter, which are compacted out of the list.
    pub fn parse_templated(&self, text: &str, next_id: &mut u32) -> (Vec<PlacementRecord>, u32) {
        let mut tokens = text.split_whitespace();
        let declared = match tokens.next().map(str::parse::<u32>) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                warn!("Placement file has an invalid particle count: {}", e);
                return (Vec::new(), 0);
            }
            None => return (Vec::new(), 0),
        };

        let mut records = Vec::with_capacity(declared as usize);
        let mut discarded = 0u32;
        for i in 0..declared {
            let mut fields = [0.0f64; 6];
            for field in fields.iter_mut() {
                match tokens.next().map(str::parse::<f64>) {
                    Some(Ok(v)) => *field = v,
                    Some(Err(_)) | None => {
                        warn!(
                            "Placement file declares {} records but record {} is missing or malformed; stopping.",
                            declared, i
                        );
                        return (records, declared);
                    }
                }
            }
            let record = PlacementRecord {
                cell_id: *next_id,
                position_um: DVec3::new(fields[0], fields[1], fields[2]),
                rotation: convert_rotation(DVec3::new(fields[3], fields[4], fields[5])),
            };
            *next_id += 1;

            match &self.filter {
                Some(filter) if !filter.accepts(record.position_um) => discarded += 1,
                _ => records.push(record),
            }
        }
        if discarded > 0 {
            debug!("Discarded {} records outside the local sub-domain envelope.", discarded);
        }
        (records, declared)
    }
}

/// Parses a special-seeded file: a count line followed by one line of vertex triples per
/// cell. Malformed lines are kept with the vertices read before the error; the
/// completeness filter removes such cells later.
pub fn parse_raw(text: &str, next_id: &mut u32) -> (Vec<RawCell>, u32) {
    let mut lines = text.lines();
    let declared = match lines.next().map(|l| l.trim().parse::<u32>()) {
        Some(Ok(n)) => n,
        Some(Err(e)) => {
            warn!("Special-seeded placement file has an invalid cell count: {}", e);
            return (Vec::new(), 0);
        }
        None => return (Vec::new(), 0),
    };

    let mut cells = Vec::with_capacity(declared as usize);
    for i in 0..declared {
        let Some(line) = lines.next() else {
            warn!("Special-seeded file declares {} cells but only {} lines follow.", declared, i);
            break;
        };
        let values: Vec<&str> = line.split_whitespace().collect();
        let mut vertices_um = Vec::with_capacity(values.len() / 3);
        for triple in values.chunks(3) {
            let parsed: Vec<f64> = triple.iter().map_while(|t| t.parse::<f64>().ok()).collect();
            if parsed.len() != 3 {
                warn!(
                    "Special-seeded cell {} line consumed too few values ({} of 3 in a vertex); keeping {} vertices.",
                    i, parsed.len(), vertices_um.len()
                );
                break;
            }
            vertices_um.push(DVec3::new(parsed[0], parsed[1], parsed[2]));
        }
        cells.push(RawCell { cell_id: *next_id, vertices_um });
        *next_id += 1;
    }
    (cells, declared)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read placement file '{}'", path.display())),
    }
}
