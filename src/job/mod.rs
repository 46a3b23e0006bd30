//! Job kinds and the closed descriptor types handed to the worker.
//!
//! A [`JobDescriptor`] is fully validated. Its [`to_args`](JobDescriptor::to_args)
//! is the only place where fields become worker flags.

pub mod request;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use request::{Origin, is_valid_run_id, validate_request};

/// Flag appended to every worker invocation to request status lines on stderr.
pub const EMIT_PROGRESS_FLAG: &str = "--emit-progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CreateMap,
    MapPreview,
    MapReambulation,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::CreateMap,
        JobKind::MapPreview,
        JobKind::MapReambulation,
    ];

    /// Route segment, tracker label, and `--request_type` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CreateMap => "create_map",
            JobKind::MapPreview => "map_preview",
            JobKind::MapReambulation => "map_reambulation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_map" => Ok(JobKind::CreateMap),
            "map_preview" => Ok(JobKind::MapPreview),
            "map_reambulation" => Ok(JobKind::MapReambulation),
            other => Err(format!(
                "Unknown job kind '{}' (expected create_map, map_preview or map_reambulation)",
                other
            )),
        }
    }
}

/// Background raster drawn under the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterType {
    #[serde(rename = "dtk50")]
    Dtk50,
    #[serde(rename = "dtk25")]
    Dtk25,
    #[serde(rename = "osm")]
    Osm,
    #[serde(rename = "otm")]
    Otm,
    #[serde(rename = "")]
    Empty,
}

impl RasterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RasterType::Dtk50 => "dtk50",
            RasterType::Dtk25 => "dtk25",
            RasterType::Osm => "osm",
            RasterType::Otm => "otm",
            RasterType::Empty => "",
        }
    }
}

/// Extent, projection and paper size shared by every job kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapArea {
    pub map_w: f64,
    pub map_s: f64,
    pub map_e: f64,
    pub map_n: f64,
    pub epsg: String,
    pub raster_type: RasterType,
    pub raster_source: String,
    pub map_size_w_m: f64,
    pub map_size_h_m: f64,
    pub output_folder: PathBuf,
}

/// A printable map sheet: an area plus layout and annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSheet {
    pub area: MapArea,
    pub target_scale: u32,
    pub edge_wgs84: bool,
    pub naslov1: String,
    pub naslov2: String,
    pub dodatno: String,
    pub control_points: String,
    pub slikal: Option<PathBuf>,
    pub slikad: Option<PathBuf>,
}

/// One validated worker invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDescriptor {
    MapPreview { id: String, area: MapArea },
    CreateMap { id: String, sheet: Box<MapSheet> },
    MapReambulation { id: String, area: MapArea },
}

impl JobDescriptor {
    pub fn map_preview(area: MapArea) -> Self {
        let id = derive_run_id(JobKind::MapPreview, &area);
        JobDescriptor::MapPreview { id, area }
    }

    pub fn create_map(sheet: MapSheet) -> Self {
        let id = derive_run_id(JobKind::CreateMap, &sheet);
        JobDescriptor::CreateMap {
            id,
            sheet: Box::new(sheet),
        }
    }

    pub fn map_reambulation(area: MapArea) -> Self {
        let id = derive_run_id(JobKind::MapReambulation, &area);
        JobDescriptor::MapReambulation { id, area }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobDescriptor::MapPreview { .. } => JobKind::MapPreview,
            JobDescriptor::CreateMap { .. } => JobKind::CreateMap,
            JobDescriptor::MapReambulation { .. } => JobKind::MapReambulation,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            JobDescriptor::MapPreview { id, .. }
            | JobDescriptor::CreateMap { id, .. }
            | JobDescriptor::MapReambulation { id, .. } => id,
        }
    }

    pub fn area(&self) -> &MapArea {
        match self {
            JobDescriptor::MapPreview { area, .. } | JobDescriptor::MapReambulation { area, .. } => {
                area
            }
            JobDescriptor::CreateMap { sheet, .. } => &sheet.area,
        }
    }

    /// Worker flags as `--key value` pairs, in a fixed order.
    ///
    /// Does not include [`EMIT_PROGRESS_FLAG`]; the runner appends it.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(40);
        let area = self.area();

        push_flag(&mut args, "id", self.run_id());
        push_flag(&mut args, "request_type", self.kind().as_str());
        push_flag(&mut args, "map_w", area.map_w);
        push_flag(&mut args, "map_s", area.map_s);
        push_flag(&mut args, "map_e", area.map_e);
        push_flag(&mut args, "map_n", area.map_n);
        push_flag(&mut args, "epsg", &area.epsg);
        push_flag(&mut args, "raster_type", area.raster_type.as_str());
        push_flag(&mut args, "raster_source", &area.raster_source);
        push_flag(&mut args, "map_size_w_m", area.map_size_w_m);
        push_flag(&mut args, "map_size_h_m", area.map_size_h_m);
        push_flag(&mut args, "output_folder", area.output_folder.to_string_lossy());

        if let JobDescriptor::CreateMap { sheet, .. } = self {
            push_flag(&mut args, "target_scale", sheet.target_scale);
            push_flag(&mut args, "edge_wgs84", sheet.edge_wgs84);
            push_flag(&mut args, "naslov1", &sheet.naslov1);
            push_flag(&mut args, "naslov2", &sheet.naslov2);
            push_flag(&mut args, "dodatno", &sheet.dodatno);
            push_flag(&mut args, "control_points", &sheet.control_points);
            if let Some(path) = &sheet.slikal {
                push_flag(&mut args, "slikal", path.to_string_lossy());
            }
            if let Some(path) = &sheet.slikad {
                push_flag(&mut args, "slikad", path.to_string_lossy());
            }
        }
        args
    }
}

fn push_flag(args: &mut Vec<String>, key: &str, value: impl fmt::Display) {
    args.push(format!("--{}", key));
    args.push(value.to_string());
}

/// First 32 hex chars of SHA-256 over the kind and the payload's JSON.
///
/// Identical requests of the same kind always map to the same run.
fn derive_run_id(kind: JobKind, payload: &impl Serialize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    // Serializing plain structs of strings and numbers cannot fail.
    hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect()
}
