//! Request bodies and their validation into [`JobDescriptor`]s.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::{JobDescriptor, JobKind, MapArea, MapSheet, RasterType};
use crate::config::StorageSection;
use crate::errors::ValidationError;

const OSM_TILES: &str = "https://a.tile.openstreetmap.org/{z}/{x}/{y}.png";
const OTM_TILES: &str = "https://tile.opentopomap.org/{z}/{x}/{y}.png";

static EPSG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^EPSG:\d+$|^Brez$").expect("valid epsg regex"));

static RUN_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{32}$").expect("valid run id regex"));

/// Whether `id` looks like a run id. Routes reject anything else.
pub fn is_valid_run_id(id: &str) -> bool {
    RUN_ID.is_match(id)
}

/// Where a request came from.
///
/// Local requests (the `run` command) may reference image files on disk;
/// remote ones may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapAreaRequest {
    pub map_w: f64,
    pub map_s: f64,
    pub map_e: f64,
    pub map_n: f64,
    pub epsg: String,
    #[serde(default)]
    pub raster_type: String,
    pub map_size_w_m: f64,
    pub map_size_h_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMapRequest {
    #[serde(flatten)]
    pub area: MapAreaRequest,
    pub target_scale: f64,
    #[serde(default)]
    pub edge_wgs84: bool,
    #[serde(default)]
    pub naslov1: String,
    #[serde(default)]
    pub naslov2: String,
    #[serde(default)]
    pub dodatno: String,
    #[serde(default)]
    pub control_points: String,
    #[serde(default)]
    pub slikal: Option<PathBuf>,
    #[serde(default)]
    pub slikad: Option<PathBuf>,
}

/// Parse and validate a JSON request body for `kind`.
pub fn validate_request(
    kind: JobKind,
    body: &[u8],
    storage: &StorageSection,
    origin: Origin,
) -> Result<JobDescriptor, ValidationError> {
    match kind {
        JobKind::MapPreview => {
            let req: MapAreaRequest = parse_body(body)?;
            Ok(JobDescriptor::map_preview(validate_area(&req, storage)?))
        }
        JobKind::MapReambulation => {
            let req: MapAreaRequest = parse_body(body)?;
            Ok(JobDescriptor::map_reambulation(validate_area(&req, storage)?))
        }
        JobKind::CreateMap => {
            let req: CreateMapRequest = parse_body(body)?;
            Ok(JobDescriptor::create_map(validate_sheet(req, storage, origin)?))
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))
}

pub fn validate_area(
    req: &MapAreaRequest,
    storage: &StorageSection,
) -> Result<MapArea, ValidationError> {
    for (field, value) in [
        ("map_w", req.map_w),
        ("map_s", req.map_s),
        ("map_e", req.map_e),
        ("map_n", req.map_n),
        ("map_size_w_m", req.map_size_w_m),
        ("map_size_h_m", req.map_size_h_m),
    ] {
        if !value.is_finite() {
            return Err(ValidationError::invalid(field, "not a number"));
        }
    }
    if req.map_w >= req.map_e {
        return Err(ValidationError::invalid("map_w", "must be smaller than map_e"));
    }
    if req.map_s >= req.map_n {
        return Err(ValidationError::invalid("map_s", "must be smaller than map_n"));
    }
    if !EPSG.is_match(&req.epsg) {
        return Err(ValidationError::invalid(
            "epsg",
            "expected EPSG:<code> or Brez",
        ));
    }

    let (raster_type, raster_source) = resolve_raster(&req.raster_type, storage)?;

    check_size("map_size_w_m", req.map_size_w_m)?;
    check_size("map_size_h_m", req.map_size_h_m)?;

    Ok(MapArea {
        map_w: req.map_w,
        map_s: req.map_s,
        map_e: req.map_e,
        map_n: req.map_n,
        epsg: req.epsg.clone(),
        raster_type,
        raster_source,
        map_size_w_m: req.map_size_w_m,
        map_size_h_m: req.map_size_h_m,
        output_folder: storage.temp_folder.clone(),
    })
}

fn resolve_raster(
    raster_type: &str,
    storage: &StorageSection,
) -> Result<(RasterType, String), ValidationError> {
    let folder = |path: &Option<PathBuf>, name: &str| {
        path.as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ValidationError::invalid(
                    "raster_type",
                    format!("{} raster is not available on this server", name),
                )
            })
    };

    match raster_type {
        "dtk50" => Ok((RasterType::Dtk50, folder(&storage.dtk50_folder, "dtk50")?)),
        "dtk25" => Ok((RasterType::Dtk25, folder(&storage.dtk25_folder, "dtk25")?)),
        "osm" => Ok((RasterType::Osm, OSM_TILES.to_string())),
        "otm" => Ok((RasterType::Otm, OTM_TILES.to_string())),
        "" => Ok((RasterType::Empty, String::new())),
        other => Err(ValidationError::invalid(
            "raster_type",
            format!("unknown raster layer '{}'", other),
        )),
    }
}

fn check_size(field: &'static str, meters: f64) -> Result<(), ValidationError> {
    if meters > 1.0 {
        return Err(ValidationError::invalid(field, "map is too large (max 1 m)"));
    }
    if meters < 0.1 {
        return Err(ValidationError::invalid(field, "map is too small (min 0.1 m)"));
    }
    Ok(())
}

pub fn validate_sheet(
    req: CreateMapRequest,
    storage: &StorageSection,
    origin: Origin,
) -> Result<MapSheet, ValidationError> {
    let area = validate_area(&req.area, storage)?;

    if req.target_scale.fract() != 0.0 || !(1000.0..=100_000.0).contains(&req.target_scale) {
        return Err(ValidationError::invalid(
            "target_scale",
            "scale must be between 1:1000 and 1:100000",
        ));
    }
    check_len("naslov1", &req.naslov1, 30)?;
    check_len("naslov2", &req.naslov2, 30)?;
    check_len("dodatno", &req.dodatno, 70)?;
    check_control_points(&req.control_points)?;

    if origin == Origin::Remote {
        for (field, value) in [("slikal", &req.slikal), ("slikad", &req.slikad)] {
            if value.is_some() {
                return Err(ValidationError::invalid(
                    field,
                    "image files can only be attached to local runs",
                ));
            }
        }
    }

    Ok(MapSheet {
        area,
        target_scale: req.target_scale as u32,
        edge_wgs84: req.edge_wgs84,
        naslov1: req.naslov1,
        naslov2: req.naslov2,
        dodatno: req.dodatno,
        control_points: req.control_points,
        slikal: req.slikal,
        slikad: req.slikad,
    })
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::invalid(
            field,
            format!("too long (max {} characters)", max),
        ));
    }
    Ok(())
}

fn check_control_points(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Ok(());
    }
    let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|_| {
        ValidationError::invalid("control_points", "not valid JSON")
    })?;
    if !parsed.get("cps").is_some_and(serde_json::Value::is_array) {
        return Err(ValidationError::invalid(
            "control_points",
            "expected an object with a 'cps' array",
        ));
    }
    Ok(())
}
