//! GeoJSON reading and writing for flood polygons and areas of interest

use serde_json::{json, Value};
use std::path::Path;

use crate::types::{AreaOfInterest, FeatureCollection, FloodError, FloodResult, Polygon};

fn polygon_coordinates(polygon: &Polygon) -> Value {
    let mut rings = Vec::with_capacity(1 + polygon.holes.len());
    rings.push(json!(polygon.exterior));
    for hole in &polygon.holes {
        rings.push(json!(hole));
    }
    Value::Array(rings)
}

/// Feature collection with one attribute-free Polygon feature per polygon
pub fn to_geojson(collection: &FeatureCollection) -> Value {
    let features: Vec<Value> = collection
        .polygons
        .iter()
        .map(|polygon| {
            json!({
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": polygon_coordinates(polygon),
                }
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

pub fn write_geojson<P: AsRef<Path>>(path: P, collection: &FeatureCollection) -> FloodResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&to_geojson(collection))?;
    std::fs::write(path, text)?;
    log::info!("Wrote {} polygons to {}", collection.len(), path.display());
    Ok(())
}

fn parse_ring(value: &Value) -> FloodResult<Vec<[f64; 2]>> {
    let points = value
        .as_array()
        .ok_or_else(|| FloodError::InvalidGeometry("ring is not an array".to_string()))?;

    points
        .iter()
        .map(|point| {
            let coords = point.as_array().filter(|c| c.len() >= 2);
            match coords.and_then(|c| Some([c[0].as_f64()?, c[1].as_f64()?])) {
                Some(p) => Ok(p),
                None => Err(FloodError::InvalidGeometry(format!("invalid position {}", point))),
            }
        })
        .collect()
}

fn parse_polygon(coordinates: &Value) -> FloodResult<Polygon> {
    let rings = coordinates
        .as_array()
        .ok_or_else(|| FloodError::InvalidGeometry("polygon coordinates are not an array".to_string()))?;
    let (exterior, holes) = rings
        .split_first()
        .ok_or_else(|| FloodError::InvalidGeometry("polygon has no rings".to_string()))?;

    Ok(Polygon {
        exterior: parse_ring(exterior)?,
        holes: holes.iter().map(parse_ring).collect::<FloodResult<_>>()?,
    })
}

fn collect_geometry(geometry: &Value, out: &mut Vec<Polygon>) -> FloodResult<()> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or_default();
    let coordinates = geometry.get("coordinates").unwrap_or(&Value::Null);

    match kind {
        "Polygon" => out.push(parse_polygon(coordinates)?),
        "MultiPolygon" => {
            let parts = coordinates
                .as_array()
                .ok_or_else(|| FloodError::InvalidGeometry("multipolygon coordinates are not an array".to_string()))?;
            for part in parts {
                out.push(parse_polygon(part)?);
            }
        }
        "GeometryCollection" => {
            if let Some(members) = geometry.get("geometries").and_then(Value::as_array) {
                for member in members {
                    collect_geometry(member, out)?;
                }
            }
        }
        other => log::debug!("Skipping non-polygon geometry '{}'", other),
    }
    Ok(())
}

/// Polygons of a GeoJSON document: FeatureCollection, Feature or bare geometry
pub fn feature_collection_from_value(value: &Value) -> FloodResult<FeatureCollection> {
    let mut polygons = Vec::new();

    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| FloodError::InvalidGeometry("feature collection without features".to_string()))?;
            for feature in features {
                if let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) {
                    collect_geometry(geometry, &mut polygons)?;
                }
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_geometry(geometry, &mut polygons)?;
            }
        }
        Some(_) => collect_geometry(value, &mut polygons)?,
        None => return Err(FloodError::InvalidGeometry("GeoJSON object without a type".to_string())),
    }

    Ok(FeatureCollection { polygons })
}

pub fn read_geojson<P: AsRef<Path>>(path: P) -> FloodResult<FeatureCollection> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    feature_collection_from_value(&value)
}

/// Area of interest from the last polygon in a GeoJSON document
///
/// When several shapes were drawn, the most recent one is used; holes are ignored.
pub fn aoi_from_value(value: &Value) -> FloodResult<AreaOfInterest> {
    let collection = feature_collection_from_value(value)?;
    let polygon = collection
        .polygons
        .last()
        .ok_or_else(|| FloodError::InvalidGeometry("no polygon found".to_string()))?;
    AreaOfInterest::new(polygon.exterior.iter().map(|[lon, lat]| (*lon, *lat)))
}

pub fn read_aoi<P: AsRef<Path>>(path: P) -> FloodResult<AreaOfInterest> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    aoi_from_value(&value)
}
