//! Sector polygon ingestion and the ordered polygon set used for geofencing.
//!
//! Two input conventions are accepted: "simple" lists of `[lat, lon]` points
//! and GeoJSON rings of `[lon, lat]` positions. Both normalise to an open
//! `(lat, lon)` ring wound counter-clockwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::models::GeoPoint;
use crate::spatial::{point_in_polygon, project_ring, ring_area_nm2, ring_self_intersects, signed_area};

/// Vertex coincidence tolerance in degrees.
const VERTEX_EPS_DEG: f64 = 1e-12;
/// Rings below this area (square metres) are degenerate.
const MIN_AREA_M2: f64 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("polygon {name:?} has {count} points, at least 3 required")]
    TooFewPoints { name: String, count: usize },
    #[error("polygon {name:?} has non-finite coordinate")]
    NonFiniteCoordinate { name: String },
    #[error("polygon {name:?} coordinate out of range: lat {lat}, lon {lon}")]
    CoordinateOutOfRange { name: String, lat: f64, lon: f64 },
    #[error("polygon {name:?} is invalid and could not be repaired: {reason}")]
    Unrepairable { name: String, reason: &'static str },
    #[error("malformed polygon document: {0}")]
    Malformed(String),
    #[error("polygon document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named region of controlled airspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorPolygon {
    pub name: String,
    /// Open ring, counter-clockwise, `(lat, lon)`.
    pub boundary: Vec<GeoPoint>,
    /// Lower values win when sectors overlap.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub area_nm2: f64,
}

impl SectorPolygon {
    /// Build from lat-first `[lat, lon]` pairs.
    pub fn from_lat_lon(
        name: impl Into<String>,
        points: &[[f64; 2]],
        priority: Option<i32>,
        metadata: Map<String, Value>,
    ) -> Result<Self, GeometryError> {
        let pairs: Vec<(f64, f64)> = points.iter().map(|p| (p[0], p[1])).collect();
        Self::build(name.into(), &pairs, priority, metadata)
    }

    /// Build from a lon-first GeoJSON linear ring.
    pub fn from_geojson_ring(
        name: impl Into<String>,
        ring: &[Vec<f64>],
        priority: Option<i32>,
        metadata: Map<String, Value>,
    ) -> Result<Self, GeometryError> {
        let name = name.into();
        let mut pairs = Vec::with_capacity(ring.len());
        for position in ring {
            let [lon, lat] = match position.as_slice() {
                [lon, lat, ..] => [*lon, *lat],
                _ => {
                    return Err(GeometryError::Malformed(format!(
                        "polygon {name:?} has a position with fewer than two values"
                    )))
                }
            };
            pairs.push((lat, lon));
        }
        Self::build(name, &pairs, priority, metadata)
    }

    fn build(
        name: String,
        pairs: &[(f64, f64)],
        priority: Option<i32>,
        metadata: Map<String, Value>,
    ) -> Result<Self, GeometryError> {
        if pairs.len() < 3 {
            return Err(GeometryError::TooFewPoints {
                name,
                count: pairs.len(),
            });
        }

        let mut ring = Vec::with_capacity(pairs.len());
        for &(lat, lon) in pairs {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(GeometryError::NonFiniteCoordinate { name });
            }
            match GeoPoint::new(lat, lon) {
                Ok(point) => ring.push(point),
                Err(_) => return Err(GeometryError::CoordinateOutOfRange { name, lat, lon }),
            }
        }

        let boundary = repair_ring(&name, ring)?;
        let area_nm2 = ring_area_nm2(&boundary);
        Ok(Self {
            name,
            boundary,
            priority,
            metadata,
            area_nm2,
        })
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        point_in_polygon(lat, lon, &self.boundary)
    }
}

fn same_vertex(a: &GeoPoint, b: &GeoPoint) -> bool {
    (a.lat - b.lat).abs() <= VERTEX_EPS_DEG && (a.lon - b.lon).abs() <= VERTEX_EPS_DEG
}

/// Zero-width repair: drop repeated vertices, the closing vertex and
/// collinear spikes, then fix winding. Fails when what is left is not a
/// simple polygon.
fn repair_ring(name: &str, ring: Vec<GeoPoint>) -> Result<Vec<GeoPoint>, GeometryError> {
    let unrepairable = |reason| GeometryError::Unrepairable {
        name: name.to_string(),
        reason,
    };

    let mut ring: Vec<GeoPoint> = ring.into_iter().fold(Vec::new(), |mut acc, point| {
        if acc.last().map(|last| !same_vertex(last, &point)).unwrap_or(true) {
            acc.push(point);
        }
        acc
    });
    while ring.len() > 1 && same_vertex(&ring[0], &ring[ring.len() - 1]) {
        ring.pop();
    }

    // Remove vertices with zero turn; repeat until nothing changes so
    // nested spikes collapse too.
    loop {
        let n = ring.len();
        if n < 3 {
            break;
        }
        let projected = project_ring(&ring);
        let degenerate = (0..n).find(|&i| {
            let prev = projected[(i + n - 1) % n];
            let cur = projected[i];
            let next = projected[(i + 1) % n];
            let (ux, uy) = (cur.0 - prev.0, cur.1 - prev.1);
            let (vx, vy) = (next.0 - prev.0, next.1 - prev.1);
            let scale = (ux.hypot(uy) * vx.hypot(vy)).max(1.0);
            (ux * vy - uy * vx).abs() <= 1e-9 * scale
        });
        match degenerate {
            Some(idx) => {
                ring.remove(idx);
            }
            None => break,
        }
    }

    if ring.len() < 3 {
        return Err(unrepairable("fewer than 3 distinct vertices"));
    }

    let projected = project_ring(&ring);
    let area = signed_area(&projected);
    if area.abs() < MIN_AREA_M2 {
        return Err(unrepairable("zero area"));
    }
    if ring_self_intersects(&projected) {
        return Err(unrepairable("self-intersecting boundary"));
    }
    if area < 0.0 {
        ring.reverse();
    }
    Ok(ring)
}

#[derive(Debug, Deserialize)]
struct SimpleSector {
    name: String,
    points: Vec<[f64; 2]>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(flatten)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    #[serde(other)]
    Unsupported,
}

/// Parse a polygon document: a GeoJSON `FeatureCollection` or a JSON array
/// of simple `{name, points: [[lat, lon], ...]}` sectors.
pub fn parse_polygon_document(text: &str) -> Result<Vec<SectorPolygon>, GeometryError> {
    let value: Value = serde_json::from_str(text)?;
    match &value {
        Value::Array(_) => {
            let sectors: Vec<SimpleSector> = serde_json::from_value(value)?;
            sectors
                .into_iter()
                .map(|sector| {
                    SectorPolygon::from_lat_lon(
                        sector.name,
                        &sector.points,
                        sector.priority,
                        sector.metadata,
                    )
                })
                .collect()
        }
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("FeatureCollection") => {
            let collection: FeatureCollection = serde_json::from_value(value)?;
            parse_feature_collection(collection)
        }
        _ => Err(GeometryError::Malformed(
            "expected a FeatureCollection or an array of sectors".to_string(),
        )),
    }
}

fn parse_feature_collection(
    collection: FeatureCollection,
) -> Result<Vec<SectorPolygon>, GeometryError> {
    let mut sectors = Vec::new();
    for (idx, feature) in collection.features.into_iter().enumerate() {
        let mut properties = feature.properties.unwrap_or_default();
        let name = properties
            .get("name")
            .or_else(|| properties.get("id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| GeometryError::Malformed(format!("feature {idx} has no name")))?;
        let priority = properties
            .remove("priority")
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok());

        let polygons = match feature.geometry {
            Some(Geometry::Polygon { coordinates }) => vec![coordinates],
            Some(Geometry::MultiPolygon { coordinates }) => coordinates,
            Some(Geometry::Unsupported) | None => {
                return Err(GeometryError::Malformed(format!(
                    "feature {name:?} is not a Polygon or MultiPolygon"
                )))
            }
        };

        for rings in polygons {
            let outer = rings.first().ok_or_else(|| {
                GeometryError::Malformed(format!("feature {name:?} has an empty polygon"))
            })?;
            sectors.push(SectorPolygon::from_geojson_ring(
                name.clone(),
                outer,
                priority,
                properties.clone(),
            )?);
        }
    }
    Ok(sectors)
}

/// Immutable set of sectors in deterministic lookup order.
///
/// Order is explicit priority (ascending, unset last), then smallest area,
/// then name. The first containing sector in that order wins an overlap.
#[derive(Debug, Clone, Default)]
pub struct PolygonSet {
    sectors: Vec<SectorPolygon>,
}

impl PolygonSet {
    pub fn new(mut sectors: Vec<SectorPolygon>) -> Self {
        sectors.sort_by(compare_precedence);
        Self { sectors }
    }

    pub fn from_document(text: &str) -> Result<Self, GeometryError> {
        Ok(Self::new(parse_polygon_document(text)?))
    }

    /// The sector containing the point, after overlap resolution.
    pub fn sector_at(&self, lat: f64, lon: f64) -> Option<&SectorPolygon> {
        self.sectors.iter().find(|sector| sector.contains(lat, lon))
    }

    /// Every sector containing the point, in precedence order.
    pub fn sectors_at(&self, lat: f64, lon: f64) -> Vec<&SectorPolygon> {
        self.sectors
            .iter()
            .filter(|sector| sector.contains(lat, lon))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

fn compare_precedence(a: &SectorPolygon, b: &SectorPolygon) -> Ordering {
    let priority = match (a.priority, b.priority) {
        (Some(pa), Some(pb)) => pa.cmp(&pb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    priority
        .then_with(|| a.area_nm2.partial_cmp(&b.area_nm2).unwrap_or(Ordering::Equal))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(name: &str, lat0: f64, lon0: f64, size: f64) -> SectorPolygon {
        SectorPolygon::from_lat_lon(
            name,
            &[
                [lat0, lon0],
                [lat0, lon0 + size],
                [lat0 + size, lon0 + size],
                [lat0 + size, lon0],
            ],
            None,
            Map::new(),
        )
        .unwrap()
    }

    #[test]
    fn simple_and_geojson_conventions_normalise_identically() {
        let simple = r#"[{"name": "A", "points": [[0,0],[0,2],[1,2],[1,0],[0,0]]}]"#;
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "A"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,1],[0,1],[0,0]]]}
            }]
        }"#;
        let a = parse_polygon_document(simple).unwrap();
        let b = parse_polygon_document(geojson).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        // 1 degree of latitude tall, 2 degrees of longitude wide in both.
        assert!(a[0].contains(0.5, 1.5));
        assert!(b[0].contains(0.5, 1.5));
        assert!(!a[0].contains(1.5, 0.5));
        assert!(!b[0].contains(1.5, 0.5));
        assert!((a[0].area_nm2 - b[0].area_nm2).abs() < 1e-6);
    }

    #[test]
    fn rejects_too_few_points() {
        let err = SectorPolygon::from_lat_lon("X", &[[0.0, 0.0], [1.0, 1.0]], None, Map::new())
            .unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPoints { count: 2, .. }));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let err = SectorPolygon::from_lat_lon(
            "X",
            &[[0.0, 0.0], [95.0, 1.0], [1.0, 0.0]],
            None,
            Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::CoordinateOutOfRange { .. }));

        let err = SectorPolygon::from_lat_lon(
            "X",
            &[[0.0, 0.0], [1.0, 181.0], [1.0, 0.0]],
            None,
            Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::CoordinateOutOfRange { .. }));
    }

    #[test]
    fn repair_removes_duplicates_and_spikes() {
        let repaired = SectorPolygon::from_lat_lon(
            "R",
            &[
                [0.0, 0.0],
                [0.0, 0.0],
                [0.0, 1.0],
                [0.0, 1.5], // spike out along the edge and back
                [0.0, 1.0],
                [1.0, 1.0],
                [1.0, 0.0],
                [0.0, 0.0],
            ],
            None,
            Map::new(),
        )
        .unwrap();
        assert_eq!(repaired.boundary.len(), 4);
        assert!(repaired.contains(0.5, 0.5));
        assert!(!repaired.contains(0.0, 1.25));
    }

    #[test]
    fn self_intersecting_polygon_fails_loudly() {
        let err = SectorPolygon::from_lat_lon(
            "BOW",
            &[[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0]],
            None,
            Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::Unrepairable { .. }));
    }

    #[test]
    fn collinear_polygon_is_unrepairable() {
        let err = SectorPolygon::from_lat_lon(
            "LINE",
            &[[0.0, 0.0], [0.0, 1.0], [0.0, 2.0]],
            None,
            Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::Unrepairable { .. }));
    }

    #[test]
    fn clockwise_input_is_rewound() {
        let cw = SectorPolygon::from_lat_lon(
            "CW",
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            None,
            Map::new(),
        )
        .unwrap();
        let ccw = square("CCW", 0.0, 0.0, 1.0);
        assert!(signed_area(&project_ring(&cw.boundary)) > 0.0);
        assert!(signed_area(&project_ring(&ccw.boundary)) > 0.0);
    }

    #[test]
    fn overlap_resolves_to_smallest_area_regardless_of_order() {
        let big = square("BIG", 0.0, 0.0, 4.0);
        let small = square("SMALL", 1.0, 1.0, 1.0);

        let forward = PolygonSet::new(vec![big.clone(), small.clone()]);
        let reverse = PolygonSet::new(vec![small, big]);
        assert_eq!(forward.sector_at(1.5, 1.5).unwrap().name, "SMALL");
        assert_eq!(reverse.sector_at(1.5, 1.5).unwrap().name, "SMALL");
        assert_eq!(forward.sector_at(3.5, 3.5).unwrap().name, "BIG");
        assert_eq!(forward.sectors_at(1.5, 1.5).len(), 2);
        assert!(forward.sector_at(10.0, 10.0).is_none());
    }

    #[test]
    fn explicit_priority_beats_area() {
        let mut big = square("BIG", 0.0, 0.0, 4.0);
        big.priority = Some(1);
        let small = square("SMALL", 1.0, 1.0, 1.0);
        let set = PolygonSet::new(vec![small, big]);
        assert_eq!(set.sector_at(1.5, 1.5).unwrap().name, "BIG");
    }

    #[test]
    fn equal_area_ties_break_by_name() {
        let a = square("ALPHA", 0.0, 0.0, 1.0);
        let b = square("BRAVO", 0.0, 0.0, 1.0);
        let set = PolygonSet::new(vec![b, a]);
        assert_eq!(set.sector_at(0.5, 0.5).unwrap().name, "ALPHA");
    }

    #[test]
    fn geojson_properties_carry_priority_and_metadata() {
        let doc = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"id": "ML_CTR", "priority": 3, "frequency": "132.200"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[144,-38,0],[145,-38,0],[145,-37,0],[144,-37,0],[144,-38,0]]],
                    [[[146,-38],[147,-38],[147,-37],[146,-37],[146,-38]]]
                ]}
            }]
        }"#;
        let sectors = parse_polygon_document(doc).unwrap();
        assert_eq!(sectors.len(), 2);
        assert!(sectors.iter().all(|s| s.name == "ML_CTR" && s.priority == Some(3)));
        assert_eq!(sectors[0].metadata["frequency"], "132.200");
        assert!(sectors[1].contains(-37.5, 146.5));
    }

    #[test]
    fn unsupported_documents_are_malformed() {
        assert!(matches!(
            parse_polygon_document(r#"{"type": "Feature"}"#),
            Err(GeometryError::Malformed(_))
        ));
        let point = r#"{"type":"FeatureCollection","features":[{"properties":{"name":"P"},"geometry":{"type":"Point","coordinates":[0,0]}}]}"#;
        assert!(matches!(
            parse_polygon_document(point),
            Err(GeometryError::Malformed(_))
        ));
        assert!(matches!(parse_polygon_document("not json"), Err(GeometryError::Json(_))));
    }
}
