//! Spatial math for proximity checks and sector geofencing.

use crate::models::GeoPoint;

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Tolerance in degrees for treating a point as lying on a polygon edge.
const BOUNDARY_EPS_DEG: f64 = 1e-9;

/// Great-circle distance in nautical miles (spherical law of cosines).
///
/// The cosine argument is clamped to `[-1, 1]`, so coincident points give
/// exactly zero instead of NaN.
pub fn great_circle_distance_nm(p1: GeoPoint, p2: GeoPoint) -> f64 {
    if p1 == p2 {
        return 0.0;
    }
    let phi1 = p1.lat.to_radians();
    let phi2 = p2.lat.to_radians();
    let dlambda = (p2.lon - p1.lon).to_radians();
    let cos_angle = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * dlambda.cos();
    EARTH_RADIUS_NM * cos_angle.clamp(-1.0, 1.0).acos()
}

/// Ray-casting point-in-polygon test over a `(lat, lon)` ring.
///
/// The ring may be open or closed. Points on an edge or vertex count as inside.
pub fn point_in_polygon(lat: f64, lon: f64, ring: &[GeoPoint]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (yi, xi) = (ring[i].lat, ring[i].lon);
        let (yj, xj) = (ring[j].lat, ring[j].lon);

        if on_edge((yi, xi), (yj, xj), (lat, lon)) {
            return true;
        }

        if ((yi > lat) != (yj > lat)) && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    inside
}

fn on_edge(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    if cross.abs() > BOUNDARY_EPS_DEG {
        return false;
    }
    let within = |lo: f64, hi: f64, v: f64| {
        v >= lo.min(hi) - BOUNDARY_EPS_DEG && v <= lo.max(hi) + BOUNDARY_EPS_DEG
    };
    within(a.0, b.0, p.0) && within(a.1, b.1, p.1)
}

// ==== Local planar projection ====
// Latitude-aware metre scaling, used for area and self-intersection checks.

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Project a ring onto a local east/north plane in metres, centred on its mean.
pub(crate) fn project_ring(ring: &[GeoPoint]) -> Vec<(f64, f64)> {
    if ring.is_empty() {
        return Vec::new();
    }
    let count = ring.len() as f64;
    let ref_lat = ring.iter().map(|p| p.lat).sum::<f64>() / count;
    let ref_lon = ring.iter().map(|p| p.lon).sum::<f64>() / count;
    let scale_x = meters_per_deg_lon(ref_lat);
    let scale_y = meters_per_deg_lat(ref_lat);
    ring.iter()
        .map(|p| ((p.lon - ref_lon) * scale_x, (p.lat - ref_lat) * scale_y))
        .collect()
}

/// Signed shoelace area of a projected open ring, in square metres.
pub(crate) fn signed_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let (x1, y1) = points[i];
        let (x2, y2) = points[(i + 1) % n];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

/// Approximate area of a `(lat, lon)` ring in square nautical miles.
pub fn ring_area_nm2(ring: &[GeoPoint]) -> f64 {
    const METERS_PER_NM: f64 = 1852.0;
    signed_area(&project_ring(ring)).abs() / (METERS_PER_NM * METERS_PER_NM)
}

pub(crate) fn segments_intersect_2d(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> bool {
    // Metres on the local projection.
    const EPS_M: f64 = 1e-6;

    fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    }

    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPS_M;
        let max = a.max(b) + EPS_M;
        value >= min && value <= max
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        within(p.0, q.0, r.0) && within(p.1, q.1, r.1)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if o1.abs() <= EPS_M && on_segment(a1, a2, b1) {
        return true;
    }
    if o2.abs() <= EPS_M && on_segment(a1, a2, b2) {
        return true;
    }
    if o3.abs() <= EPS_M && on_segment(b1, b2, a1) {
        return true;
    }
    if o4.abs() <= EPS_M && on_segment(b1, b2, a2) {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

/// True when any two non-adjacent edges of an open projected ring touch or cross.
pub(crate) fn ring_self_intersects(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        let a1 = points[i];
        let a2 = points[(i + 1) % n];
        for j in (i + 1)..n {
            // Skip the edge itself and its two neighbours, which share a vertex.
            if j == i || (j + 1) % n == i || (i + 1) % n == j {
                continue;
            }
            let b1 = points[j];
            let b2 = points[(j + 1) % n];
            if segments_intersect_2d(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}
