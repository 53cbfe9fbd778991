//! Planar geometry for survey coverage.

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Area in km² of the convex hull around `(latitude, longitude)` points.
///
/// Points are projected equirectangularly around their mean latitude, which
/// is accurate enough at survey scale (tens of kilometres). Fewer than three
/// distinct points enclose no area.
pub fn convex_hull_area_km2(points: &[(f64, f64)]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mean_lat = points.iter().map(|p| p.0).sum::<f64>() / points.len() as f64;
    let kx = mean_lat.to_radians().cos() * EARTH_RADIUS_KM;
    let projected: Vec<(f64, f64)> = points
        .iter()
        .map(|&(lat, lon)| (lon.to_radians() * kx, lat.to_radians() * EARTH_RADIUS_KM))
        .collect();
    polygon_area(&convex_hull(projected))
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain. Returns the hull counter-clockwise without the
/// closing point; collinear points are dropped.
fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(points.len() * 2);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Shoelace formula.
fn polygon_area(ring: &[(f64, f64)]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let twice: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a.0 * b.1 - b.0 * a.1)
        .sum();
    twice.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hull_ignores_interior_points() {
        let square = vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (1.0, 1.0), (1.0, 0.0)];
        let hull = convex_hull(square);
        assert_eq!(hull.len(), 4);
        assert_eq!(polygon_area(&hull), 4.0);
    }

    #[test]
    fn tenth_of_a_degree_square_at_the_equator() {
        let pts = [(0.0, 0.0), (0.1, 0.0), (0.1, 0.1), (0.0, 0.1), (0.05, 0.05)];
        let area = convex_hull_area_km2(&pts);
        // 0.1° ≈ 11.12 km
        assert!((area - 123.6).abs() < 1.0, "{area}");
    }

    #[test]
    fn degenerate_inputs_have_no_area() {
        assert_eq!(convex_hull_area_km2(&[(4.0, -74.0), (4.1, -74.0)]), 0.0);
        assert_eq!(convex_hull_area_km2(&[(4.0, -74.0), (4.1, -74.0), (4.2, -74.0)]), 0.0);
    }
}
