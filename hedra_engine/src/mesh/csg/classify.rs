// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The classification phase of a boolean operation: every polygon of one
//! solid gets a status relative to the other solid. Cheap when a vertex
//! status is already known; otherwise a ray is cast from the polygon's
//! barycenter along its normal, and the answer is flood-filled through the
//! vertex adjacency so one cast can resolve a whole connected patch.

use rand::{rngs::SmallRng, Rng};

use crate::prelude::*;

use super::{
    locate_in_polygon, CsgSolid, CsgVertexId, PointInPolygon, PolygonStatus, VertexStatus,
    COPLANAR_EPS, EPS, MAX_RAY_RETRIES,
};

/// Classifies every polygon of `a` against `b`, filling in vertex statuses
/// as a side effect.
#[profiling::function]
pub fn classify_solid(a: &mut CsgSolid, b: &CsgSolid, rng: &mut SmallRng) {
    for i in 0..a.polygons.len() {
        if a.polygons[i].status != PolygonStatus::Unknown {
            continue;
        }

        // A single already-classified vertex settles the polygon.
        let derived = a.polygons[i].vertices.iter_cpy().find_map(|v| {
            match a.vertices[v].status {
                VertexStatus::Inside => Some(PolygonStatus::Inside),
                VertexStatus::Outside => Some(PolygonStatus::Outside),
                VertexStatus::Unknown | VertexStatus::Boundary => None,
            }
        });

        let status = match derived {
            Some(status) => status,
            None => raycast_classify(a, i, b, rng),
        };
        apply_status(a, i, status);
    }
}

/// Stamps the polygon, seeds its unknown vertices, and floods the vertex
/// status outwards. Boundary vertices are terminal and never traversed, so
/// the fill stops at the other solid's surface.
fn apply_status(a: &mut CsgSolid, i: usize, status: PolygonStatus) {
    a.polygons[i].status = status;
    let vertex_status = match status {
        PolygonStatus::Inside => VertexStatus::Inside,
        PolygonStatus::Outside => VertexStatus::Outside,
        PolygonStatus::Same | PolygonStatus::Opposite => VertexStatus::Boundary,
        PolygonStatus::Unknown => return,
    };

    let mut stack: Vec<CsgVertexId> = a.polygons[i].vertices.to_vec();
    while let Some(v) = stack.pop() {
        if a.vertices[v].status != VertexStatus::Unknown {
            continue;
        }
        a.vertices[v].status = vertex_status;
        stack.extend(a.vertices[v].adjacent.iter().copied());
    }
}

enum CastOutcome {
    Hit { distance: f32, normal: Vec3 },
    Miss,
    /// The ray grazed a plane or hit too close to a polygon edge to call.
    Degenerate,
}

/// Classifies by raycast from the barycenter along the polygon normal.
/// Degenerate casts retry with a jittered direction; when every retry stays
/// ambiguous the polygon defaults to Outside, which keeps the pipeline
/// non-blocking on numerically hostile input.
fn raycast_classify(a: &CsgSolid, i: usize, b: &CsgSolid, rng: &mut SmallRng) -> PolygonStatus {
    let polygon = &a.polygons[i];
    let plane = match a.polygon_plane(polygon) {
        Some(plane) => plane,
        None => return PolygonStatus::Outside,
    };
    let origin = a.barycenter(polygon);
    let mut direction = plane.normal;

    for _ in 0..=MAX_RAY_RETRIES {
        match cast_ray(origin, direction, b) {
            CastOutcome::Hit { distance, normal } => {
                return if distance.abs() < EPS {
                    // Coplanar overlap: agree or oppose by normal direction.
                    if plane.normal.dot(normal) > 0.0 {
                        PolygonStatus::Same
                    } else {
                        PolygonStatus::Opposite
                    }
                } else if direction.dot(normal) > 0.0 {
                    // Back-facing hit: the ray started under that surface.
                    PolygonStatus::Inside
                } else {
                    PolygonStatus::Outside
                };
            }
            CastOutcome::Miss => return PolygonStatus::Outside,
            CastOutcome::Degenerate => {
                let jitter = Vec3::new(
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                );
                direction = (plane.normal + jitter).normalize();
            }
        }
    }

    log::warn!(
        "CSG ray classification still ambiguous after {MAX_RAY_RETRIES} retries, \
         defaulting to Outside"
    );
    PolygonStatus::Outside
}

/// Finds the nearest polygon of `b` hit by the ray. Hits behind the origin
/// are ignored; hits within [`EPS`] of a polygon's edge, and rays lying in a
/// polygon's plane, are reported as degenerate so the caller can perturb.
fn cast_ray(origin: Vec3, direction: Vec3, b: &CsgSolid) -> CastOutcome {
    let mut nearest: Option<(f32, Vec3)> = None;

    for polygon in &b.polygons {
        let plane = match b.polygon_plane(polygon) {
            Some(plane) => plane,
            None => continue,
        };
        let denom = direction.dot(plane.normal);
        let origin_distance = plane.signed_distance(origin);

        if denom.abs() < EPS {
            // Ray parallel to the plane. Only a problem when it lies within
            // the plane and crosses the polygon itself.
            if origin_distance.abs() < COPLANAR_EPS
                && locate_in_polygon(b, polygon, &plane, origin) != PointInPolygon::Outside
            {
                return CastOutcome::Degenerate;
            }
            continue;
        }

        let t = -origin_distance / denom;
        if t < -EPS {
            continue;
        }
        let hit = origin + direction * t;
        match locate_in_polygon(b, polygon, &plane, hit) {
            PointInPolygon::Outside => continue,
            PointInPolygon::OnBoundary => return CastOutcome::Degenerate,
            PointInPolygon::Inside => {
                if nearest.map_or(true, |(nearest_t, _)| t < nearest_t) {
                    nearest = Some((t, plane.normal));
                }
            }
        }
    }

    match nearest {
        Some((distance, normal)) => CastOutcome::Hit { distance, normal },
        None => CastOutcome::Miss,
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;

    use super::super::{split, CsgSolid};
    use super::*;
    use crate::mesh::halfedge::primitives;

    fn classified(
        a_mesh: &HalfEdgeMesh,
        b_mesh: &HalfEdgeMesh,
    ) -> (CsgSolid, CsgSolid) {
        let mut a = CsgSolid::from_halfedge_mesh(a_mesh).unwrap();
        let mut b = CsgSolid::from_halfedge_mesh(b_mesh).unwrap();
        split::split_phase(&mut a, &b);
        split::split_phase(&mut b, &a);
        split::split_phase(&mut a, &b);
        let mut rng = SmallRng::seed_from_u64(7);
        classify_solid(&mut a, &b, &mut rng);
        classify_solid(&mut b, &a, &mut rng);
        (a, b)
    }

    #[test]
    fn disjoint_solids_classify_outside() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0));
        let b_mesh = primitives::Box::build(Vec3::new(5.0, 0.0, 0.0), Vec3::splat(2.0));
        let (a, b) = classified(&a_mesh, &b_mesh);
        assert!(a
            .polygons
            .iter()
            .all(|p| p.status == PolygonStatus::Outside));
        assert!(b
            .polygons
            .iter()
            .all(|p| p.status == PolygonStatus::Outside));
    }

    #[test]
    fn enclosed_solid_classifies_inside() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(1.0));
        let b_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(4.0));
        let (a, b) = classified(&a_mesh, &b_mesh);
        assert!(a.polygons.iter().all(|p| p.status == PolygonStatus::Inside));
        assert!(b
            .polygons
            .iter()
            .all(|p| p.status == PolygonStatus::Outside));
    }

    #[test]
    fn coplanar_solids_classify_same() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0));
        let (a, _) = classified(&a_mesh, &a_mesh.clone());
        assert!(a.polygons.iter().all(|p| p.status == PolygonStatus::Same));
    }
}
