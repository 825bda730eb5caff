// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The splitting phase of a boolean operation: every polygon of one solid is
//! cut along the planes of the other solid's overlapping polygons, until no
//! cut applies anymore. Splitting is per polygon, so a cut can leave a
//! T-junction on a neighboring polygon; those seams are resolved by the
//! weld during harvest.

use rstar::{RTree, RTreeObject, AABB};

use crate::prelude::*;

use super::{
    locate_in_polygon, CsgSolid, CsgVertex, CsgVertexId, Plane, PointInPolygon, VertexStatus,
    COPLANAR_EPS, EPS, MAX_SPLIT_PASSES,
};

struct PolygonBounds {
    index: usize,
    envelope: AABB<[f32; 3]>,
}

impl RTreeObject for PolygonBounds {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn bounds_tree(solid: &CsgSolid) -> RTree<PolygonBounds> {
    RTree::bulk_load(
        solid
            .polygons
            .iter()
            .enumerate()
            .map(|(index, polygon)| {
                let (min, max) = solid.polygon_bounds(polygon);
                PolygonBounds {
                    index,
                    envelope: AABB::from_corners(min.to_array(), max.to_array()),
                }
            })
            .collect_vec(),
    )
}

/// Splits every polygon of `a` by the overlapping, non-coplanar polygons of
/// `b`, rescanning until quiescent. The scan count is capped: degenerate
/// inputs get a partially split solid back instead of running away.
#[profiling::function]
pub fn split_phase(a: &mut CsgSolid, b: &CsgSolid) {
    let tree = bounds_tree(b);
    for _ in 0..MAX_SPLIT_PASSES {
        if !split_scan(a, b, &tree) {
            return;
        }
    }
    log::warn!(
        "CSG split scan still busy after {MAX_SPLIT_PASSES} passes, \
         continuing with a partially split solid"
    );
}

/// One pass over `a`'s polygons. Polygons appended by a cut are picked up by
/// the next pass. Returns whether any cut was made.
fn split_scan(a: &mut CsgSolid, b: &CsgSolid, tree: &RTree<PolygonBounds>) -> bool {
    let mut did_split = false;
    // Snapshot the length: fragments pushed during this pass are re-examined
    // on the next one.
    let num_polygons = a.polygons.len();

    for i in 0..num_polygons {
        let (min, max) = a.polygon_bounds(&a.polygons[i]);
        let envelope = AABB::from_corners(
            (min - Vec3::splat(EPS)).to_array(),
            (max + Vec3::splat(EPS)).to_array(),
        );
        for candidate in tree.locate_in_envelope_intersecting(&envelope) {
            let b_polygon = &b.polygons[candidate.index];
            let plane = match b.polygon_plane(b_polygon) {
                Some(plane) => plane,
                None => continue,
            };
            if split_polygon(a, i, &plane, b, candidate.index) {
                did_split = true;
                // The polygon at `i` is now the front fragment; further
                // candidates apply to it on the next pass.
                break;
            }
        }
    }
    did_split
}

/// Cuts `a.polygons[i]` along `plane` when the plane crosses the polygon's
/// interior. On-plane vertices that lie on the cutting polygon's surface are
/// marked [`VertexStatus::Boundary`] whether or not a cut happens.
fn split_polygon(
    a: &mut CsgSolid,
    i: usize,
    plane: &Plane,
    b: &CsgSolid,
    b_index: usize,
) -> bool {
    let ring = a.polygons[i].vertices.clone();
    let distances: SVec<f32> = ring
        .iter_cpy()
        .map(|v| plane.signed_distance(a.vertices[v].position))
        .collect();
    // Strictly within the epsilon band counts as on-plane.
    let side = |d: f32| {
        if d.abs() < COPLANAR_EPS {
            0
        } else if d > 0.0 {
            1
        } else {
            -1
        }
    };
    let sides: SVec<i32> = distances.iter_cpy().map(side).collect();

    for (&v, &s) in ring.iter().zip(sides.iter()) {
        if s == 0 {
            let on_surface = locate_in_polygon(b, &b.polygons[b_index], plane, {
                a.vertices[v].position
            }) != PointInPolygon::Outside;
            if on_surface {
                a.vertices[v].status = VertexStatus::Boundary;
            }
        }
    }

    // A coplanar pair, or a plane that only touches, never cuts.
    if !sides.contains(&1) || !sides.contains(&-1) {
        return false;
    }

    let mut front: SVec<CsgVertexId> = SVec::new();
    let mut back: SVec<CsgVertexId> = SVec::new();
    for idx in 0..ring.len() {
        let next = (idx + 1) % ring.len();
        let (v, s, d) = (ring[idx], sides[idx], distances[idx]);
        let (w, s_next, d_next) = (ring[next], sides[next], distances[next]);

        if s >= 0 {
            front.push(v);
        }
        if s <= 0 {
            back.push(v);
        }
        if s * s_next < 0 {
            // The edge crosses the plane strictly: insert a cut vertex and
            // sever the crossing adjacency so statuses cannot flood across
            // the other solid's surface.
            let t = d / (d - d_next);
            let position = a.vertices[v]
                .position
                .lerp(a.vertices[w].position, t);
            let status = match locate_in_polygon(b, &b.polygons[b_index], plane, position) {
                PointInPolygon::Outside => VertexStatus::Unknown,
                _ => VertexStatus::Boundary,
            };
            let x = a.vertices.insert(CsgVertex {
                position,
                status,
                ..Default::default()
            });
            a.unlink(v, w);
            front.push(x);
            back.push(x);
        }
    }

    if front.len() < 3 || back.len() < 3 {
        return false;
    }

    for (&p, &q) in front.iter().circular_tuple_windows() {
        a.link(p, q);
    }
    for (&p, &q) in back.iter().circular_tuple_windows() {
        a.link(p, q);
    }

    let tag = a.polygons[i].tag.clone();
    a.polygons[i].vertices = front;
    a.polygons.push(super::CsgPolygon {
        vertices: back,
        status: super::PolygonStatus::Unknown,
        tag,
    });
    true
}

#[cfg(test)]
mod test {
    use super::super::CsgSolid;
    use super::*;
    use crate::mesh::halfedge::primitives;

    #[test]
    fn disjoint_solids_never_split() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0));
        let b_mesh = primitives::Box::build(Vec3::new(5.0, 0.0, 0.0), Vec3::splat(2.0));
        let mut a = CsgSolid::from_halfedge_mesh(&a_mesh).unwrap();
        let b = CsgSolid::from_halfedge_mesh(&b_mesh).unwrap();
        split_phase(&mut a, &b);
        assert_eq!(a.polygons.len(), 6);
    }

    #[test]
    fn coplanar_solids_never_split() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0));
        let mut a = CsgSolid::from_halfedge_mesh(&a_mesh).unwrap();
        let b = CsgSolid::from_halfedge_mesh(&a_mesh).unwrap();
        split_phase(&mut a, &b);
        assert_eq!(a.polygons.len(), 6);
        // Every vertex sits on the other solid's surface.
        assert!(a
            .vertices
            .values()
            .all(|v| v.status == VertexStatus::Boundary));
    }

    #[test]
    fn overlapping_cubes_get_cut() {
        let a_mesh = primitives::Box::build(Vec3::ZERO, Vec3::splat(2.0));
        let b_mesh = primitives::Box::build(Vec3::ONE, Vec3::splat(2.0));
        let mut a = CsgSolid::from_halfedge_mesh(&a_mesh).unwrap();
        let b = CsgSolid::from_halfedge_mesh(&b_mesh).unwrap();
        split_phase(&mut a, &b);
        // Cuts strictly add polygons.
        assert!(a.polygons.len() > 6);
        // Fragments keep at least 3 vertices each.
        assert!(a.polygons.iter().all(|p| p.vertices.len() >= 3));
    }
}
