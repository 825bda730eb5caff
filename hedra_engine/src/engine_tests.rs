// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios exercising several engine layers at once: notation
//! strings through the operator engine, operator output through CSG, and
//! generated meshes through OFF and the renderable buffer path.

use crate::mesh::csg;
use crate::mesh::halfedge::conway_notation::{conway, MeshCounts};
use crate::mesh::halfedge::conway_ops::{apply, MeshOperator};
use crate::mesh::halfedge::filters::FaceFilter;
use crate::mesh::halfedge::off_format;
use crate::mesh::halfedge::primitives::Platonic;
use crate::prelude::*;

fn euler_characteristic(counts: &MeshCounts) -> isize {
    counts.vertices as isize - counts.edges as isize + counts.faces as isize
}

#[test]
fn notation_chains_stay_closed_polyhedra() {
    for input in ["kP4", "taC", "dkI", "elO", "sxY5", "bA4"] {
        let (mesh, counts) = conway(input).unwrap();
        assert_eq!(
            mesh.read_connectivity().num_boundary_halfedges(),
            0,
            "{input} should stay closed"
        );
        assert_eq!(
            euler_characteristic(&counts),
            2,
            "{input} should stay genus zero: {counts:?}"
        );
    }
}

#[test]
fn kis_of_square_prism_counts() {
    let (_, counts) = conway("kP4").unwrap();
    assert_eq!(counts.vertices, 14);
    assert_eq!(counts.faces, 24);
}

#[test]
fn dual_is_an_involution_on_counts() {
    let ico = Platonic::icosahedron();
    let twice = apply(&apply(&ico, &MeshOperator::Dual).unwrap(), &MeshOperator::Dual).unwrap();
    let conn = ico.read_connectivity();
    let conn_twice = twice.read_connectivity();
    assert_eq!(conn.num_vertices(), conn_twice.num_vertices());
    assert_eq!(conn.num_faces(), conn_twice.num_faces());
    assert_eq!(conn.num_halfedges(), conn_twice.num_halfedges());
}

#[test]
fn transformed_operand_feeds_csg() {
    let a = Platonic::cube();
    let b = apply(
        &a,
        &MeshOperator::Transform {
            translate: Vec3::ONE,
            rotate: Vec3::ZERO,
            scale: Vec3::ONE,
        },
    )
    .unwrap();
    let result = csg::csg_subtract(&a, &b).unwrap();
    assert_eq!(result.read_connectivity().num_boundary_halfedges(), 0);

    let conn = result.read_connectivity();
    let positions = result.read_positions();
    let mut volume = 0.0;
    for (f, _) in conn.iter_faces() {
        let ring = conn.face_vertices(f);
        let p1 = positions[ring[0]];
        for (&v2, &v3) in ring[1..].iter().tuple_windows() {
            volume += p1.dot(positions[v2].cross(positions[v3])) / 6.0;
        }
    }
    assert!((volume - 7.0).abs() < 1e-2, "{volume}");
}

#[test]
fn operator_output_round_trips_through_off() {
    let (mesh, counts) = conway("tC").unwrap();
    let text = off_format::export_off(&mesh).unwrap();
    let back = off_format::import_off(&text).unwrap();
    assert_eq!(MeshCounts::of(&back), counts);
}

#[test]
fn role_filters_compose_across_operators() {
    let cube = Platonic::cube();
    let extruded = apply(
        &cube,
        &MeshOperator::Extrude {
            amount: 0.5.into(),
            filter: FaceFilter {
                facing: Some(Vec3::Y),
                ..Default::default()
            },
        },
    )
    .unwrap();
    // Kis only the cap the extrusion created.
    let spiked = apply(
        &extruded,
        &MeshOperator::Kis {
            amount: 0.5.into(),
            filter: FaceFilter::with_roles(&[Role::New]),
        },
    )
    .unwrap();
    let conn = spiked.read_connectivity();
    // One quad cap became 4 triangles: 10 - 1 + 4.
    assert_eq!(conn.num_faces(), 13);
    assert_eq!(conn.num_boundary_halfedges(), 0);
}

#[test]
fn generated_meshes_render_as_buffers() {
    let (mesh, counts) = conway("dtC").unwrap();
    let flat = mesh
        .generate_triangle_buffers_flat(ColorStrategy::ByRole, true)
        .unwrap();
    // Triakis octahedron: 24 triangles.
    assert_eq!(flat.positions.len(), 24 * 3);
    let smooth = mesh
        .generate_triangle_buffers_smooth(ColorStrategy::BySides, true)
        .unwrap();
    assert_eq!(smooth.positions.len(), counts.vertices);
    assert_eq!(mesh.generate_point_buffers().positions.len(), counts.vertices);
}
