// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::*;

pub struct Box;

impl Box {
    pub fn build(center: Vec3, size: Vec3) -> HalfEdgeMesh {
        let hsize = size * 0.5;

        let v1 = center + Vec3::new(-hsize.x, -hsize.y, -hsize.z);
        let v2 = center + Vec3::new(hsize.x, -hsize.y, -hsize.z);
        let v3 = center + Vec3::new(hsize.x, -hsize.y, hsize.z);
        let v4 = center + Vec3::new(-hsize.x, -hsize.y, hsize.z);

        let v5 = center + Vec3::new(-hsize.x, hsize.y, -hsize.z);
        let v6 = center + Vec3::new(-hsize.x, hsize.y, hsize.z);
        let v7 = center + Vec3::new(hsize.x, hsize.y, hsize.z);
        let v8 = center + Vec3::new(hsize.x, hsize.y, -hsize.z);

        HalfEdgeMesh::build_from_polygons(
            &[v1, v2, v3, v4, v5, v6, v7, v8],
            &[
                &[0, 1, 2, 3],
                &[4, 5, 6, 7],
                &[4, 7, 1, 0],
                &[3, 2, 6, 5],
                &[5, 4, 0, 3],
                &[6, 2, 1, 7],
            ],
        )
        .expect("Box construction should not fail")
    }
}

pub struct Quad;
impl Quad {
    pub fn build(center: Vec3, normal: Vec3, right: Vec3, size: Vec2) -> HalfEdgeMesh {
        let normal = normal.normalize();
        let right = right.normalize();
        let forward = normal.cross(right);

        let hsize = size * 0.5;

        let v1 = center + hsize.x * right + hsize.y * forward;
        let v2 = center - hsize.x * right + hsize.y * forward;
        let v3 = center - hsize.x * right - hsize.y * forward;
        let v4 = center + hsize.x * right - hsize.y * forward;

        HalfEdgeMesh::build_from_polygons(&[v1, v2, v3, v4], &[&[0, 1, 2, 3]])
            .expect("Quad construction should not fail")
    }
}

/// A single flat n-gon face.
pub struct Polygon;
impl Polygon {
    pub fn build(center: Vec3, radius: f32, num_vertices: usize) -> HalfEdgeMesh {
        let angle_delta = (2.0 * PI) / num_vertices as f32;
        let verts = (0..num_vertices)
            .map(|i| {
                let q = Quat::from_rotation_y(angle_delta * i as f32);
                q * (Vec3::Z * radius) + center
            })
            .collect_vec();
        let polygon = (0..num_vertices).collect_vec();

        HalfEdgeMesh::build_from_polygons(&verts, &[&polygon])
            .expect("Polygon construction should not fail")
    }
}

/// A planar grid of quads.
pub struct Grid;
impl Grid {
    pub fn build(
        center: Vec3,
        normal: Vec3,
        right: Vec3,
        size: Vec2,
        cols: usize,
        rows: usize,
    ) -> HalfEdgeMesh {
        let normal = normal.normalize();
        let right = right.normalize();
        let forward = normal.cross(right);

        let mut positions = Vec::with_capacity((cols + 1) * (rows + 1));
        for j in 0..=rows {
            for i in 0..=cols {
                let u = i as f32 / cols as f32 - 0.5;
                let v = j as f32 / rows as f32 - 0.5;
                positions.push(center + u * size.x * right + v * size.y * forward);
            }
        }

        let at = |i: usize, j: usize| (j * (cols + 1) + i) as u32;
        let mut polygons = Vec::with_capacity(cols * rows);
        for j in 0..rows {
            for i in 0..cols {
                polygons.push([at(i, j), at(i + 1, j), at(i + 1, j + 1), at(i, j + 1)]);
            }
        }

        HalfEdgeMesh::build_from_polygons(&positions, &polygons)
            .expect("Grid construction should not fail")
    }
}

fn ring(center: Vec3, radius: f32, y: f32, num_sides: usize, angle_offset: f32) -> Vec<Vec3> {
    (0..num_sides)
        .map(|i| {
            let theta = (2.0 * PI) * i as f32 / num_sides as f32 + angle_offset;
            center + Vec3::new(radius * theta.cos(), y, radius * theta.sin())
        })
        .collect()
}

/// An n-gonal prism: two parallel n-gon caps connected by quads. A 4-prism is
/// a (non axis-aligned) box.
pub struct Prism;
impl Prism {
    pub fn build(center: Vec3, radius: f32, height: f32, num_sides: usize) -> HalfEdgeMesh {
        let n = num_sides;
        let h = height * 0.5;
        let mut positions = ring(center, radius, h, n, 0.0);
        positions.extend(ring(center, radius, -h, n, 0.0));

        let mut polygons: Vec<SVec<u32>> = Vec::with_capacity(n + 2);
        polygons.push((0..n as u32).rev().collect());
        polygons.push((n as u32..2 * n as u32).collect());
        for i in 0..n as u32 {
            let j = (i + 1) % n as u32;
            polygons.push(smallvec::smallvec![i, j, n as u32 + j, n as u32 + i]);
        }

        HalfEdgeMesh::build_from_polygons(&positions, &polygons)
            .expect("Prism construction should not fail")
    }
}

/// An n-gonal antiprism: two parallel n-gon caps, the bottom one rotated half
/// a step, connected by a band of 2n triangles.
pub struct Antiprism;
impl Antiprism {
    pub fn build(center: Vec3, radius: f32, height: f32, num_sides: usize) -> HalfEdgeMesh {
        let n = num_sides;
        let h = height * 0.5;
        let mut positions = ring(center, radius, h, n, 0.0);
        positions.extend(ring(center, radius, -h, n, PI / n as f32));

        let mut polygons: Vec<SVec<u32>> = Vec::with_capacity(2 * n + 2);
        polygons.push((0..n as u32).rev().collect());
        polygons.push((n as u32..2 * n as u32).collect());
        for i in 0..n as u32 {
            let j = (i + 1) % n as u32;
            let prev = (i + n as u32 - 1) % n as u32;
            polygons.push(smallvec::smallvec![i, j, n as u32 + i]);
            polygons.push(smallvec::smallvec![i, n as u32 + i, n as u32 + prev]);
        }

        HalfEdgeMesh::build_from_polygons(&positions, &polygons)
            .expect("Antiprism construction should not fail")
    }
}

/// An n-gonal pyramid: an n-gon base and an apex.
pub struct Pyramid;
impl Pyramid {
    pub fn build(center: Vec3, radius: f32, height: f32, num_sides: usize) -> HalfEdgeMesh {
        let n = num_sides;
        let h = height * 0.5;
        let mut positions = ring(center, radius, -h, n, 0.0);
        positions.push(center + Vec3::Y * h);
        let apex = n as u32;

        let mut polygons: Vec<SVec<u32>> = Vec::with_capacity(n + 1);
        polygons.push((0..n as u32).collect());
        for i in 0..n as u32 {
            let j = (i + 1) % n as u32;
            polygons.push(smallvec::smallvec![apex, j, i]);
        }

        HalfEdgeMesh::build_from_polygons(&positions, &polygons)
            .expect("Pyramid construction should not fail")
    }
}

pub struct UVSphere;
impl UVSphere {
    pub fn build(center: Vec3, segments: u32, rings: u32, radius: f32) -> HalfEdgeMesh {
        let mut vertices = Vec::<Vec3>::new();
        let mut polygons = Vec::<SVec<u32>>::new();

        let top_vertex = 0;
        vertices.push(center + Vec3::Y * radius);

        for i in 0..rings - 1 {
            let phi = PI * (i + 1) as f32 / rings as f32;
            for j in 0..segments {
                let theta = 2.0 * PI * j as f32 / segments as f32;
                let x = phi.sin() * theta.cos() * radius;
                let y = phi.cos() * radius;
                let z = phi.sin() * theta.sin() * radius;
                vertices.push(center + Vec3::new(x, y, z));
            }
        }

        let bottom_vertex = vertices.len() as u32;
        vertices.push(center - Vec3::Y * radius);

        // Top triangles
        for i in 0..segments {
            let i0 = i + 1;
            let i1 = (i + 1) % segments + 1;
            polygons.push(smallvec::smallvec![top_vertex, i1, i0]);
        }
        // Bottom triangles
        for i in 0..segments {
            let i0 = i + segments * (rings - 2) + 1;
            let i1 = (i + 1) % segments + segments * (rings - 2) + 1;
            polygons.push(smallvec::smallvec![bottom_vertex, i0, i1]);
        }
        // Middle quads
        for j in 0..rings - 2 {
            let j0 = j * segments + 1;
            let j1 = (j + 1) * segments + 1;
            for i in 0..segments {
                let i0 = j0 + i;
                let i1 = j0 + (i + 1) % segments;
                let i2 = j1 + (i + 1) % segments;
                let i3 = j1 + i;
                polygons.push(smallvec::smallvec![i0, i1, i2, i3]);
            }
        }

        HalfEdgeMesh::build_from_polygons(&vertices, &polygons)
            .expect("Sphere construction should not fail")
    }
}

/// A surface of revolution: the profile polyline is swept around the Y axis.
///
/// The profile must be ordered bottom-to-top with non-negative x. Points
/// with x ~ 0 become shared pole vertices and produce triangle fans instead
/// of quad rings.
pub struct Revolve;
impl Revolve {
    const POLE_EPS: f32 = 1e-6;

    pub fn build(center: Vec3, profile: &[Vec3], segments: usize) -> Result<HalfEdgeMesh> {
        if profile.len() < 2 {
            bail!("A revolve profile needs at least two points");
        }
        if segments < 3 {
            bail!("A revolve needs at least three segments");
        }

        // Each row is either a full ring of `segments` vertices or a single
        // pole vertex.
        let mut positions = Vec::new();
        let mut rows: Vec<(u32, bool)> = Vec::new(); // (first index, is_pole)
        for p in profile {
            let first = positions.len() as u32;
            if p.x.abs() < Self::POLE_EPS {
                rows.push((first, true));
                positions.push(center + Vec3::Y * p.y);
            } else {
                rows.push((first, false));
                positions.extend(ring(center, p.x, p.y, segments, 0.0));
            }
        }

        let n = segments as u32;
        let mut polygons: Vec<SVec<u32>> = Vec::new();
        for w in rows.windows(2) {
            let (lo, lo_pole) = w[0];
            let (hi, hi_pole) = w[1];
            match (lo_pole, hi_pole) {
                (false, false) => {
                    for i in 0..n {
                        let j = (i + 1) % n;
                        polygons.push(smallvec::smallvec![hi + i, hi + j, lo + j, lo + i]);
                    }
                }
                (true, false) => {
                    for i in 0..n {
                        let j = (i + 1) % n;
                        polygons.push(smallvec::smallvec![lo, hi + i, hi + j]);
                    }
                }
                (false, true) => {
                    for i in 0..n {
                        let j = (i + 1) % n;
                        polygons.push(smallvec::smallvec![hi, lo + j, lo + i]);
                    }
                }
                (true, true) => {
                    bail!("A revolve profile cannot have two consecutive points on the axis")
                }
            }
        }

        HalfEdgeMesh::build_from_polygons(&positions, &polygons)
    }
}

/// The five Platonic solids, centered at the origin. These are the seeds of
/// the Conway notation front-end.
pub struct Platonic;
impl Platonic {
    pub fn tetrahedron() -> HalfEdgeMesh {
        let p = 1.0 / 3.0_f32.sqrt();
        HalfEdgeMesh::build_from_polygons(
            &[
                Vec3::new(p, p, p),
                Vec3::new(p, -p, -p),
                Vec3::new(-p, p, -p),
                Vec3::new(-p, -p, p),
            ],
            &[[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]],
        )
        .expect("Tetrahedron construction should not fail")
    }

    pub fn cube() -> HalfEdgeMesh {
        Box::build(Vec3::ZERO, Vec3::splat(2.0))
    }

    pub fn octahedron() -> HalfEdgeMesh {
        HalfEdgeMesh::build_from_polygons(
            &[Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z],
            &[
                [0, 2, 4],
                [2, 1, 4],
                [1, 3, 4],
                [3, 0, 4],
                [2, 0, 5],
                [1, 2, 5],
                [3, 1, 5],
                [0, 3, 5],
            ],
        )
        .expect("Octahedron construction should not fail")
    }

    pub fn icosahedron() -> HalfEdgeMesh {
        let p = (1.0 + 5.0_f32.sqrt()) / 2.0;
        HalfEdgeMesh::build_from_polygons(
            &[
                Vec3::new(-1.0, p, 0.0),
                Vec3::new(1.0, p, 0.0),
                Vec3::new(-1.0, -p, 0.0),
                Vec3::new(1.0, -p, 0.0),
                Vec3::new(0.0, -1.0, p),
                Vec3::new(0.0, 1.0, p),
                Vec3::new(0.0, -1.0, -p),
                Vec3::new(0.0, 1.0, -p),
                Vec3::new(p, 0.0, -1.0),
                Vec3::new(p, 0.0, 1.0),
                Vec3::new(-p, 0.0, -1.0),
                Vec3::new(-p, 0.0, 1.0),
            ],
            &[
                [0, 11, 5],
                [0, 5, 1],
                [0, 1, 7],
                [0, 7, 10],
                [0, 10, 11],
                [1, 5, 9],
                [5, 11, 4],
                [11, 10, 2],
                [10, 7, 6],
                [7, 1, 8],
                [3, 9, 4],
                [3, 4, 2],
                [3, 2, 6],
                [3, 6, 8],
                [3, 8, 9],
                [4, 9, 5],
                [2, 4, 11],
                [6, 2, 10],
                [8, 6, 7],
                [9, 8, 1],
            ],
        )
        .expect("Icosahedron construction should not fail")
    }

    pub fn dodecahedron() -> HalfEdgeMesh {
        // The dual of the icosahedron, which is much easier to list by hand.
        Self::icosahedron()
            .dual()
            .expect("Dodecahedron construction should not fail")
    }
}

/// A closed, serializable catalog of every parametric shape this crate can
/// build, dispatched through a single [`ShapeRecipe::build`] entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShapeRecipe {
    Box { center: Vec3, size: Vec3 },
    Quad { center: Vec3, normal: Vec3, right: Vec3, size: Vec2 },
    Polygon { center: Vec3, radius: f32, num_sides: usize },
    Grid { center: Vec3, normal: Vec3, right: Vec3, size: Vec2, cols: usize, rows: usize },
    Prism { center: Vec3, radius: f32, height: f32, num_sides: usize },
    Antiprism { center: Vec3, radius: f32, height: f32, num_sides: usize },
    Pyramid { center: Vec3, radius: f32, height: f32, num_sides: usize },
    UVSphere { center: Vec3, segments: u32, rings: u32, radius: f32 },
    Revolve { center: Vec3, profile: Vec<Vec3>, segments: usize },
    Tetrahedron,
    Cube,
    Octahedron,
    Dodecahedron,
    Icosahedron,
}

impl ShapeRecipe {
    pub fn build(&self) -> Result<HalfEdgeMesh> {
        fn check_sides(num_sides: usize) -> Result<()> {
            if num_sides < 3 {
                bail!("A radial shape needs at least three sides, got {num_sides}");
            }
            Ok(())
        }

        match self {
            ShapeRecipe::Box { center, size } => Ok(Box::build(*center, *size)),
            ShapeRecipe::Quad {
                center,
                normal,
                right,
                size,
            } => Ok(Quad::build(*center, *normal, *right, *size)),
            ShapeRecipe::Polygon {
                center,
                radius,
                num_sides,
            } => {
                check_sides(*num_sides)?;
                Ok(Polygon::build(*center, *radius, *num_sides))
            }
            ShapeRecipe::Grid {
                center,
                normal,
                right,
                size,
                cols,
                rows,
            } => {
                if *cols == 0 || *rows == 0 {
                    bail!("A grid needs at least one cell per axis");
                }
                Ok(Grid::build(*center, *normal, *right, *size, *cols, *rows))
            }
            ShapeRecipe::Prism {
                center,
                radius,
                height,
                num_sides,
            } => {
                check_sides(*num_sides)?;
                Ok(Prism::build(*center, *radius, *height, *num_sides))
            }
            ShapeRecipe::Antiprism {
                center,
                radius,
                height,
                num_sides,
            } => {
                check_sides(*num_sides)?;
                Ok(Antiprism::build(*center, *radius, *height, *num_sides))
            }
            ShapeRecipe::Pyramid {
                center,
                radius,
                height,
                num_sides,
            } => {
                check_sides(*num_sides)?;
                Ok(Pyramid::build(*center, *radius, *height, *num_sides))
            }
            ShapeRecipe::UVSphere {
                center,
                segments,
                rings,
                radius,
            } => {
                if *segments < 3 || *rings < 2 {
                    bail!("A UV sphere needs at least three segments and two rings");
                }
                Ok(UVSphere::build(*center, *segments, *rings, *radius))
            }
            ShapeRecipe::Revolve {
                center,
                profile,
                segments,
            } => Revolve::build(*center, profile, *segments),
            ShapeRecipe::Tetrahedron => Ok(Platonic::tetrahedron()),
            ShapeRecipe::Cube => Ok(Platonic::cube()),
            ShapeRecipe::Octahedron => Ok(Platonic::octahedron()),
            ShapeRecipe::Dodecahedron => Ok(Platonic::dodecahedron()),
            ShapeRecipe::Icosahedron => Ok(Platonic::icosahedron()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn counts(mesh: &HalfEdgeMesh) -> (usize, usize, usize) {
        let conn = mesh.read_connectivity();
        (
            conn.num_vertices(),
            conn.num_faces(),
            conn.num_halfedges(),
        )
    }

    #[test]
    fn platonic_counts() {
        assert_eq!(counts(&Platonic::tetrahedron()), (4, 4, 12));
        assert_eq!(counts(&Platonic::cube()), (8, 6, 24));
        assert_eq!(counts(&Platonic::octahedron()), (6, 8, 24));
        assert_eq!(counts(&Platonic::dodecahedron()), (20, 12, 60));
        assert_eq!(counts(&Platonic::icosahedron()), (12, 20, 60));
    }

    #[test]
    fn platonic_solids_are_closed() {
        for mesh in [
            Platonic::tetrahedron(),
            Platonic::cube(),
            Platonic::octahedron(),
            Platonic::dodecahedron(),
            Platonic::icosahedron(),
        ] {
            assert_eq!(mesh.read_connectivity().num_boundary_halfedges(), 0);
        }
    }

    #[test]
    fn platonic_solids_wind_outward() {
        for mesh in [
            Platonic::tetrahedron(),
            Platonic::cube(),
            Platonic::octahedron(),
            Platonic::dodecahedron(),
            Platonic::icosahedron(),
        ] {
            let conn = mesh.read_connectivity();
            let positions = mesh.read_positions();
            for (f, _) in conn.iter_faces() {
                let normal = conn.face_normal(&positions, f).unwrap();
                let centroid = conn.face_vertex_average(&positions, f);
                assert!(
                    normal.dot(centroid) > 0.0,
                    "face {f:?} winds inward"
                );
            }
        }
    }

    #[test]
    fn prism_counts() {
        // n-prism: 2n vertices, n+2 faces, every edge shared.
        let mesh = Prism::build(Vec3::ZERO, 1.0, 2.0, 6);
        assert_eq!(counts(&mesh), (12, 8, 36));
        assert_eq!(mesh.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn antiprism_counts() {
        // n-antiprism: 2n vertices, 2n+2 faces, 4n edges.
        let mesh = Antiprism::build(Vec3::ZERO, 1.0, 1.0, 5);
        assert_eq!(counts(&mesh), (10, 12, 40));
        assert_eq!(mesh.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn pyramid_counts() {
        let mesh = Pyramid::build(Vec3::ZERO, 1.0, 1.0, 4);
        assert_eq!(counts(&mesh), (5, 5, 16));
        assert_eq!(mesh.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn grid_has_boundary() {
        let mesh = Grid::build(Vec3::ZERO, Vec3::Y, Vec3::X, Vec2::ONE, 3, 2);
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 12);
        assert_eq!(conn.num_faces(), 6);
        // The outer rim: 2 * (3 + 2) edges.
        assert_eq!(conn.num_boundary_halfedges(), 10);
    }

    #[test]
    fn revolve_with_poles_is_closed() {
        // A diamond profile: pole, equator, pole.
        let profile = [
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let mesh = Revolve::build(Vec3::ZERO, &profile, 8).unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 10);
        assert_eq!(conn.num_faces(), 16);
        assert_eq!(conn.num_boundary_halfedges(), 0);
    }

    #[test]
    fn revolve_open_profile_has_boundary() {
        let profile = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        let mesh = Revolve::build(Vec3::ZERO, &profile, 6).unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_faces(), 6);
        assert_eq!(conn.num_boundary_halfedges(), 12);
    }

    #[test]
    fn recipe_round_trips_and_builds() {
        let recipe = ShapeRecipe::Prism {
            center: Vec3::ZERO,
            radius: 1.0,
            height: 2.0,
            num_sides: 6,
        };
        let json = serde_json::to_string(&recipe).unwrap();
        let parsed: ShapeRecipe = serde_json::from_str(&json).unwrap();
        let mesh = parsed.build().unwrap();
        assert_eq!(mesh.read_connectivity().num_faces(), 8);

        assert!(ShapeRecipe::Polygon {
            center: Vec3::ZERO,
            radius: 1.0,
            num_sides: 2
        }
        .build()
        .is_err());
    }
}
