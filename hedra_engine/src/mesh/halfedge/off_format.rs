// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Import and export of the Object File Format, a plain-text polygon mesh
//! interchange format: an `OFF` header, a vertex/face/edge count line, one
//! line per vertex with its coordinates, then one line per face with its
//! vertex count followed by indices into the vertex list.

use std::fmt::Write;

use crate::prelude::*;

/// Parses OFF text into a mesh. Blank lines and `#` comments are skipped.
/// The edge count on the counts line is ignored and may be missing; extra
/// fields on vertex or face lines (e.g. per-element colors) are ignored.
pub fn import_off(source: &str) -> Result<HalfEdgeMesh> {
    let mut lines = source
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| anyhow!("Malformed OFF input: empty file"))?;
    if header != "OFF" {
        bail!("Malformed OFF input: expected 'OFF' header, found '{header}'");
    }

    let counts_line = lines
        .next()
        .ok_or_else(|| anyhow!("Malformed OFF input: missing counts line"))?;
    let counts: Vec<usize> = counts_line
        .split_whitespace()
        .map(|tok| {
            tok.parse()
                .map_err(|_| anyhow!("Malformed OFF counts line: '{counts_line}'"))
        })
        .collect::<Result<_>>()?;
    let (num_vertices, num_faces) = match counts.as_slice() {
        // A trailing edge count is customary but carries no information.
        [v, f] | [v, f, _] => (*v, *f),
        _ => bail!("Malformed OFF counts line: '{counts_line}'"),
    };

    let mut positions = Vec::with_capacity(num_vertices);
    for _ in 0..num_vertices {
        let line = lines
            .next()
            .ok_or_else(|| anyhow!("Malformed OFF input: expected {num_vertices} vertex lines"))?;
        let coords: Vec<f32> = line
            .split_whitespace()
            .take(3)
            .map(|tok| {
                tok.parse()
                    .map_err(|_| anyhow!("Malformed OFF vertex line: '{line}'"))
            })
            .collect::<Result<_>>()?;
        match coords.as_slice() {
            [x, y, z] => positions.push(Vec3::new(*x, *y, *z)),
            _ => bail!("Malformed OFF vertex line: '{line}'"),
        }
    }

    let mut polygons: Vec<SVec<u32>> = Vec::with_capacity(num_faces);
    for _ in 0..num_faces {
        let line = lines
            .next()
            .ok_or_else(|| anyhow!("Malformed OFF input: expected {num_faces} face lines"))?;
        let mut tokens = line.split_whitespace();
        let sides: usize = tokens
            .next()
            .and_then(|tok| tok.parse().ok())
            .ok_or_else(|| anyhow!("Malformed OFF face line: '{line}'"))?;
        let indices: SVec<u32> = tokens
            .by_ref()
            .take(sides)
            .map(|tok| {
                let idx: u32 = tok
                    .parse()
                    .map_err(|_| anyhow!("Malformed OFF face line: '{line}'"))?;
                if idx as usize >= num_vertices {
                    bail!("OFF face index {idx} is out of range: '{line}'");
                }
                Ok(idx)
            })
            .collect::<Result<_>>()?;
        if indices.len() != sides {
            bail!("Malformed OFF face line: '{line}'");
        }
        polygons.push(indices);
    }

    HalfEdgeMesh::build_from_polygons(&positions, &polygons)
}

/// Serializes the mesh as OFF text. Vertex indices follow connectivity
/// iteration order, so importing the output reproduces the same counts and
/// per-face side multiset.
pub fn export_off(mesh: &HalfEdgeMesh) -> Result<String> {
    let conn = mesh.read_connectivity();
    let positions = mesh.read_positions();
    let mapping = conn.vertex_mapping();

    let halfedges = conn.num_halfedges();
    let num_edges = (halfedges + conn.num_boundary_halfedges()) / 2;

    let mut out = String::new();
    writeln!(out, "OFF")?;
    writeln!(out, "{} {} {}", conn.num_vertices(), conn.num_faces(), num_edges)?;
    for (v, _) in conn.iter_vertices() {
        let pos = positions[v];
        writeln!(out, "{} {} {}", pos.x, pos.y, pos.z)?;
    }
    for (f, _) in conn.iter_faces() {
        let ring = conn.face_vertices(f);
        write!(out, "{}", ring.len())?;
        for idx in mapping.map_seq(&ring) {
            write!(out, " {idx}")?;
        }
        writeln!(out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::super::primitives::Platonic;
    use super::*;

    #[test]
    fn import_tetrahedron() {
        let source = "\
# a regular tetrahedron
OFF
4 4 6
1 1 1
1 -1 -1
-1 1 -1
-1 -1 1
3 0 1 2
3 0 2 3
3 0 3 1
3 1 3 2
";
        let mesh = import_off(source).unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 4);
        assert_eq!(conn.num_faces(), 4);
        assert_eq!(conn.num_boundary_halfedges(), 0);
    }

    #[test]
    fn trailing_edge_count_is_optional() {
        let source = "OFF\n3 1\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n";
        let mesh = import_off(source).unwrap();
        assert_eq!(mesh.read_connectivity().num_faces(), 1);
    }

    #[test]
    fn face_colors_are_ignored() {
        let source = "OFF\n3 1 3\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2 0.5 0.5 0.5\n";
        assert!(import_off(source).is_ok());
    }

    #[test]
    fn errors_echo_the_offending_line() {
        let bad_vertex = "OFF\n3 1 3\n0 0 zero\n1 0 0\n0 1 0\n3 0 1 2\n";
        let err = import_off(bad_vertex).unwrap_err().to_string();
        assert!(err.contains("0 0 zero"), "{err}");

        let bad_face = "OFF\n3 1 3\n0 0 0\n1 0 0\n0 1 0\n3 0 1 7\n";
        let err = import_off(bad_face).unwrap_err().to_string();
        assert!(err.contains("3 0 1 7"), "{err}");

        let bad_header = "PLY\n3 1 3\n";
        let err = import_off(bad_header).unwrap_err().to_string();
        assert!(err.contains("PLY"), "{err}");
    }

    #[test]
    fn round_trip_preserves_counts_and_side_multiset() {
        let mesh = Platonic::dodecahedron();
        let text = export_off(&mesh).unwrap();
        let back = import_off(&text).unwrap();

        fn side_multiset(mesh: &HalfEdgeMesh) -> Vec<usize> {
            let conn = mesh.read_connectivity();
            let mut sides: Vec<usize> =
                conn.iter_faces().map(|(f, _)| conn.face_sides(f)).collect();
            sides.sort_unstable();
            sides
        }

        assert_eq!(
            mesh.read_connectivity().num_vertices(),
            back.read_connectivity().num_vertices()
        );
        assert_eq!(side_multiset(&mesh), side_multiset(&back));
    }
}
