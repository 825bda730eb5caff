// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

/// Removes `h_l` and its pair `h_r`, merging their respective faces together.
/// The face on the L side will be kept, and the R side removed. Both sides of
/// the edge that will be dissolved need to be on a face. Boundary halfedges are
/// not allowed
pub fn dissolve_edge(mesh: &mut MeshConnectivity, h_l: HalfEdgeId) -> Result<()> {
    // --- Collect handles ---
    let h_r = mesh.at_halfedge(h_l).pair().try_end()?;
    // If the face cannot be retrieved, a HalfEdgeHasNoFace is returned
    let f_l = mesh.at_halfedge(h_l).face().try_end()?;
    let f_r = mesh.at_halfedge(h_r).face().try_end()?;
    let (v, w) = mesh.at_halfedge(h_l).src_dst_pair()?;

    if f_l == f_r {
        bail!("Cannot dissolve an edge whose two sides are on the same face");
    }

    let h_l_nxt = mesh.at_halfedge(h_l).next().try_end()?;
    let h_l_prv = mesh.at_halfedge(h_l).previous().try_end()?;
    let h_r_nxt = mesh.at_halfedge(h_r).next().try_end()?;
    let h_r_prv = mesh.at_halfedge(h_r).previous().try_end()?;

    let halfedges_r = mesh.halfedge_loop(h_r);

    // --- Fix connectivity ---
    mesh[h_r_prv].next = Some(h_l_nxt);
    mesh[h_l_prv].next = Some(h_r_nxt);
    for h_r in halfedges_r {
        mesh[h_r].face = Some(f_l);
    }
    // Faces or vertices may point to the halfedge we're about to remove. In
    // that case we need to rotate them. We only do it in that case, to avoid
    // modifying the mesh more than necessary.
    if mesh[f_l].halfedge == Some(h_l) {
        mesh[f_l].halfedge = Some(h_l_prv);
    }
    if mesh[v].halfedge == Some(h_l) {
        mesh[v].halfedge = Some(h_l_nxt);
    }
    if mesh[w].halfedge == Some(h_r) {
        mesh[w].halfedge = Some(h_r_nxt);
    }

    // --- Remove elements ---
    mesh.remove_halfedge(h_l);
    mesh.remove_halfedge(h_r);
    mesh.remove_face(f_r);

    Ok(())
}

/// Splits an edge, creating a vertex in between, placed at `at` or at the
/// edge midpoint when no point is supplied. Both the halfedge and its pair,
/// when one exists, are split in two, and both adjacent faces gain a side.
///
/// ## Id Stability
/// Let (v, w) the (src, dst) endpoints of h, and x the new vertex id. It is
/// guaranteed that on the new mesh, the halfedge "h" will remain on the second
/// half of the edge, that is, from x to w. The new edge will go from v to x.
pub fn split_edge(
    mesh: &mut MeshConnectivity,
    positions: &mut Positions,
    h: HalfEdgeId,
    at: Option<Vec3>,
) -> Result<VertexId> {
    // Select the necessary data elements
    let h_l = h;
    let h_l_prev = mesh.at_halfedge(h_l).previous().try_end()?;
    let f_l = mesh.at_halfedge(h_l).face().try_end().ok();
    let (v, w) = mesh.at_halfedge(h).src_dst_pair()?;

    // The new vertex sits at the midpoint unless the caller supplies a point.
    let pos = at.unwrap_or_else(|| positions[v].lerp(positions[w], 0.5));

    // Allocate new elements
    let x = mesh.alloc_vertex(positions, pos, None);
    let h_l_2 = mesh.alloc_halfedge(HalfEdge::default());

    // --- Update connectivity on the L side ---
    mesh[h_l_2].next = Some(h_l);
    mesh[h_l_prev].next = Some(h_l_2);
    mesh[h_l].vertex = Some(x);
    mesh[h_l_2].vertex = Some(v);
    mesh[h_l_2].face = f_l;
    mesh[x].halfedge = Some(h_l);
    mesh[v].halfedge = Some(h_l_2);

    // --- The R side only exists when the edge is not on the boundary ---
    if let Some(h_r) = mesh[h_l].pair {
        let h_r_next = mesh.at_halfedge(h_r).next().try_end()?;
        let f_r = mesh.at_halfedge(h_r).face().try_end().ok();
        let h_r_2 = mesh.alloc_halfedge(HalfEdge::default());

        mesh[h_r].next = Some(h_r_2);
        mesh[h_r_2].next = Some(h_r_next);

        // After the split, h_l spans (x, w) and h_r spans (w, x), so they
        // remain pairs. The new halfedges span (v, x) and (x, v).
        mesh[h_l_2].pair = Some(h_r_2);
        mesh[h_r_2].pair = Some(h_l_2);

        mesh[h_r_2].vertex = Some(x);
        mesh[h_r_2].face = f_r;
    }

    Ok(x)
}

/// Removes the given faces and their halfedges. Vertices are left in place
/// even when they end up unreferenced: orphans are only filtered out when the
/// final renderable buffers are built. Pairs pointing into the removed region
/// become boundary halfedges.
pub fn remove_faces(mesh: &mut MeshConnectivity, faces: &[FaceId]) -> Result<()> {
    let mut removed_halfedges = HashSet::new();
    let mut affected_vertices = HashSet::new();

    for &f in faces {
        if mesh.faces.get(f).is_none() {
            bail!("Cannot remove face {f:?}: it does not exist in this mesh");
        }
        for h in mesh.face_edges(f).iter_cpy() {
            removed_halfedges.insert(h);
            affected_vertices.insert(mesh.at_halfedge(h).vertex().try_end()?);
        }
    }

    // Pairs that survive become boundary.
    for &h in &removed_halfedges {
        if let Some(p) = mesh[h].pair {
            if !removed_halfedges.contains(&p) {
                mesh[p].pair = None;
            }
        }
    }
    for &h in &removed_halfedges {
        mesh.remove_halfedge(h);
    }
    for &f in faces {
        mesh.remove_face(f);
    }

    // Surviving vertices may point at a removed halfedge. Repoint them to any
    // remaining outgoing halfedge, or leave them as orphans.
    for v in affected_vertices {
        if let Some(h) = mesh[v].halfedge {
            if removed_halfedges.contains(&h) {
                let replacement = mesh
                    .iter_halfedges()
                    .find_map(|(h2, he)| (he.vertex == Some(v)).then_some(h2));
                mesh[v].halfedge = replacement;
            }
        }
    }

    Ok(())
}

/// Applies a translation, rotation (XYZ euler) and scale to every vertex.
pub fn transform(this: &mut HalfEdgeMesh, translate: Vec3, rotate: Vec3, scale: Vec3) -> Result<()> {
    let mut positions = this.write_positions();
    let conn = this.read_connectivity();

    let matrix = Mat4::from_scale_rotation_translation(
        scale,
        Quat::from_euler(glam::EulerRot::XYZ, rotate.x, rotate.y, rotate.z),
        translate,
    );

    for (vertex, _) in conn.iter_vertices() {
        positions[vertex] = matrix.transform_point3(positions[vertex]);
    }

    Ok(())
}

/// Generates the flat normals channel for this mesh
pub fn generate_flat_normals_channel(mesh: &HalfEdgeMesh) -> Result<Channel<FaceId, Vec3>> {
    let positions = mesh.read_positions();
    let conn = mesh.read_connectivity();
    let mut normals = Channel::<FaceId, Vec3>::new();

    for (face, _) in conn.iter_faces() {
        // NOTE: Faces with only 2 vertices get a zero normal.
        normals[face] = conn.face_normal(&positions, face).unwrap_or(Vec3::ZERO);
    }

    Ok(normals)
}

/// Computes the flat normal channel for this mesh and configures the mesh to
/// generate flat normals. Flat normals are attached to faces.
pub fn set_flat_normals(mesh: &mut HalfEdgeMesh) -> Result<()> {
    let normals = generate_flat_normals_channel(mesh)?;
    let normals_ch_id = mesh
        .channels
        .replace_or_create_channel("face_normal", normals);

    mesh.default_channels.face_normals = Some(normals_ch_id);
    mesh.gen_config.smooth_normals = false;

    Ok(())
}

/// Generates the smooth normals channel for this mesh.
pub fn generate_smooth_normals_channel(mesh: &HalfEdgeMesh) -> Result<Channel<VertexId, Vec3>> {
    let positions = mesh.read_positions();
    let conn = mesh.read_connectivity();
    let mut normals = Channel::<VertexId, Vec3>::new();

    for (vertex, _) in conn.iter_vertices() {
        let adjacent_faces = conn.at_vertex(vertex).adjacent_faces()?;
        let mut normal = Vec3::ZERO;
        for face in adjacent_faces.iter_cpy() {
            normal += conn.face_normal(&positions, face).unwrap_or(Vec3::ZERO);
        }
        normals[vertex] = normal.normalize_or_zero();
    }

    Ok(normals)
}

/// Computes the smooth normal channel for this mesh and configures the mesh
/// to generate smooth normals. Smooth normals are attached to vertices.
pub fn set_smooth_normals(mesh: &mut HalfEdgeMesh) -> Result<()> {
    let normals = generate_smooth_normals_channel(mesh)?;
    let normals_ch_id = mesh
        .channels
        .replace_or_create_channel("vertex_normal", normals);

    mesh.gen_config.smooth_normals = true;
    mesh.default_channels.vertex_normals = Some(normals_ch_id);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::primitives;
    use super::*;

    fn two_quads() -> HalfEdgeMesh {
        let positions = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let polygons: [&[u32]; 2] = [&[0, 1, 4, 5], &[1, 2, 3, 4]];
        HalfEdgeMesh::build_from_polygons(&positions, &polygons).unwrap()
    }

    #[test]
    fn split_interior_edge() {
        let mesh = two_quads();
        let mut conn = mesh.write_connectivity();
        let mut positions = mesh.write_positions();

        let shared = conn
            .iter_halfedges()
            .find_map(|(h, he)| (he.pair.is_some()).then_some(h))
            .unwrap();
        let (v_before, h_before) = (conn.num_vertices(), conn.num_halfedges());

        let x = split_edge(&mut conn, &mut positions, shared, None).unwrap();

        assert_eq!(conn.num_vertices(), v_before + 1);
        assert_eq!(conn.num_halfedges(), h_before + 2);
        assert_eq!(positions[x], Vec3::new(1.0, 0.5, 0.0));
        // Both adjacent faces became pentagons.
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.face_sides(f), 5);
        }
    }

    #[test]
    fn split_boundary_edge() {
        let mesh = two_quads();
        let mut conn = mesh.write_connectivity();
        let mut positions = mesh.write_positions();

        let boundary = conn
            .iter_halfedges()
            .find_map(|(h, he)| (he.pair.is_none()).then_some(h))
            .unwrap();
        let h_before = conn.num_halfedges();

        split_edge(&mut conn, &mut positions, boundary, None).unwrap();

        // Only one new halfedge on the boundary.
        assert_eq!(conn.num_halfedges(), h_before + 1);
    }

    #[test]
    fn dissolve_shared_edge_merges_faces() {
        let mesh = two_quads();
        let mut conn = mesh.write_connectivity();

        let shared = conn
            .iter_halfedges()
            .find_map(|(h, he)| (he.pair.is_some()).then_some(h))
            .unwrap();
        dissolve_edge(&mut conn, shared).unwrap();

        assert_eq!(conn.num_faces(), 1);
        assert_eq!(conn.num_vertices(), 6);
        let (f, _) = conn.iter_faces().next().unwrap();
        assert_eq!(conn.face_sides(f), 6);
    }

    #[test]
    fn remove_faces_leaves_orphan_vertices() {
        let mesh = two_quads();
        let mut conn = mesh.write_connectivity();

        let f = conn.iter_faces().next().map(|(f, _)| f).unwrap();
        remove_faces(&mut conn, &[f]).unwrap();

        assert_eq!(conn.num_faces(), 1);
        // No automatic garbage collection of now-unreferenced vertices.
        assert_eq!(conn.num_vertices(), 6);
        // The remaining face is fully boundary now.
        assert_eq!(conn.num_boundary_halfedges(), 4);
    }

    #[test]
    fn flat_and_smooth_normals() {
        let mut mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        set_flat_normals(&mut mesh).unwrap();
        {
            let normals = mesh.read_face_normals().unwrap();
            let conn = mesh.read_connectivity();
            for (f, _) in conn.iter_faces() {
                assert!((normals[f].length() - 1.0).abs() < 1e-5);
            }
        }
        set_smooth_normals(&mut mesh).unwrap();
        let normals = mesh.read_vertex_normals().unwrap();
        let conn = mesh.read_connectivity();
        for (v, _) in conn.iter_vertices() {
            assert!(normals[v].length() > 0.0);
        }
    }
}
