// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

/// The fixed per-face color list. Strategies that pick colors by index use
/// it modulo its length.
pub const FACE_PALETTE: [Vec3; 12] = [
    Vec3::new(0.90, 0.36, 0.31),
    Vec3::new(0.95, 0.61, 0.26),
    Vec3::new(0.98, 0.83, 0.33),
    Vec3::new(0.68, 0.85, 0.36),
    Vec3::new(0.33, 0.73, 0.42),
    Vec3::new(0.30, 0.79, 0.69),
    Vec3::new(0.31, 0.67, 0.90),
    Vec3::new(0.36, 0.48, 0.89),
    Vec3::new(0.56, 0.41, 0.86),
    Vec3::new(0.79, 0.40, 0.79),
    Vec3::new(0.91, 0.42, 0.61),
    Vec3::new(0.58, 0.44, 0.36),
];

/// How face (or vertex) colors are picked when emitting renderable buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorStrategy {
    /// Color by topological provenance: see [`Role`].
    ByRole,
    /// Color by the face's string tag, hashed into [`FACE_PALETTE`].
    /// Untagged faces render neutral gray.
    ByTag,
    /// `FACE_PALETTE[sides % 12]`, so triangles, quads, pentagons... each get
    /// a consistent color.
    BySides,
    /// A single palette entry for the whole mesh.
    ByPalette(usize),
}

fn role_color(role: Role) -> Vec3 {
    match role {
        Role::Existing => Vec3::splat(0.7),
        Role::New => Vec3::new(0.95, 0.61, 0.26),
        Role::NewAlt => Vec3::new(0.31, 0.67, 0.90),
        Role::Ignored => Vec3::splat(0.25),
    }
}

fn tag_color(tag: Option<&str>) -> Vec3 {
    match tag {
        // Any stable hash works here, it only needs to separate tags.
        Some(tag) => {
            let hash: usize = tag.bytes().map(|b| b as usize).sum();
            FACE_PALETTE[hash % FACE_PALETTE.len()]
        }
        None => Vec3::splat(0.7),
    }
}

impl ColorStrategy {
    fn face_color(&self, conn: &MeshConnectivity, roles: &Channel<FaceId, Role>, f: FaceId) -> Vec3 {
        match self {
            ColorStrategy::ByRole => role_color(roles[f]),
            ColorStrategy::ByTag => tag_color(conn.face_tag(f)),
            ColorStrategy::BySides => FACE_PALETTE[conn.face_sides(f) % FACE_PALETTE.len()],
            ColorStrategy::ByPalette(idx) => FACE_PALETTE[idx % FACE_PALETTE.len()],
        }
    }
}

/// The main representation to draw the mesh's faces as triangles on the GPU.
/// Faces are emitted as triangle fans, so the buffers render with a plain
/// triangle-list topology.
#[derive(Clone, Debug)]
pub struct VertexIndexBuffers {
    /// Vertex positions, one per vertex.
    pub positions: Vec<Vec3>,
    /// Vertex normals, one per vertex.
    pub normals: Vec<Vec3>,
    /// Vertex colors, one per vertex.
    pub colors: Vec<Vec3>,
    /// Indices: 3*N where N is the number of triangles. Indices point to
    /// elements of the other three buffers.
    pub indices: Vec<u32>,
}

/// This representation is suitable to draw the mesh's vertices as a point
/// cloud.
///
/// Note that this structure has no indices because that would be pointless:
/// indices can be generated as the sequence 1..N where N is the length of the
/// `positions` buffer.
pub struct PointBuffers {
    /// Vertex positions
    pub positions: Vec<Vec3>,
}

/// This representation is suitable to draw the mesh's edges as a line list,
/// one segment per edge.
pub struct LineBuffers {
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec3>,
}

impl HalfEdgeMesh {
    /// Generates the [`VertexIndexBuffers`] for this mesh with per-face
    /// normals and colors: every face corner is emitted as a distinct vertex.
    ///
    /// If `force_gen` is true, any face normals channel already stored in the
    /// mesh is ignored and normals are recomputed from scratch.
    #[profiling::function]
    pub fn generate_triangle_buffers_flat(
        &self,
        color_strategy: ColorStrategy,
        force_gen: bool,
    ) -> Result<VertexIndexBuffers> {
        let positions_ch = self.read_positions();
        let conn = self.read_connectivity();
        let face_roles = self.read_face_roles();

        // This ugliness is needed because we need to either borrow the channel
        // from the mesh or generate it here, but if we generate inside the if
        // statement the ref owner gets dropped at the end of the scope.
        let normal_ch: &Channel<_, _>;
        #[allow(unused_assignments)]
        let mut extend_lifetime = None;
        let existing_normals_ch = self.read_face_normals();
        if !force_gen && existing_normals_ch.is_some() {
            normal_ch = existing_normals_ch.as_deref().unwrap();
        } else {
            extend_lifetime = Some(edit_ops::generate_flat_normals_channel(self)?);
            normal_ch = extend_lifetime.as_ref().unwrap();
        }

        let mut positions = vec![];
        let mut normals = vec![];
        let mut colors = vec![];

        for (face_id, _face) in conn.faces.iter() {
            // We try to be a bit forgiving here. We don't want to stop
            // rendering even if we have slightly malformed meshes.
            let normal = normal_ch[face_id];
            let color = color_strategy.face_color(&conn, &face_roles, face_id);

            let vertices = conn.face_vertices(face_id);
            let v1 = vertices[0];

            for (&v2, &v3) in vertices[1..].iter().tuple_windows() {
                positions.push(positions_ch[v1]);
                positions.push(positions_ch[v2]);
                positions.push(positions_ch[v3]);
                normals.extend([normal; 3]);
                colors.extend([color; 3]);
            }
        }

        Ok(VertexIndexBuffers {
            indices: (0u32..positions.len() as u32).collect(),
            positions,
            normals,
            colors,
        })
    }

    /// Generates the [`VertexIndexBuffers`] for this mesh with per-vertex
    /// normals and colors: vertices are shared between the faces that use
    /// them, and orphan vertices are filtered out.
    ///
    /// If `force_gen` is true, ignores any existing vertex normals channel in
    /// the mesh and generates one from scratch instead.
    #[profiling::function]
    pub fn generate_triangle_buffers_smooth(
        &self,
        color_strategy: ColorStrategy,
        force_gen: bool,
    ) -> Result<VertexIndexBuffers> {
        let positions_ch = self.read_positions();
        let conn = self.read_connectivity();
        let face_roles = self.read_face_roles();
        let vertex_roles = self.read_vertex_roles();

        let normal_ch: &Channel<_, _>;
        #[allow(unused_assignments)]
        let mut extend_lifetime = None;
        let existing_normals_ch = self.read_vertex_normals();
        if !force_gen && existing_normals_ch.is_some() {
            normal_ch = existing_normals_ch.as_deref().unwrap();
        } else {
            extend_lifetime = Some(edit_ops::generate_smooth_normals_channel(self)?);
            normal_ch = extend_lifetime.as_ref().unwrap();
        }

        let mut v_id_to_idx =
            slotmap::SecondaryMap::<VertexId, u32>::with_capacity(conn.vertices.capacity());
        let mut positions = vec![];
        let mut normals = vec![];
        let mut colors = vec![];

        for (v_id, vertex, pos) in conn.iter_vertices_with_channel(&positions_ch) {
            // Vertices referenced by no face get dropped at this point.
            if vertex.halfedge.is_none() {
                continue;
            }
            let color = match color_strategy {
                ColorStrategy::ByRole => role_color(vertex_roles[v_id]),
                // Face-driven strategies average the adjacent face colors.
                _ => {
                    let faces = conn.vertex_adjacent_faces(v_id)?;
                    let sum = faces
                        .iter_cpy()
                        .map(|f| color_strategy.face_color(&conn, &face_roles, f))
                        .fold(Vec3::ZERO, |acc, c| acc + c);
                    sum / faces.len().max(1) as f32
                }
            };
            v_id_to_idx.insert(v_id, positions.len() as u32);
            positions.push(pos);
            normals.push(normal_ch[v_id]);
            colors.push(color);
        }

        let mut indices = vec![];
        for (face_id, _face) in conn.faces.iter() {
            let vertices = conn.face_vertices(face_id);
            let v1 = vertices[0];
            for (&v2, &v3) in vertices[1..].iter().tuple_windows() {
                indices.push(v_id_to_idx[v1]);
                indices.push(v_id_to_idx[v2]);
                indices.push(v_id_to_idx[v3]);
            }
        }

        Ok(VertexIndexBuffers {
            positions,
            normals,
            colors,
            indices,
        })
    }

    /// Dispatches to the flat or smooth triangle buffers depending on the
    /// mesh's generation config.
    pub fn generate_triangle_buffers(
        &self,
        color_strategy: ColorStrategy,
    ) -> Result<VertexIndexBuffers> {
        if self.gen_config.smooth_normals {
            self.generate_triangle_buffers_smooth(color_strategy, false)
        } else {
            self.generate_triangle_buffers_flat(color_strategy, false)
        }
    }

    /// Generates the [`PointBuffers`] for this mesh. Orphan vertices are
    /// filtered out.
    pub fn generate_point_buffers(&self) -> PointBuffers {
        let mut positions = Vec::new();
        for (_, vertex, pos) in self
            .read_connectivity()
            .iter_vertices_with_channel(&self.read_positions())
        {
            if vertex.halfedge.is_some() {
                positions.push(pos)
            }
        }
        PointBuffers { positions }
    }

    /// Generates the [`LineBuffers`] for this mesh, one segment per edge.
    pub fn generate_line_buffers(&self) -> Result<LineBuffers> {
        let positions_ch = self.read_positions();
        let conn = self.read_connectivity();

        let mut visited = HashSet::new();
        let mut positions = Vec::new();
        let mut colors = Vec::new();

        for (h, halfedge) in conn.iter_halfedges() {
            if let Some(pair) = halfedge.pair {
                if visited.contains(&pair) {
                    continue;
                }
            }
            visited.insert(h);

            let (src, dst) = conn.at_halfedge(h).src_dst_pair().map_err(|err| {
                anyhow!("All halfedges should have src and dst vertices: {}", err)
            })?;

            positions.push(positions_ch[src]);
            positions.push(positions_ch[dst]);
            colors.push(Vec3::splat(1.0));
        }

        Ok(LineBuffers { colors, positions })
    }
}

#[cfg(test)]
mod test {
    use super::super::primitives::{Platonic, Prism};
    use super::*;

    #[test]
    fn flat_buffers_triangulate_by_fans() {
        let cube = Platonic::cube();
        let buffers = cube
            .generate_triangle_buffers_flat(ColorStrategy::BySides, true)
            .unwrap();
        // 6 quads, 2 triangles each, 3 distinct corners per triangle.
        assert_eq!(buffers.positions.len(), 36);
        assert_eq!(buffers.normals.len(), 36);
        assert_eq!(buffers.colors.len(), 36);
        assert_eq!(buffers.indices.len(), 36);
        // All quads share the quad palette color.
        let quad_color = FACE_PALETTE[4];
        assert!(buffers.colors.iter().all(|c| *c == quad_color));
    }

    #[test]
    fn smooth_buffers_share_vertices() {
        let prism = Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        let buffers = prism
            .generate_triangle_buffers_smooth(ColorStrategy::ByRole, true)
            .unwrap();
        assert_eq!(buffers.positions.len(), 12);
        // 2 hexagon caps fan to 4 triangles each, 6 quads to 2 each.
        assert_eq!(buffers.indices.len(), 3 * (4 * 2 + 2 * 6));
        assert!(buffers.indices.iter().all(|i| (*i as usize) < 12));
    }

    #[test]
    fn orphan_vertices_are_filtered() {
        let cube = Platonic::cube();
        {
            let mut conn = cube.write_connectivity();
            let faces: Vec<FaceId> = conn.iter_faces().map(|(f, _)| f).collect();
            edit_ops::remove_faces(&mut conn, &faces[..1]).unwrap();
            let more: Vec<FaceId> = conn
                .iter_faces()
                .map(|(f, _)| f)
                .filter(|f| conn.face_vertices(*f).len() == 4)
                .collect();
            edit_ops::remove_faces(&mut conn, &more).unwrap();
        }
        // Every face is gone, so every vertex is an orphan now.
        assert_eq!(cube.read_connectivity().num_faces(), 0);
        assert_eq!(cube.generate_point_buffers().positions.len(), 0);
    }

    #[test]
    fn line_buffers_emit_one_segment_per_edge() {
        let cube = Platonic::cube();
        let lines = cube.generate_line_buffers().unwrap();
        assert_eq!(lines.positions.len(), 2 * 12);
        assert_eq!(lines.colors.len(), 12);
    }

    #[test]
    fn tag_colors_are_stable() {
        let cube = Platonic::cube();
        {
            let mut conn = cube.write_connectivity();
            let faces: Vec<FaceId> = conn.iter_faces().map(|(f, _)| f).collect();
            conn.set_face_tag(faces[0], "lid");
        }
        let buffers = cube
            .generate_triangle_buffers_flat(ColorStrategy::ByTag, true)
            .unwrap();
        let distinct: HashSet<_> = buffers.colors.iter().map(|c| c.to_ord()).collect();
        // The tagged face differs from the untagged gray.
        assert_eq!(distinct.len(), 2);
    }
}
