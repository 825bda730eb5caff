// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{marker::PhantomData, rc::Rc};

use crate::{
    prelude::*,
    sync::{BorrowedRef, InteriorMutable, MutableRef},
};

use glam::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

/// Implements indexing traits so the mesh data structure can be used to access
/// vertex, face or halfedge information using ids as indices.
pub mod mesh_index_impls;

/// Type-safe wrappers over the internal allocator indices used as pointers
pub mod id_types;
pub use id_types::*;

/// An API to represent type-safe and error-handled graph traversals over a mesh
pub mod traversals;
pub use traversals::*;

/// Primitive shapes and parametric builders, like boxes, prisms or revolves
pub mod primitives;

/// Low-level structural mutators on a halfedge mesh: edge splits, edge
/// collapses, face removal, normal generation
pub mod edit_ops;

/// The operator engine: Conway-style structural transforms (kis, truncate,
/// ambo, loft, ...) with per-element parameters and filters
pub mod conway_ops;

/// Parser and evaluator for compact Conway notation strings like `"dtC"`
pub mod conway_notation;

/// Import / Export of the mesh to the OFF text format
pub mod off_format;

/// Types to represent a selection of a subset of faces, vertices or edges.
pub mod selection;

/// Element filters used by the operator engine to pick which faces or
/// vertices participate in a transform
pub mod filters;

/// Generate flat vertex and index buffers suitable for a renderer
pub mod buffer_generation;
pub use buffer_generation::*;

pub mod channels;
pub use channels::*;

/// HalfEdge meshes are a type of linked list. This means it is sometimes
/// impossible to ensure some algorithms will terminate when the mesh is
/// malformed. To ensure the code never goes into an infinite loop, this max
/// number of iterations will be performed before giving an error. This error
/// should be large enough, as faces with a very large number of vertices may
/// trigger it.
pub const MAX_LOOP_ITERATIONS: usize = 8196;

/// Classifies mesh elements by provenance. Builders tag everything
/// `Existing`; operators tag the geometry they create `New` (caps, apex
/// fans) or `NewAlt` (side walls), so chained operators can filter on where
/// an element came from. `Ignored` excludes an element from all filters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Existing,
    New,
    NewAlt,
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct HalfEdge {
    pair: Option<HalfEdgeId>,
    next: Option<HalfEdgeId>,
    vertex: Option<VertexId>,
    face: Option<FaceId>,
}

#[derive(Debug, Default, Clone)]
pub struct Vertex {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Default, Clone)]
pub struct Face {
    halfedge: Option<HalfEdgeId>,
}

#[derive(Debug, Clone, Default)]
pub struct MeshConnectivity {
    vertices: SlotMap<VertexId, Vertex>,
    faces: SlotMap<FaceId, Face>,
    halfedges: SlotMap<HalfEdgeId, HalfEdge>,

    /// Free-form string tags attached to faces. Used by the tag-based
    /// coloring strategy and carried through CSG operations.
    face_tags: HashMap<FaceId, String>,
}

/// This struct contains some parameters that allow configuring the way in which
/// renderable geometry is generated from a mesh.
#[derive(Default, Debug, Clone)]
pub struct MeshGenerationConfig {
    /// Should this mesh be generated using smooth (i.e. per-vertex) normals?
    /// Or flat (i.e. per-face) normals?
    pub smooth_normals: bool,
}

#[derive(Debug, Clone)]
pub struct HalfEdgeMesh {
    connectivity: InteriorMutable<MeshConnectivity>,
    pub channels: MeshChannels,
    default_channels: DefaultChannels,
    pub gen_config: MeshGenerationConfig,
}

pub type Positions = Channel<VertexId, Vec3>;

impl MeshConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the edges of a given face
    pub fn face_edges(&self, face_id: FaceId) -> SVec<HalfEdgeId> {
        let mut edges = SmallVec::new();
        let h0 = self[face_id].halfedge.expect("Face should have a halfedge");
        let mut h = h0;

        edges.push(h);

        let mut counter = 0;

        loop {
            if counter > MAX_LOOP_ITERATIONS {
                panic!("Max number of iterations reached. Is the mesh malformed?");
            }
            counter += 1;

            h = self[h]
                .next
                .unwrap_or_else(|| panic!("Halfedge {h:?} has no next"));
            if h == h0 {
                break;
            }
            edges.push(h);
        }

        edges
    }

    pub fn face_vertices(&self, face_id: FaceId) -> SVec<VertexId> {
        self.face_edges(face_id)
            .iter()
            .map(|e| self.at_halfedge(*e).vertex().end())
            .collect()
    }

    /// The number of sides of a face, i.e. the length of its `next` cycle.
    pub fn face_sides(&self, face_id: FaceId) -> usize {
        self.face_edges(face_id).len()
    }

    pub fn edge_endpoints(&self, edge: HalfEdgeId) -> (VertexId, VertexId) {
        let a = self.at_halfedge(edge).vertex().end();
        let b = self.at_halfedge(edge).next().vertex().end();
        (a, b)
    }

    fn halfedge_loop(&self, h0: HalfEdgeId) -> SVec<HalfEdgeId> {
        let mut ret = smallvec::smallvec![h0];
        let mut h = h0;

        let mut count = 0;

        loop {
            if count > MAX_LOOP_ITERATIONS {
                panic!("Max number of iterations reached. Is the mesh malformed?");
            }
            count += 1;

            h = self[h].next.expect("Halfedges should form a loop");
            if h == h0 {
                break;
            } else {
                ret.push(h);
            }
        }
        ret
    }

    /// Returns an iterator that follows the next pointer for halfedges starting
    /// at `h0` until closing the loop.
    fn halfedge_loop_iter(&self, h0: HalfEdgeId) -> HalfedgeOpIterator<'_, NextOp> {
        HalfedgeOpIterator {
            conn: self,
            start: h0,
            next: h0,
            count: 0,
            _op: PhantomData,
        }
    }

    /// Returns the outgoing halfedges of `v`, in clockwise fan order as seen
    /// from outside the mesh.
    ///
    /// Unlike a plain `pair().next()` walk this also works for boundary
    /// vertices: the walk first rewinds counter-clockwise to the
    /// boundary-most outgoing halfedge and then sweeps clockwise until it
    /// runs off the other boundary (or closes the fan).
    pub fn vertex_outgoing_halfedges(
        &self,
        v: VertexId,
    ) -> Result<SVec<HalfEdgeId>, TraversalError> {
        let h0 = match self[v].halfedge {
            Some(h0) => h0,
            None => return Ok(SVec::new()),
        };

        // Rewind: the pair of our previous halfedge is the next outgoing
        // halfedge counter-clockwise.
        let mut start = h0;
        let mut count = 0;
        loop {
            if count > MAX_LOOP_ITERATIONS {
                return Err(TraversalError::HalfedgeBadLoop(h0));
            }
            count += 1;

            let prev = self.at_halfedge(start).previous().try_end()?;
            match self[prev].pair {
                Some(p) if p == h0 => break, // closed fan
                Some(p) => start = p,
                None => break, // boundary-most outgoing found
            }
        }

        let mut out = SVec::new();
        let mut h = start;
        let mut count = 0;
        loop {
            if count > MAX_LOOP_ITERATIONS {
                return Err(TraversalError::HalfedgeBadLoop(h0));
            }
            count += 1;

            out.push(h);
            match self[h].pair.and_then(|p| self[p].next) {
                Some(n) if n != start => h = n,
                _ => break,
            }
        }
        Ok(out)
    }

    /// Returns the polygon fan around `v`, in the same order as
    /// [`Self::vertex_outgoing_halfedges`].
    pub fn vertex_adjacent_faces(&self, v: VertexId) -> Result<SVec<FaceId>, TraversalError> {
        Ok(self
            .vertex_outgoing_halfedges(v)?
            .iter_cpy()
            .filter_map(|h| self[h].face)
            .collect())
    }

    pub fn iter_vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices.iter()
    }

    pub fn iter_vertices_with_channel<'a, T: ChannelValue>(
        &'a self,
        channel: &'a Channel<VertexId, T>,
    ) -> impl Iterator<Item = (VertexId, &Vertex, T)> + 'a {
        self.vertices.iter().map(|(id, v)| (id, v, channel[id]))
    }

    pub fn iter_faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces.iter()
    }

    pub fn iter_faces_with_channel<'a, T: ChannelValue>(
        &'a self,
        channel: &'a Channel<FaceId, T>,
    ) -> impl Iterator<Item = (FaceId, &Face, T)> + 'a {
        self.faces.iter().map(|(id, v)| (id, v, channel[id]))
    }

    pub fn iter_halfedges(&self) -> impl Iterator<Item = (HalfEdgeId, &HalfEdge)> {
        self.halfedges.iter()
    }

    /// Adds a new vertex to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_vertex(
        &mut self,
        positions: &mut Positions,
        position: Vec3,
        halfedge: Option<HalfEdgeId>,
    ) -> VertexId {
        let v = self.vertices.insert(Vertex { halfedge });
        positions[v] = position;
        v
    }

    /// Adds a new face to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_face(&mut self, halfedge: Option<HalfEdgeId>) -> FaceId {
        self.faces.insert(Face { halfedge })
    }

    /// Adds a new halfedge to the mesh, disconnected from everything else. Returns its handle.
    pub(crate) fn alloc_halfedge(&mut self, halfedge: HalfEdge) -> HalfEdgeId {
        self.halfedges.insert(halfedge)
    }

    /// Removes a face from the mesh. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub(crate) fn remove_face(&mut self, face: FaceId) {
        self.faces.remove(face);
        self.face_tags.remove(&face);
    }

    /// Removes a halfedge from the mesh. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub(crate) fn remove_halfedge(&mut self, halfedge: HalfEdgeId) {
        self.halfedges.remove(halfedge);
    }

    /// Removes a vertex from the mesh. This does not attempt to preserve mesh
    /// connectivity and should only be used as part of internal operations.
    pub(crate) fn remove_vertex(&mut self, vertex: VertexId) {
        self.vertices.remove(vertex);
    }

    /// Returns the halfedge going from `a` to `b`, if any. This is a linear
    /// scan over the halfedge pool: incremental face insertion cannot rely on
    /// fan traversal because pairs may not be wired yet.
    pub fn find_halfedge(&self, a: VertexId, b: VertexId) -> Option<HalfEdgeId> {
        self.halfedges.iter().find_map(|(h, he)| {
            let src_is_a = he.vertex == Some(a);
            let dst_is_b = he
                .next
                .map(|n| self[n].vertex == Some(b))
                .unwrap_or(false);
            (src_is_a && dst_is_b).then_some(h)
        })
    }

    /// Creates a face from an ordered vertex list, allocating its halfedges
    /// and wiring the `next` cycle. Pairs are linked against any unpaired
    /// opposite halfedge that already exists; otherwise pairing is deferred
    /// (see [`Self::match_pairs`]).
    ///
    /// Fails with an invalid-topology error when fewer than 3 vertices are
    /// given, a vertex repeats, or the oriented edge already exists.
    pub fn add_face(&mut self, verts: &[VertexId]) -> Result<FaceId> {
        if verts.len() < 3 {
            bail!("Cannot add a face with fewer than three vertices");
        }
        if verts.iter().duplicates().next().is_some() {
            bail!("Cannot add a face with a repeated vertex");
        }
        for v in verts {
            if !self.vertices.contains_key(*v) {
                bail!("Cannot add a face: vertex {v:?} is not part of this mesh");
            }
        }
        for (&a, &b) in verts.iter().circular_tuple_windows() {
            if self.find_halfedge(a, b).is_some() {
                bail!(
                    "Cannot add a face: an oriented edge {a:?} -> {b:?} already \
                     exists. The mesh would become non-manifold."
                );
            }
        }

        let face = self.alloc_face(None);
        let mut new_halfedges = SVec::new();
        for &v in verts {
            let h = self.alloc_halfedge(HalfEdge {
                pair: None,
                next: None,
                vertex: Some(v),
                face: Some(face),
            });
            if self[v].halfedge.is_none() {
                self[v].halfedge = Some(h);
            }
            new_halfedges.push(h);
        }
        for (&h1, &h2) in new_halfedges.iter().circular_tuple_windows() {
            self[h1].next = Some(h2);
        }
        self[face].halfedge = Some(new_halfedges[0]);

        // Link any opposite halfedges that are already present and unpaired.
        for (i, (&a, &b)) in verts.iter().circular_tuple_windows().enumerate() {
            let h = new_halfedges[i];
            if let Some(opp) = self.find_halfedge(b, a) {
                if self[opp].pair.is_none() {
                    self[h].pair = Some(opp);
                    self[opp].pair = Some(h);
                }
            }
        }

        Ok(face)
    }

    /// A global pass that, for every unpaired halfedge `(a -> b)`, finds
    /// another unpaired halfedge `(b -> a)` and links the two as pairs.
    /// Halfedges with no match remain boundary edges.
    ///
    /// This must run after bulk face insertion (e.g. after [`HalfEdgeMesh::append`])
    /// because pairing cannot be determined locally when faces are inserted
    /// out of adjacency order. Running it on a fully paired mesh makes no
    /// changes: the pass is idempotent and order-independent.
    pub fn match_pairs(&mut self) {
        let mut unpaired = HashMap::<(VertexId, VertexId), HalfEdgeId>::new();
        let candidates: Vec<HalfEdgeId> = self
            .halfedges
            .iter()
            .filter(|(_, he)| he.pair.is_none())
            .map(|(h, _)| h)
            .collect();

        for h in candidates {
            let (a, b) = self.edge_endpoints(h);
            if let Some(opp) = unpaired.remove(&(b, a)) {
                self[h].pair = Some(opp);
                self[opp].pair = Some(h);
            } else {
                unpaired.insert((a, b), h);
            }
        }
    }

    /// The number of unpaired (i.e. boundary) halfedges in the mesh.
    pub fn num_boundary_halfedges(&self) -> usize {
        self.halfedges
            .iter()
            .filter(|(_, he)| he.pair.is_none())
            .count()
    }

    /// Returns the average of a face's vertices. Note that this is different
    /// from the centroid. See:
    /// https://en.wikipedia.org/wiki/Centroid#Of_a_polygon
    pub fn face_vertex_average(&self, positions: &Positions, face_id: FaceId) -> Vec3 {
        let face_vertices = self
            .face_vertices(face_id)
            .iter()
            .map(|v| positions[*v])
            .collect::<SVec<_>>();
        face_vertices.iter().fold(Vec3::ZERO, |v1, v2| v1 + *v2) / face_vertices.len() as f32
    }

    pub fn vertex_exists(&self, vertex: VertexId) -> bool {
        self.vertices.contains_key(vertex)
    }

    // Returns the normal of the face. The first three vertices are used to
    // compute the normal. If the vertices of the face are not coplanar,
    // the result will not be correct.
    pub fn face_normal(&self, positions: &Positions, face: FaceId) -> Option<Vec3> {
        let verts = self.face_vertices(face);
        if verts.len() >= 3 {
            let v01 = positions[verts[0]] - positions[verts[1]];
            let v12 = positions[verts[1]] - positions[verts[2]];
            Some(v01.cross(v12).normalize())
        } else {
            None
        }
    }

    pub fn face_tag(&self, face: FaceId) -> Option<&str> {
        self.face_tags.get(&face).map(|s| s.as_str())
    }

    pub fn set_face_tag(&mut self, face: FaceId, tag: impl Into<String>) {
        self.face_tags.insert(face, tag.into());
    }

    pub fn num_halfedges(&self) -> usize {
        self.halfedges.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        let mut channels = MeshChannels::default();
        let default_channels = DefaultChannels::with_defaults(&mut channels);
        Self {
            channels,
            default_channels,
            connectivity: InteriorMutable::new(MeshConnectivity::new()),
            gen_config: MeshGenerationConfig::default(),
        }
    }

    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for (_, pos) in self.read_positions().iter() {
            min = min.min(*pos);
            max = max.max(*pos);
        }
        let center = (min + max) * 0.5;
        let size = max - min;
        (center, size)
    }

    pub fn read_connectivity(&self) -> BorrowedRef<'_, MeshConnectivity> {
        self.connectivity.borrow()
    }

    pub fn write_connectivity(&self) -> MutableRef<'_, MeshConnectivity> {
        self.connectivity.borrow_mut()
    }

    pub fn read_positions(&self) -> BorrowedRef<'_, Positions> {
        self.channels
            .read_channel(self.default_channels.position)
            .expect("Could not read positions")
    }

    pub fn write_positions(&self) -> MutableRef<'_, Positions> {
        self.channels
            .write_channel(self.default_channels.position)
            .expect("Could not write positions")
    }

    pub fn read_face_roles(&self) -> BorrowedRef<'_, Channel<FaceId, Role>> {
        self.channels
            .read_channel(self.default_channels.face_role)
            .expect("Could not read face roles")
    }

    pub fn write_face_roles(&self) -> MutableRef<'_, Channel<FaceId, Role>> {
        self.channels
            .write_channel(self.default_channels.face_role)
            .expect("Could not write face roles")
    }

    pub fn read_vertex_roles(&self) -> BorrowedRef<'_, Channel<VertexId, Role>> {
        self.channels
            .read_channel(self.default_channels.vertex_role)
            .expect("Could not read vertex roles")
    }

    pub fn write_vertex_roles(&self) -> MutableRef<'_, Channel<VertexId, Role>> {
        self.channels
            .write_channel(self.default_channels.vertex_role)
            .expect("Could not write vertex roles")
    }

    pub fn read_face_normals(&self) -> Option<BorrowedRef<'_, Channel<FaceId, Vec3>>> {
        self.default_channels.face_normals.map(|ch_id| {
            self.channels
                .read_channel(ch_id)
                .expect("Could not read face normals")
        })
    }

    pub fn read_vertex_normals(&self) -> Option<BorrowedRef<'_, Channel<VertexId, Vec3>>> {
        self.default_channels.vertex_normals.map(|ch_id| {
            self.channels
                .read_channel(ch_id)
                .expect("Could not read vertex normals")
        })
    }

    /// Builds this mesh from a list of vertices, and a list of polygons,
    /// containing indices that reference those vertices.
    ///
    /// - Generic over Index: Use as much precision as you need / want.
    /// - Generic over Polygon: Use whatever input layout you want.
    ///
    /// If unsure, you can pass `Vec<Vec<u32>>` as `polygons`. You can also use
    /// `[[u32;3]]` or `&[&[u32]]`. Same for `u8`, `u16` or `usize` indices.
    ///
    /// Vertices are allocated in the order of `positions`, and faces in the
    /// order of `polygons`, so generated output is reproducible.
    pub fn build_from_polygons<Index, Polygon>(
        positions: &[Vec3],
        polygons: &[Polygon],
    ) -> Result<Self>
    where
        Index: num_traits::AsPrimitive<usize> + 'static + Eq + PartialEq + core::hash::Hash + Copy,
        Polygon: AsRef<[Index]>,
    {
        let mesh = Self::new();
        {
            let mut conn = mesh.write_connectivity();
            let mut positions_ch = mesh.write_positions();

            let verts: Vec<VertexId> = positions
                .iter()
                .map(|p| conn.alloc_vertex(&mut positions_ch, *p, None))
                .collect();

            // Used to compute the degree of a vertex. Useful to do some sanity
            // checks.
            let mut vertex_degree = HashMap::<VertexId, u32>::new();

            // First pass over polygon data to determine some initial properties
            for polygon in polygons.iter().map(|p| p.as_ref()) {
                if polygon.len() < 3 {
                    bail!("Cannot build meshes where polygons have less than three vertices.")
                }
                if polygon.iter().duplicates().next().is_some() {
                    bail!("Cannot build meshes where a polygon has duplicate vertices")
                }
                for index in polygon {
                    let v_id = *verts.get(index.as_()).ok_or_else(|| {
                        anyhow!("Out-of-bounds index in the polygon array {}", index.as_())
                    })?;
                    *vertex_degree.entry(v_id).or_insert(0) += 1;
                }
            }

            // Maps pairs of indices to mesh halfedges
            let mut pair_to_halfedge = HashMap::<(Index, Index), HalfEdgeId>::new();

            // We can now start building connectivity information by doing a
            // second pass over the polygon list
            for polygon in polygons.iter().map(|p| p.as_ref()) {
                // Cyclically ordered list of the half edge ids of this face.
                let mut half_edges_in_face = SVec::new();

                let face = conn.alloc_face(None);

                for (&a, &b) in polygon.iter().circular_tuple_windows() {
                    if pair_to_halfedge.get(&(a, b)).is_some() {
                        bail!(
                            "Found multiple oriented edges with the same indices.\
                             This means either (i) surface is non-manifold or (ii) faces \
                             are not oriented in the same direction"
                        )
                    }

                    let h = conn.alloc_halfedge(HalfEdge::default());
                    // Link halfedge to face
                    conn[h].face = Some(face);
                    conn[face].halfedge = Some(h);

                    // Link halfedge to source vertex
                    let v_a = verts[a.as_()];
                    conn[h].vertex = Some(v_a);
                    conn[v_a].halfedge = Some(h);

                    half_edges_in_face.push(h);

                    pair_to_halfedge.insert((a, b), h);

                    if let Some(&other) = pair_to_halfedge.get(&(b, a)) {
                        conn[h].pair = Some(other);
                        conn[other].pair = Some(h);
                    }
                }

                for (&h1, &h2) in half_edges_in_face.iter().circular_tuple_windows() {
                    conn[h1].next = Some(h2);
                }
            }

            // Do some final manifoldness checks. Each vertex must be the apex
            // of exactly one polygon fan: the number of outgoing halfedges
            // reachable by fan traversal must match the vertex degree.
            for (v, vertex) in conn.vertices.iter() {
                if vertex.halfedge.is_none() {
                    bail!("There is at least a single vertex that's disconnected from any polygon");
                }
                let reachable = conn
                    .vertex_outgoing_halfedges(v)
                    .map_err(|err| anyhow!("Malformed mesh: {err}"))?
                    .len() as u32;
                if reachable != vertex_degree[&v] {
                    bail!(
                        "At least one of the vertices is not a polygon fan, \
                         but some other nonmanifold structure instead."
                    )
                }
            }
        }
        Ok(mesh)
    }

    /// A lenient variant of [`Self::build_from_polygons`] used when the input
    /// soup is not guaranteed to be manifold, such as when rehydrating CSG
    /// output (which may contain T-junction seams) or rebuilding a mesh
    /// during a weld.
    ///
    /// Differences: unreferenced positions become orphan vertices instead of
    /// an error, a duplicate oriented edge leaves the later halfedge unpaired
    /// instead of failing, and no fan check is performed. Polygons with fewer
    /// than 3 vertices are still rejected.
    pub fn build_from_polygons_lenient<Index, Polygon>(
        positions: &[Vec3],
        polygons: &[Polygon],
    ) -> Result<Self>
    where
        Index: num_traits::AsPrimitive<usize> + 'static + Eq + PartialEq + core::hash::Hash + Copy,
        Polygon: AsRef<[Index]>,
    {
        let mesh = Self::new();
        {
            let mut conn = mesh.write_connectivity();
            let mut positions_ch = mesh.write_positions();

            let verts: Vec<VertexId> = positions
                .iter()
                .map(|p| conn.alloc_vertex(&mut positions_ch, *p, None))
                .collect();

            let mut pair_to_halfedge = HashMap::<(Index, Index), HalfEdgeId>::new();

            for polygon in polygons.iter().map(|p| p.as_ref()) {
                if polygon.len() < 3 {
                    bail!("Cannot build meshes where polygons have less than three vertices.")
                }
                if polygon.iter().duplicates().next().is_some() {
                    bail!("Cannot build meshes where a polygon has duplicate vertices")
                }

                let mut half_edges_in_face = SVec::new();
                let face = conn.alloc_face(None);

                for (&a, &b) in polygon.iter().circular_tuple_windows() {
                    let h = conn.alloc_halfedge(HalfEdge::default());
                    conn[h].face = Some(face);
                    conn[face].halfedge = Some(h);

                    let v_a = *verts.get(a.as_()).ok_or_else(|| {
                        anyhow!("Out-of-bounds index in the polygon array {}", a.as_())
                    })?;
                    conn[h].vertex = Some(v_a);
                    conn[v_a].halfedge = Some(h);

                    half_edges_in_face.push(h);

                    // A duplicate oriented edge means a non-manifold seam.
                    // Keep the first one in the lookup and leave the rest
                    // unpaired.
                    pair_to_halfedge.entry((a, b)).or_insert(h);

                    if let Some(&other) = pair_to_halfedge.get(&(b, a)) {
                        if conn[other].pair.is_none() && conn[h].pair.is_none() {
                            conn[h].pair = Some(other);
                            conn[other].pair = Some(h);
                        }
                    }
                }

                for (&h1, &h2) in half_edges_in_face.iter().circular_tuple_windows() {
                    conn[h1].next = Some(h2);
                }
            }
        }
        Ok(mesh)
    }

    /// Copies all vertices and faces of `other` into this mesh, remapping all
    /// internal handles and transforming the appended positions by
    /// `transform`. No connectivity is generated between the two parts.
    ///
    /// This does *not* pair the seams between the two meshes: many callers
    /// intentionally leave them unpaired until a later
    /// [`MeshConnectivity::match_pairs`] or [`Self::weld`].
    #[profiling::function]
    pub fn append(&mut self, other: &HalfEdgeMesh, transform: Mat4) {
        let mut vmap = SecondaryMap::<VertexId, VertexId>::new();
        let mut hmap = SecondaryMap::<HalfEdgeId, HalfEdgeId>::new();
        let mut fmap = SecondaryMap::<FaceId, FaceId>::new();

        {
            let mut a_conn = self.write_connectivity();
            let b_conn = other.read_connectivity();

            // On a first pass, we reserve new vertices, faces and halfedges
            // without setting any of their pointers and store their ids in a
            // mapping.
            for (vertex_id, _vertex) in b_conn.iter_vertices() {
                vmap.insert(vertex_id, a_conn.vertices.insert(Vertex { halfedge: None }));
            }
            for (face_id, _) in b_conn.iter_faces() {
                fmap.insert(face_id, a_conn.alloc_face(None));
            }
            for (halfedge_id, _) in b_conn.iter_halfedges() {
                hmap.insert(halfedge_id, a_conn.alloc_halfedge(HalfEdge::default()));
            }

            // The second pass uses the mapping and the original data to set
            // all the inner pointers.
            for (vertex_id, vertex) in b_conn.iter_vertices() {
                if let Some(h) = vertex.halfedge {
                    a_conn[vmap[vertex_id]].halfedge = Some(hmap[h])
                }
            }
            for (face_id, face) in b_conn.iter_faces() {
                if let Some(h) = face.halfedge {
                    a_conn[fmap[face_id]].halfedge = Some(hmap[h])
                }
            }
            for (halfedge_id, halfedge) in b_conn.iter_halfedges() {
                if let Some(pair) = halfedge.pair {
                    a_conn[hmap[halfedge_id]].pair = Some(hmap[pair]);
                }
                if let Some(next) = halfedge.next {
                    a_conn[hmap[halfedge_id]].next = Some(hmap[next]);
                }
                if let Some(vertex) = halfedge.vertex {
                    a_conn[hmap[halfedge_id]].vertex = Some(vmap[vertex]);
                }
                if let Some(face) = halfedge.face {
                    a_conn[hmap[halfedge_id]].face = Some(fmap[face]);
                }
            }

            // Face tags travel with their face.
            let appended_tags: Vec<(FaceId, String)> = b_conn
                .face_tags
                .iter()
                .map(|(f, tag)| (fmap[*f], tag.clone()))
                .collect();
            for (f, tag) in appended_tags {
                a_conn.face_tags.insert(f, tag);
            }
        }

        // Once the connectivity data is correct, we merge the channels for
        // both meshes. The closures give the dynamic merge code access to the
        // id remapping computed above.
        {
            use slotmap::Key;
            let b_conn = other.read_connectivity();
            let raw_vertices: Rc<Vec<_>> =
                Rc::new(b_conn.iter_vertices().map(|(k, _)| k.data()).collect());
            let raw_faces: Rc<Vec<_>> =
                Rc::new(b_conn.iter_faces().map(|(k, _)| k.data()).collect());
            let raw_halfedges: Rc<Vec<_>> =
                Rc::new(b_conn.iter_halfedges().map(|(k, _)| k.data()).collect());
            let get_ids = move |kty| match kty {
                ChannelKeyType::VertexId => Rc::clone(&raw_vertices),
                ChannelKeyType::FaceId => Rc::clone(&raw_faces),
                ChannelKeyType::HalfEdgeId => Rc::clone(&raw_halfedges),
            };

            let id_map = |kty, k| match kty {
                ChannelKeyType::VertexId => vmap[VertexId::from(k)].data(),
                ChannelKeyType::FaceId => fmap[FaceId::from(k)].data(),
                ChannelKeyType::HalfEdgeId => hmap[HalfEdgeId::from(k)].data(),
            };

            self.channels.merge_with(&other.channels, get_ids, id_map);
        }

        // Finally, bring the appended vertices into place.
        {
            let mut positions = self.write_positions();
            for (_, new_v) in vmap.iter() {
                positions[*new_v] = transform.transform_point3(positions[*new_v]);
            }
        }
    }

    /// Merges vertices whose positions are within `tolerance` of each other
    /// and repairs the affected faces and pair links. Used to stitch
    /// duplicated geometry (symmetry copies, wrapped grids) into a single
    /// connected mesh.
    ///
    /// Position equality is a ball of radius `tolerance`; ties are broken by
    /// insertion order, so the first vertex seen becomes the canonical one.
    /// Faces left with fewer than three distinct vertices are dropped.
    /// Welding an already-welded mesh is a no-op.
    #[profiling::function]
    pub fn weld(&mut self, tolerance: f32) -> Result<()> {
        use rstar::{PointDistance, RTree, RTreeObject, AABB};

        struct VertexPos {
            index: usize,
            pos: Vec3,
        }
        impl RTreeObject for VertexPos {
            type Envelope = AABB<[f32; 3]>;
            fn envelope(&self) -> Self::Envelope {
                AABB::from_point(self.pos.to_array())
            }
        }
        impl PointDistance for VertexPos {
            fn distance_2(&self, point: &[f32; 3]) -> f32 {
                self.pos.distance_squared(Vec3::from_slice(point))
            }
        }

        let (new_positions, new_polygons, face_roles, vertex_roles, face_tags) = {
            let conn = self.read_connectivity();
            let positions = self.read_positions();
            let v_roles = self.read_vertex_roles();
            let f_roles = self.read_face_roles();

            let verts: Vec<(VertexId, Vec3)> = conn
                .iter_vertices()
                .map(|(v, _)| (v, positions[v]))
                .collect();
            let mut index_of = SecondaryMap::<VertexId, usize>::new();
            for (i, (v, _)) in verts.iter().enumerate() {
                index_of.insert(*v, i);
            }

            let tree = RTree::bulk_load(
                verts
                    .iter()
                    .enumerate()
                    .map(|(i, (_, pos))| VertexPos { index: i, pos: *pos })
                    .collect_vec(),
            );

            // First-seen vertex wins as the canonical one.
            let mut canonical: Vec<Option<usize>> = vec![None; verts.len()];
            for (i, (_, pos)) in verts.iter().enumerate() {
                if canonical[i].is_some() {
                    continue;
                }
                canonical[i] = Some(i);
                for other in
                    tree.locate_within_distance(pos.to_array(), tolerance * tolerance)
                {
                    if canonical[other.index].is_none() {
                        canonical[other.index] = Some(i);
                    }
                }
            }

            // Canonical vertices keep their data; everything else is remapped.
            let mut new_index: Vec<Option<u32>> = vec![None; verts.len()];
            let mut new_positions = Vec::new();
            let mut vertex_roles = Vec::new();
            for (i, (v, pos)) in verts.iter().enumerate() {
                if canonical[i] == Some(i) {
                    new_index[i] = Some(new_positions.len() as u32);
                    new_positions.push(*pos);
                    vertex_roles.push(v_roles[*v]);
                }
            }
            let remap = |i: usize| new_index[canonical[i].unwrap()].unwrap();

            let mut new_polygons = Vec::new();
            let mut face_roles = Vec::new();
            let mut face_tags = Vec::new();
            for (f, _) in conn.iter_faces() {
                let mapped: Vec<u32> = conn
                    .face_vertices(f)
                    .iter_cpy()
                    .map(|v| remap(index_of[v]))
                    .dedup()
                    .collect();
                // The wrap-around pair may also have collapsed.
                let mapped = if mapped.len() > 1 && mapped[0] == *mapped.last().unwrap() {
                    mapped[..mapped.len() - 1].to_vec()
                } else {
                    mapped
                };
                if mapped.iter().unique().count() < 3 {
                    continue; // degenerate after the weld
                }
                new_polygons.push(mapped);
                face_roles.push(f_roles[f]);
                face_tags.push(conn.face_tag(f).map(|t| t.to_owned()));
            }

            (new_positions, new_polygons, face_roles, vertex_roles, face_tags)
        };

        let mut welded = Self::build_from_polygons_lenient(&new_positions, &new_polygons)?;
        welded.write_connectivity().match_pairs();
        {
            let conn = welded.read_connectivity();
            let mut v_roles = welded.write_vertex_roles();
            for ((v, _), role) in conn.iter_vertices().zip(vertex_roles) {
                v_roles[v] = role;
            }
            let mut f_roles = welded.write_face_roles();
            for ((f, _), role) in conn.iter_faces().zip(face_roles.iter()) {
                f_roles[f] = *role;
            }
        }
        {
            let mut conn = welded.write_connectivity();
            let face_ids: Vec<FaceId> = conn.iter_faces().map(|(f, _)| f).collect();
            for (f, tag) in face_ids.into_iter().zip(face_tags) {
                if let Some(tag) = tag {
                    conn.set_face_tag(f, tag);
                }
            }
        }
        welded.gen_config = self.gen_config.clone();

        *self = welded;
        Ok(())
    }

    /// Produces the topological dual of this mesh: a new mesh with one vertex
    /// per face (at the face's vertex average) and one face per vertex.
    ///
    /// Fails with an invalid-topology error if the mesh has boundary
    /// (unpaired) halfedges, because the dual of an open surface is not
    /// well-formed.
    pub fn dual(&self) -> Result<HalfEdgeMesh> {
        let (dual_positions, dual_faces, face_roles, vertex_roles) = {
            let conn = self.read_connectivity();
            let positions = self.read_positions();
            let v_roles = self.read_vertex_roles();
            let f_roles = self.read_face_roles();

            if conn.num_boundary_halfedges() > 0 {
                bail!(
                    "Invalid topology: cannot take the dual of a mesh with {} \
                     boundary halfedges",
                    conn.num_boundary_halfedges()
                );
            }

            let mut face_index = SecondaryMap::<FaceId, u32>::new();
            let mut dual_positions = Vec::new();
            let mut vertex_roles = Vec::new();
            for (i, (f, _)) in conn.iter_faces().enumerate() {
                face_index.insert(f, i as u32);
                dual_positions.push(conn.face_vertex_average(&positions, f));
                vertex_roles.push(f_roles[f]);
            }

            let mut dual_faces = Vec::new();
            let mut face_roles = Vec::new();
            for (v, _) in conn.iter_vertices() {
                let fan = conn
                    .vertex_adjacent_faces(v)
                    .map_err(|err| anyhow!("Invalid topology: {err}"))?;
                if fan.len() < 3 {
                    bail!(
                        "Invalid topology: vertex {v:?} touches fewer than three \
                         faces, its dual face would be degenerate"
                    );
                }
                // The fan is clockwise as seen from outside; the dual face
                // must wind counter-clockwise.
                let polygon: Vec<u32> = fan.iter_cpy().rev().map(|f| face_index[f]).collect();
                dual_faces.push(polygon);
                face_roles.push(v_roles[v]);
            }

            (dual_positions, dual_faces, face_roles, vertex_roles)
        };

        let dual = Self::build_from_polygons(&dual_positions, &dual_faces)?;
        {
            let conn = dual.read_connectivity();
            let mut v_roles = dual.write_vertex_roles();
            for ((v, _), role) in conn.iter_vertices().zip(vertex_roles) {
                v_roles[v] = role;
            }
            let mut f_roles = dual.write_face_roles();
            for ((f, _), role) in conn.iter_faces().zip(face_roles) {
                f_roles[f] = role;
            }
        }
        Ok(dual)
    }
}

impl Default for HalfEdgeMesh {
    fn default() -> Self {
        Self::new()
    }
}

pub trait HalfEdgeOp {
    fn op(conn: &MeshConnectivity, h: HalfEdgeId) -> HalfEdgeId;
}

pub struct NextOp;
impl HalfEdgeOp for NextOp {
    fn op(conn: &MeshConnectivity, h: HalfEdgeId) -> HalfEdgeId {
        conn.at_halfedge(h).next().end()
    }
}

pub struct HalfedgeOpIterator<'a, Op: HalfEdgeOp> {
    conn: &'a MeshConnectivity,
    start: HalfEdgeId,
    next: HalfEdgeId,
    count: usize,
    _op: PhantomData<Op>,
}

impl<'a, Op: HalfEdgeOp> Iterator for HalfedgeOpIterator<'a, Op> {
    type Item = HalfEdgeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count >= MAX_LOOP_ITERATIONS {
            panic!("Max number of iterations reached. Is the mesh malformed?");
        } else if self.count > 0 && self.next == self.start {
            None
        } else {
            let res = self.next;
            self.next = Op::op(self.conn, self.next);
            self.count += 1;
            Some(res)
        }
    }
}

pub mod mappings;

impl MeshConnectivity {
    pub fn vertex_mapping(&self) -> mappings::MeshMapping<VertexId> {
        mappings::MeshMapping::new(&self.vertices)
    }

    pub fn face_mapping(&self) -> mappings::MeshMapping<FaceId> {
        mappings::MeshMapping::new(&self.faces)
    }

    pub fn halfedge_mapping(&self) -> mappings::MeshMapping<HalfEdgeId> {
        mappings::MeshMapping::new(&self.halfedges)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad_grid_2x2() -> HalfEdgeMesh {
        // A 3x3 vertex grid forming four quads, with boundary.
        let positions: Vec<Vec3> = (0..3)
            .flat_map(|y| (0..3).map(move |x| Vec3::new(x as f32, y as f32, 0.0)))
            .collect();
        let polygons: Vec<[u32; 4]> = vec![
            [0, 1, 4, 3],
            [1, 2, 5, 4],
            [3, 4, 7, 6],
            [4, 5, 8, 7],
        ];
        HalfEdgeMesh::build_from_polygons(&positions, &polygons).unwrap()
    }

    #[test]
    fn next_cycles_have_face_side_count() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        let conn = mesh.read_connectivity();
        for (f, _) in conn.iter_faces() {
            let edges = conn.face_edges(f);
            let mut h = edges[0];
            for _ in 0..edges.len() {
                h = conn.at_halfedge(h).next().end();
            }
            assert_eq!(h, edges[0], "next^k must return to the start");
        }
    }

    #[test]
    fn pair_is_an_involution() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 5);
        let conn = mesh.read_connectivity();
        for (h, he) in conn.iter_halfedges() {
            let pair = he.pair.expect("prism is closed");
            assert_eq!(conn[pair].pair, Some(h));
            // Halfedges store their source vertex, so the pair of (v -> w)
            // starts where `next` starts: at w.
            let next = conn.at_halfedge(h).next().end();
            assert_eq!(conn[pair].vertex, conn[next].vertex);
        }
    }

    #[test]
    fn match_pairs_is_idempotent() {
        let mesh = quad_grid_2x2();
        let mut conn = mesh.write_connectivity();
        let boundary_before = conn.num_boundary_halfedges();
        assert_eq!(boundary_before, 8);
        conn.match_pairs();
        assert_eq!(conn.num_boundary_halfedges(), 8);
    }

    #[test]
    fn weld_zero_is_idempotent() {
        let mut mesh = primitives::Polygon::build(Vec3::ZERO, 1.0, 4);
        mesh.append(
            &primitives::Polygon::build(Vec3::ZERO, 1.0, 4),
            Mat4::from_translation(Vec3::ZERO),
        );
        // Two coincident quads facing the same way: welding merges the
        // vertices but cannot pair the duplicate oriented edges.
        mesh.weld(0.0).unwrap();
        let (v, f) = {
            let conn = mesh.read_connectivity();
            (conn.num_vertices(), conn.num_faces())
        };
        assert_eq!(v, 4);
        mesh.weld(0.0).unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), v);
        assert_eq!(conn.num_faces(), f);
    }

    #[test]
    fn append_then_weld_stitches_seams() {
        // Two quads sharing an edge, built as separate meshes.
        let mut mesh = primitives::Quad::build(
            Vec3::new(-0.5, 0.0, 0.0),
            Vec3::Z,
            Vec3::X,
            Vec2::ONE,
        );
        let other = primitives::Quad::build(
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::Z,
            Vec3::X,
            Vec2::ONE,
        );
        mesh.append(&other, Mat4::IDENTITY);
        {
            let conn = mesh.read_connectivity();
            assert_eq!(conn.num_vertices(), 8);
            assert_eq!(conn.num_faces(), 2);
        }
        mesh.weld(1e-4).unwrap();
        let conn = mesh.read_connectivity();
        assert_eq!(conn.num_vertices(), 6);
        assert_eq!(conn.num_faces(), 2);
        // The shared edge must now be paired.
        assert_eq!(conn.num_boundary_halfedges(), 6);
    }

    #[test]
    fn dual_of_open_mesh_is_an_error() {
        let mesh = quad_grid_2x2();
        assert!(mesh.dual().is_err());
    }

    #[test]
    fn dual_exchanges_faces_and_vertices() {
        let cube = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        let dual = cube.dual().unwrap();
        let conn = dual.read_connectivity();
        assert_eq!(conn.num_vertices(), 6);
        assert_eq!(conn.num_faces(), 8);
        assert_eq!(conn.num_boundary_halfedges(), 0);
    }

    #[test]
    fn add_face_rejects_bad_input() {
        let mesh = HalfEdgeMesh::new();
        let mut conn = mesh.write_connectivity();
        let mut positions = mesh.write_positions();
        let a = conn.alloc_vertex(&mut positions, Vec3::ZERO, None);
        let b = conn.alloc_vertex(&mut positions, Vec3::X, None);
        let c = conn.alloc_vertex(&mut positions, Vec3::Y, None);
        drop(positions);

        assert!(conn.add_face(&[a, b]).is_err());
        assert!(conn.add_face(&[a, b, a]).is_err());
        assert!(conn.add_face(&[a, b, c]).is_ok());
        // Same winding again: the oriented edges already exist.
        assert!(conn.add_face(&[a, b, c]).is_err());
        // Opposite winding is fine and pairs everything.
        assert!(conn.add_face(&[c, b, a]).is_ok());
        assert_eq!(conn.num_boundary_halfedges(), 0);
    }
}
