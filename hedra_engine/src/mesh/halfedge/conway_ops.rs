// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::rc::Rc;

use crate::prelude::*;

use super::edit_ops;
use super::filters::{FaceFilter, VertexFilter};

/// The element an [`Amount`] is being evaluated for.
#[derive(Debug, Clone, Copy)]
pub struct ElementCtx {
    /// Position of the element among the operator's targets, in iteration
    /// order. Stable for a given input mesh.
    pub index: usize,
    pub role: Role,
    /// Side count for faces, degree for vertices.
    pub sides: usize,
    /// Centroid for faces, position for vertices.
    pub position: Vec3,
}

/// A scalar operator parameter. Either a constant, or a function evaluated
/// once per transformed element, which lets callers drive the effect strength
/// by role, size or an external random source. The engine itself stays
/// deterministic given a deterministic function.
#[derive(Clone)]
pub enum Amount {
    Constant(f32),
    PerElement(Rc<dyn Fn(&ElementCtx) -> f32>),
}

impl Amount {
    pub fn eval(&self, ctx: &ElementCtx) -> f32 {
        match self {
            Amount::Constant(x) => *x,
            Amount::PerElement(f) => f(ctx),
        }
    }
}

impl From<f32> for Amount {
    fn from(x: f32) -> Self {
        Amount::Constant(x)
    }
}

impl std::fmt::Debug for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Amount::Constant(x) => f.debug_tuple("Constant").field(x).finish(),
            Amount::PerElement(_) => f.write_str("PerElement(..)"),
        }
    }
}

/// The operator catalog. Every operator takes a mesh and returns a new mesh;
/// see [`apply`].
#[derive(Debug, Clone)]
pub enum MeshOperator {
    /// For each selected face, raise an apex over the face center by `amount`
    /// along the normal and replace the face with a triangle fan.
    Kis { amount: Amount, filter: FaceFilter },
    /// Cut every selected vertex, replacing it with a polygon. `amount` is
    /// the fraction of each incident edge that gets cut away, in [0, 0.5].
    Truncate { amount: Amount, filter: VertexFilter },
    /// Full rectification: one vertex per edge midpoint, one face per
    /// original face and per original vertex.
    Ambo,
    /// Swap faces and vertices.
    Dual,
    /// Replace each selected face with an offset copy connected to the
    /// original boundary by quads: the cap moves along the normal by
    /// `amount` and shrinks toward the face center by the `inset` fraction.
    Loft {
        amount: Amount,
        inset: Amount,
        filter: FaceFilter,
    },
    /// Move each selected face along its normal by `amount`, connecting it to
    /// the original boundary by quads.
    Extrude { amount: Amount, filter: FaceFilter },
    /// Truncate over ambo: cuts both vertices and edges.
    Bevel { amount: Amount },
    /// Ambo applied twice.
    Expand,
    /// Greedy merge of adjacent face pairs matching a side-count pattern, by
    /// dissolving their shared edge. First match in face-iteration order wins
    /// and the scan restarts after every merge.
    CollapseEdges {
        sides_a: usize,
        sides_b: usize,
        either: bool,
        filter: FaceFilter,
    },
    /// Planarizing relaxation: vertices are pulled toward the planes of their
    /// adjacent faces for a fixed number of passes.
    Canonicalize { iterations: usize },
    /// Full canonicalization: edge-tangency, recentering and planarization
    /// passes. Stops after `iterations` regardless of convergence.
    Kanonicalize { iterations: usize },
    /// Interpolate vertices toward the unit sphere. 0 = unchanged, 1 = fully
    /// projected.
    Spherize { amount: f32 },
    /// Merge vertices closer than `tolerance` and repair pairing.
    Weld { tolerance: f32 },
    Transform {
        translate: Vec3,
        rotate: Vec3,
        scale: Vec3,
    },
}

/// Applies `op` to `mesh`, returning the transformed mesh. The input mesh is
/// never mutated: operators have value semantics even when the implementation
/// internally clones and edits in place.
#[profiling::function]
pub fn apply(mesh: &HalfEdgeMesh, op: &MeshOperator) -> Result<HalfEdgeMesh> {
    match op {
        MeshOperator::Kis { amount, filter } => kis(mesh, amount, filter),
        MeshOperator::Truncate { amount, filter } => truncate(mesh, amount, filter),
        MeshOperator::Ambo => ambo(mesh),
        MeshOperator::Dual => mesh.dual(),
        MeshOperator::Loft {
            amount,
            inset,
            filter,
        } => extrude_like(mesh, amount, inset, filter),
        MeshOperator::Extrude { amount, filter } => {
            extrude_like(mesh, amount, &Amount::Constant(0.0), filter)
        }
        MeshOperator::Bevel { amount } => {
            let rectified = ambo(mesh)?;
            truncate(&rectified, amount, &VertexFilter::default())
        }
        MeshOperator::Expand => ambo(&ambo(mesh)?),
        MeshOperator::CollapseEdges {
            sides_a,
            sides_b,
            either,
            filter,
        } => collapse_edges(mesh, *sides_a, *sides_b, *either, filter),
        MeshOperator::Canonicalize { iterations } => canonicalize(mesh, *iterations, false),
        MeshOperator::Kanonicalize { iterations } => canonicalize(mesh, *iterations, true),
        MeshOperator::Spherize { amount } => spherize(mesh, *amount),
        MeshOperator::Weld { tolerance } => {
            let mut result = mesh.clone();
            result.weld(*tolerance)?;
            Ok(result)
        }
        MeshOperator::Transform {
            translate,
            rotate,
            scale,
        } => {
            let mut result = mesh.clone();
            edit_ops::transform(&mut result, *translate, *rotate, *scale)?;
            Ok(result)
        }
    }
}

/// Applies a chain of operators left-to-right.
pub fn apply_chain(mesh: &HalfEdgeMesh, ops: &[MeshOperator]) -> Result<HalfEdgeMesh> {
    let mut result = mesh.clone();
    for op in ops {
        result = apply(&result, op)?;
    }
    Ok(result)
}

/// An intermediate polygon-soup accumulator for the rebuild-style operators
/// (truncate, ambo, dual-like transforms): positions and faces are gathered
/// with their roles, then turned into a mesh in one go.
#[derive(Default)]
struct PolygonSoup {
    positions: Vec<Vec3>,
    vertex_roles: Vec<Role>,
    faces: Vec<SVec<u32>>,
    face_roles: Vec<Role>,
}

impl PolygonSoup {
    fn push_vertex(&mut self, pos: Vec3, role: Role) -> u32 {
        let idx = self.positions.len() as u32;
        self.positions.push(pos);
        self.vertex_roles.push(role);
        idx
    }

    fn push_face(&mut self, verts: SVec<u32>, role: Role) {
        self.faces.push(verts);
        self.face_roles.push(role);
    }

    fn build(self) -> Result<HalfEdgeMesh> {
        let mesh = HalfEdgeMesh::build_from_polygons(&self.positions, &self.faces)?;
        {
            let conn = mesh.read_connectivity();
            let mut v_roles = mesh.write_vertex_roles();
            for ((v, _), role) in conn.iter_vertices().zip(self.vertex_roles) {
                v_roles[v] = role;
            }
            let mut f_roles = mesh.write_face_roles();
            for ((f, _), role) in conn.iter_faces().zip(self.face_roles) {
                f_roles[f] = role;
            }
        }
        Ok(mesh)
    }
}

/// Selected faces in connectivity iteration order, so per-element amounts and
/// generated ids are reproducible.
fn ordered_faces(mesh: &HalfEdgeMesh, filter: &FaceFilter) -> Result<Vec<FaceId>> {
    let selected = filter.resolve(mesh)?;
    Ok(mesh
        .read_connectivity()
        .iter_faces()
        .map(|(f, _)| f)
        .filter(|f| selected.contains(f))
        .collect())
}

fn kis(mesh: &HalfEdgeMesh, amount: &Amount, filter: &FaceFilter) -> Result<HalfEdgeMesh> {
    let result = mesh.clone();
    let faces = ordered_faces(&result, filter)?;

    for (index, f) in faces.iter().enumerate() {
        let (ring, normal, centroid, role) = {
            let conn = result.read_connectivity();
            let positions = result.read_positions();
            let roles = result.read_face_roles();
            let normal = conn
                .face_normal(&positions, *f)
                .ok_or_else(|| anyhow!("Cannot kis a degenerate face"))?;
            (
                conn.face_vertices(*f),
                normal,
                conn.face_vertex_average(&positions, *f),
                roles[*f],
            )
        };

        let offset = amount.eval(&ElementCtx {
            index,
            role,
            sides: ring.len(),
            position: centroid,
        });

        let mut conn = result.write_connectivity();
        let mut positions = result.write_positions();
        let mut f_roles = result.write_face_roles();
        let mut v_roles = result.write_vertex_roles();

        edit_ops::remove_faces(&mut conn, &[*f])?;
        let apex = conn.alloc_vertex(&mut positions, centroid + normal * offset, None);
        v_roles[apex] = Role::New;

        for (&a, &b) in ring.iter().circular_tuple_windows() {
            let tri = conn.add_face(&[a, b, apex])?;
            f_roles[tri] = Role::New;
        }
    }

    Ok(result)
}

fn truncate(mesh: &HalfEdgeMesh, amount: &Amount, filter: &VertexFilter) -> Result<HalfEdgeMesh> {
    let selected = filter.resolve(mesh)?;
    let conn = mesh.read_connectivity();
    let positions = mesh.read_positions();
    let v_roles = mesh.read_vertex_roles();
    let f_roles = mesh.read_face_roles();

    // Order the targets and evaluate their cut fractions up front.
    let mut cut_fraction = slotmap::SecondaryMap::<VertexId, f32>::new();
    for (index, (v, _)) in conn
        .iter_vertices()
        .filter(|(v, _)| selected.contains(v))
        .enumerate()
    {
        let outgoing = conn
            .vertex_outgoing_halfedges(v)
            .map_err(|err| anyhow!("Malformed mesh: {err}"))?;
        // A vertex polygon needs a closed fan around the vertex.
        for h in outgoing.iter_cpy() {
            if conn.at_halfedge(h).is_boundary()? {
                bail!("Invalid topology: cannot truncate boundary vertex {v:?}");
            }
        }
        cut_fraction.insert(
            v,
            amount.eval(&ElementCtx {
                index,
                role: v_roles[v],
                sides: outgoing.len(),
                position: positions[v],
            }),
        );
    }

    let mut soup = PolygonSoup::default();
    let mut kept = slotmap::SecondaryMap::<VertexId, u32>::new();
    let mut cuts = HashMap::<(VertexId, VertexId), u32>::new();

    for (v, _) in conn.iter_vertices() {
        if !cut_fraction.contains_key(v) {
            kept.insert(v, soup.push_vertex(positions[v], v_roles[v]));
        }
    }

    // One cut point per (truncated corner, neighbor) pair.
    let mut cut = |v: VertexId, w: VertexId, soup: &mut PolygonSoup| -> u32 {
        *cuts.entry((v, w)).or_insert_with(|| {
            let t = cut_fraction[v];
            soup.push_vertex(positions[v].lerp(positions[w], t), Role::New)
        })
    };

    // Original faces, with every truncated corner replaced by two cut points.
    for (f, _) in conn.iter_faces() {
        let ring = conn.face_vertices(f);
        let mut poly = SVec::new();
        for (i, &v) in ring.iter().enumerate() {
            if cut_fraction.contains_key(v) {
                let prev = ring[(i + ring.len() - 1) % ring.len()];
                let next = ring[(i + 1) % ring.len()];
                poly.push(cut(v, prev, &mut soup));
                poly.push(cut(v, next, &mut soup));
            } else {
                poly.push(kept[v]);
            }
        }
        soup.push_face(poly, f_roles[f]);
    }

    // One new polygon per truncated vertex. The outgoing fan is clockwise
    // seen from outside, so it gets reversed.
    for (v, _) in conn.iter_vertices() {
        if !cut_fraction.contains_key(v) {
            continue;
        }
        let fan = conn
            .vertex_outgoing_halfedges(v)
            .map_err(|err| anyhow!("Malformed mesh: {err}"))?;
        let poly: SVec<u32> = fan
            .iter_cpy()
            .rev()
            .map(|h| {
                let w = conn.at_halfedge(h).dst_vertex().try_end()?;
                Ok(cut(v, w, &mut soup))
            })
            .collect::<Result<_>>()?;
        soup.push_face(poly, Role::New);
    }

    soup.build()
}

fn ambo(mesh: &HalfEdgeMesh) -> Result<HalfEdgeMesh> {
    let conn = mesh.read_connectivity();
    let positions = mesh.read_positions();
    let f_roles = mesh.read_face_roles();

    if conn.num_boundary_halfedges() > 0 {
        bail!("Invalid topology: ambo requires a closed mesh");
    }

    let mut soup = PolygonSoup::default();
    let mut midpoints = HashMap::<(VertexId, VertexId), u32>::new();
    let mut midpoint = |a: VertexId, b: VertexId, soup: &mut PolygonSoup| -> u32 {
        let key = if a < b { (a, b) } else { (b, a) };
        *midpoints.entry(key).or_insert_with(|| {
            soup.push_vertex((positions[a] + positions[b]) * 0.5, Role::New)
        })
    };

    // One face per original face, connecting its edge midpoints.
    for (f, _) in conn.iter_faces() {
        let poly: SVec<u32> = conn
            .face_edges(f)
            .iter_cpy()
            .map(|h| {
                let (a, b) = conn.edge_endpoints(h);
                midpoint(a, b, &mut soup)
            })
            .collect();
        soup.push_face(poly, f_roles[f]);
    }

    // One face per original vertex, connecting the midpoints of its incident
    // edges. The fan is clockwise from outside; reverse for outward winding.
    for (v, _) in conn.iter_vertices() {
        let fan = conn
            .vertex_outgoing_halfedges(v)
            .map_err(|err| anyhow!("Malformed mesh: {err}"))?;
        let poly: SVec<u32> = fan
            .iter_cpy()
            .rev()
            .map(|h| {
                let (a, b) = conn.edge_endpoints(h);
                midpoint(a, b, &mut soup)
            })
            .collect();
        if poly.len() < 3 {
            bail!("Invalid topology: vertex {v:?} has degree < 3");
        }
        soup.push_face(poly, Role::New);
    }

    soup.build()
}

/// Shared implementation of loft and extrude. Both replace each selected
/// face with an offset copy plus a band of side quads; extrude is the
/// zero-inset case.
fn extrude_like(
    mesh: &HalfEdgeMesh,
    amount: &Amount,
    inset: &Amount,
    filter: &FaceFilter,
) -> Result<HalfEdgeMesh> {
    let result = mesh.clone();
    let faces = ordered_faces(&result, filter)?;

    for (index, f) in faces.iter().enumerate() {
        let (ring, normal, centroid, role) = {
            let conn = result.read_connectivity();
            let positions = result.read_positions();
            let roles = result.read_face_roles();
            let normal = conn
                .face_normal(&positions, *f)
                .ok_or_else(|| anyhow!("Cannot extrude a degenerate face"))?;
            (
                conn.face_vertices(*f),
                normal,
                conn.face_vertex_average(&positions, *f),
                roles[*f],
            )
        };

        let ctx = ElementCtx {
            index,
            role,
            sides: ring.len(),
            position: centroid,
        };
        let offset = amount.eval(&ctx);
        let inset = inset.eval(&ctx);

        let mut conn = result.write_connectivity();
        let mut positions = result.write_positions();
        let mut f_roles = result.write_face_roles();
        let mut v_roles = result.write_vertex_roles();

        edit_ops::remove_faces(&mut conn, &[*f])?;

        let offset_ring: SVec<VertexId> = ring
            .iter_cpy()
            .map(|v| {
                let pos = positions[v].lerp(centroid, inset) + normal * offset;
                let w = conn.alloc_vertex(&mut positions, pos, None);
                v_roles[w] = Role::New;
                w
            })
            .collect();

        for (i, (&a, &b)) in ring.iter().circular_tuple_windows().enumerate() {
            let wa = offset_ring[i];
            let wb = offset_ring[(i + 1) % ring.len()];
            let wall = conn.add_face(&[a, b, wb, wa])?;
            f_roles[wall] = Role::NewAlt;
        }
        let cap = conn.add_face(&offset_ring)?;
        f_roles[cap] = Role::New;
    }

    Ok(result)
}

fn collapse_edges(
    mesh: &HalfEdgeMesh,
    sides_a: usize,
    sides_b: usize,
    either: bool,
    filter: &FaceFilter,
) -> Result<HalfEdgeMesh> {
    let result = mesh.clone();

    let mut guard = 0;
    loop {
        if guard > MAX_LOOP_ITERATIONS {
            // Best-effort partial result rather than an error.
            log::warn!("collapse_edges: merge scan cap reached, returning partial result");
            break;
        }
        guard += 1;

        // The filter is re-resolved every pass: merged faces change side
        // counts and may qualify or disqualify.
        let allowed = filter.resolve(&result)?;
        let target = {
            let conn = result.read_connectivity();
            let matches = |f: FaceId, g: FaceId| {
                let (sf, sg) = (conn.face_sides(f), conn.face_sides(g));
                sf == sides_a && sg == sides_b || either && sf == sides_b && sg == sides_a
            };
            // Bound to a local so the iterator borrowing `conn` is dropped
            // before `conn` itself at the end of this block.
            let found = conn.iter_faces().find_map(|(f, _)| {
                if !allowed.contains(&f) {
                    return None;
                }
                conn.face_edges(f).iter_cpy().find(|&h| {
                    match conn.at_halfedge(h).pair().face().try_end() {
                        Ok(g) => g != f && allowed.contains(&g) && matches(f, g),
                        Err(_) => false,
                    }
                })
            });
            found
        };

        match target {
            Some(h) => {
                let mut conn = result.write_connectivity();
                edit_ops::dissolve_edge(&mut conn, h)?;
            }
            None => break,
        }
    }

    Ok(result)
}

fn canonicalize(mesh: &HalfEdgeMesh, iterations: usize, tangentify: bool) -> Result<HalfEdgeMesh> {
    let result = mesh.clone();

    for _ in 0..iterations {
        let conn = result.read_connectivity();
        let mut positions = result.write_positions();

        if tangentify {
            // Pull edge midpoints onto the unit sphere.
            let mut correction = slotmap::SecondaryMap::<VertexId, (Vec3, u32)>::new();
            let mut center = Vec3::ZERO;
            let mut num_edges = 0;
            for (h, he) in conn.iter_halfedges() {
                // Visit each undirected edge once.
                if let Some(p) = he.pair {
                    if p < h {
                        continue;
                    }
                }
                let (a, b) = conn.edge_endpoints(h);
                let m = (positions[a] + positions[b]) * 0.5;
                center += m;
                num_edges += 1;
                if m.length_squared() > 1e-12 {
                    let c = m * (1.0 / m.length() - 1.0);
                    for v in [a, b] {
                        let entry = correction.entry(v).unwrap().or_insert((Vec3::ZERO, 0));
                        entry.0 += c;
                        entry.1 += 1;
                    }
                }
            }
            for (v, &(c, n)) in correction.iter() {
                positions[v] += c / n.max(1) as f32;
            }
            // Recenter on the edge-midpoint centroid.
            if num_edges > 0 {
                let center = center / num_edges as f32;
                for (v, _) in conn.iter_vertices() {
                    positions[v] -= center;
                }
            }
        }

        // Planarize: project each vertex toward the planes of its adjacent
        // faces.
        let mut correction = slotmap::SecondaryMap::<VertexId, (Vec3, u32)>::new();
        for (f, _) in conn.iter_faces() {
            let normal = match conn.face_normal(&positions, f) {
                Some(n) => n,
                None => continue,
            };
            let centroid = conn.face_vertex_average(&positions, f);
            for v in conn.face_vertices(f).iter_cpy() {
                let offset = (positions[v] - centroid).dot(normal);
                let entry = correction.entry(v).unwrap().or_insert((Vec3::ZERO, 0));
                entry.0 -= normal * offset;
                entry.1 += 1;
            }
        }
        for (v, &(c, n)) in correction.iter() {
            positions[v] += c / n.max(1) as f32;
        }
    }

    Ok(result)
}

fn spherize(mesh: &HalfEdgeMesh, amount: f32) -> Result<HalfEdgeMesh> {
    let result = mesh.clone();
    {
        let conn = result.read_connectivity();
        let mut positions = result.write_positions();
        for (v, _) in conn.iter_vertices() {
            let p = positions[v];
            if p.length_squared() > 1e-12 {
                positions[v] = p.lerp(p.normalize(), amount);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::super::primitives::{Platonic, Prism};
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use std::cell::RefCell;

    fn counts(mesh: &HalfEdgeMesh) -> (usize, usize) {
        let conn = mesh.read_connectivity();
        (conn.num_vertices(), conn.num_faces())
    }

    #[test]
    fn kis_on_square_prism() {
        let prism = Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        let out = apply(
            &prism,
            &MeshOperator::Kis {
                amount: 0.5.into(),
                filter: FaceFilter::default(),
            },
        )
        .unwrap();
        assert_eq!(counts(&out), (14, 24));
        // Input untouched.
        assert_eq!(counts(&prism), (8, 6));
        // Every new face is a triangle with role New.
        let conn = out.read_connectivity();
        let roles = out.read_face_roles();
        for (f, _) in conn.iter_faces() {
            assert_eq!(conn.face_sides(f), 3);
            assert_eq!(roles[f], Role::New);
        }
    }

    #[test]
    fn kis_respects_filter() {
        let prism = Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        // Only the two hexagonal caps.
        let out = apply(
            &prism,
            &MeshOperator::Kis {
                amount: 0.3.into(),
                filter: FaceFilter::with_sides(&[6]),
            },
        )
        .unwrap();
        // 6 quads survive, 2 * 6 new triangles.
        assert_eq!(counts(&out), (14, 18));
        let roles = out.read_face_roles();
        let conn = out.read_connectivity();
        let existing = conn
            .iter_faces()
            .filter(|(f, _)| roles[*f] == Role::Existing)
            .count();
        assert_eq!(existing, 6);
    }

    #[test]
    fn truncate_cube() {
        let out = apply(
            &Platonic::cube(),
            &MeshOperator::Truncate {
                amount: 0.3.into(),
                filter: VertexFilter::default(),
            },
        )
        .unwrap();
        // Truncated cube: 24 vertices, 6 octagons + 8 triangles.
        assert_eq!(counts(&out), (24, 14));
        assert_eq!(out.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn ambo_cube_is_cuboctahedron() {
        let out = apply(&Platonic::cube(), &MeshOperator::Ambo).unwrap();
        assert_eq!(counts(&out), (12, 14));
        assert_eq!(out.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn expand_cube() {
        // aaC is the rhombicuboctahedron-like expansion: e = aa.
        let out = apply(&Platonic::cube(), &MeshOperator::Expand).unwrap();
        assert_eq!(counts(&out), (24, 26));
    }

    #[test]
    fn extrude_keeps_walls_and_cap_roles() {
        let cube = Platonic::cube();
        let out = apply(
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
        // One face extruded: 4 walls + 1 cap replace it.
        assert_eq!(counts(&out), (12, 10));
        let conn = out.read_connectivity();
        let roles = out.read_face_roles();
        let new = conn
            .iter_faces()
            .filter(|(f, _)| roles[*f] == Role::New)
            .count();
        let new_alt = conn
            .iter_faces()
            .filter(|(f, _)| roles[*f] == Role::NewAlt)
            .count();
        assert_eq!((new, new_alt), (1, 4));
    }

    #[test]
    fn loft_insets_in_plane() {
        let cube = Platonic::cube();
        let out = apply(
            &cube,
            &MeshOperator::Loft {
                amount: 0.0.into(),
                inset: 0.5.into(),
                filter: FaceFilter::default(),
            },
        )
        .unwrap();
        // Every face becomes 4 quads + 1 cap.
        assert_eq!(counts(&out), (8 + 24, 30));
        assert_eq!(out.read_connectivity().num_boundary_halfedges(), 0);
    }

    #[test]
    fn collapse_edges_merges_quads_into_hexagons() {
        let prism = Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        let out = apply(
            &prism,
            &MeshOperator::CollapseEdges {
                sides_a: 4,
                sides_b: 4,
                either: true,
                filter: FaceFilter::default(),
            },
        )
        .unwrap();
        // Greedy merging strictly reduces the face count.
        let (_, faces) = counts(&out);
        assert!(faces < 6);
        // No face with 4 sides adjacent to another 4-sided face remains.
        let conn = out.read_connectivity();
        for (f, _) in conn.iter_faces() {
            if conn.face_sides(f) != 4 {
                continue;
            }
            for h in conn.face_edges(f).iter_cpy() {
                if let Ok(g) = conn.at_halfedge(h).pair().face().try_end() {
                    assert!(conn.face_sides(g) != 4 || g == f);
                }
            }
        }
    }

    #[test]
    fn spherize_projects_vertices() {
        let out = apply(&Platonic::cube(), &MeshOperator::Spherize { amount: 1.0 }).unwrap();
        let positions = out.read_positions();
        for (_, pos) in positions.iter() {
            assert!((pos.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn canonicalize_planarizes() {
        // Spherized cube faces are non-planar; canonicalize should reduce
        // the deviation.
        let bumpy = apply(
            &apply(&Platonic::cube(), &MeshOperator::Truncate {
                amount: 0.3.into(),
                filter: VertexFilter::default(),
            })
            .unwrap(),
            &MeshOperator::Spherize { amount: 0.7 },
        )
        .unwrap();

        fn planarity_error(mesh: &HalfEdgeMesh) -> f32 {
            let conn = mesh.read_connectivity();
            let positions = mesh.read_positions();
            let mut err: f32 = 0.0;
            for (f, _) in conn.iter_faces() {
                let n = conn.face_normal(&positions, f).unwrap();
                let c = conn.face_vertex_average(&positions, f);
                for v in conn.face_vertices(f).iter_cpy() {
                    err = err.max(((positions[v] - c).dot(n)).abs());
                }
            }
            err
        }

        let before = planarity_error(&bumpy);
        let relaxed = apply(&bumpy, &MeshOperator::Canonicalize { iterations: 20 }).unwrap();
        let after = planarity_error(&relaxed);
        assert!(after < before);
    }

    #[test]
    fn per_element_amount_with_random_source() {
        let rng = RefCell::new(SmallRng::seed_from_u64(42));
        let prism = Prism::build(Vec3::ZERO, 1.0, 1.0, 5);
        let out = apply(
            &prism,
            &MeshOperator::Kis {
                amount: Amount::PerElement(Rc::new(move |_ctx| {
                    rng.borrow_mut().gen_range(0.1..0.5)
                })),
                filter: FaceFilter::default(),
            },
        )
        .unwrap();
        // 5 quads + 2 pentagon caps, all fanned.
        assert_eq!(counts(&out), (7 + 10, 4 * 5 + 2 * 5));
    }

    #[test]
    fn truncating_boundary_vertex_is_an_error() {
        let quad = super::super::primitives::Quad::build(Vec3::ZERO, Vec3::Y, Vec3::X, Vec2::ONE);
        let res = apply(
            &quad,
            &MeshOperator::Truncate {
                amount: 0.3.into(),
                filter: VertexFilter::default(),
            },
        );
        assert!(res.is_err());
    }
}
