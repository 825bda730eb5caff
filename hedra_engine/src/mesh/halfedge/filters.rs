// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

use super::selection::{SelectionExpression, SelectionFragment};

/// Selects the subset of faces an operator should transform. All criteria are
/// optional and are combined with a logical AND. A default filter matches
/// every face, except those whose role is [`Role::Ignored`], which never
/// match.
#[derive(Debug, Default, Clone)]
pub struct FaceFilter {
    /// Explicit indices or groups, in the selection DSL.
    pub selection: Option<SelectionExpression>,
    /// Keep faces whose role is one of these.
    pub roles: Option<Vec<Role>>,
    /// Keep faces with one of these side counts.
    pub sides: Option<Vec<usize>>,
    /// Keep faces whose normal points into the same half-space as this
    /// direction (positive dot product).
    pub facing: Option<Vec3>,
}

/// The vertex counterpart of [`FaceFilter`]. Degree is the number of edges
/// meeting at the vertex.
#[derive(Debug, Default, Clone)]
pub struct VertexFilter {
    pub selection: Option<SelectionExpression>,
    pub roles: Option<Vec<Role>>,
    pub degrees: Option<Vec<usize>>,
}

/// Explicit selections referencing an element index past the end of the mesh
/// are an error, not an empty match.
fn check_selection_bounds(selection: &SelectionExpression, count: usize) -> Result<()> {
    if let SelectionExpression::Explicit(fragments) = selection {
        for fragment in fragments {
            match fragment {
                SelectionFragment::Single(i) if *i as usize >= count => {
                    bail!("Selection index {i} is out of range: the mesh has {count} elements")
                }
                SelectionFragment::Range(r) if r.end as usize > count => {
                    bail!(
                        "Selection range {}..{} is out of range: the mesh has {count} elements",
                        r.start,
                        r.end
                    )
                }
                _ => {}
            }
        }
    }
    Ok(())
}

impl FaceFilter {
    pub fn with_roles(roles: &[Role]) -> Self {
        Self {
            roles: Some(roles.to_vec()),
            ..Default::default()
        }
    }

    pub fn with_sides(sides: &[usize]) -> Self {
        Self {
            sides: Some(sides.to_vec()),
            ..Default::default()
        }
    }

    /// Computes the set of faces this filter selects on `mesh`.
    pub fn resolve(&self, mesh: &HalfEdgeMesh) -> Result<HashSet<FaceId>> {
        let selected: Option<HashSet<FaceId>> = match &self.selection {
            Some(expr) => {
                check_selection_bounds(expr, mesh.read_connectivity().num_faces())?;
                Some(mesh.resolve_face_selection_full(expr)?.into_iter().collect())
            }
            None => None,
        };

        let conn = mesh.read_connectivity();
        let positions = mesh.read_positions();
        let face_roles = mesh.read_face_roles();

        let mut result = HashSet::new();
        for (f, _) in conn.iter_faces() {
            let role = face_roles[f];
            if role == Role::Ignored {
                continue;
            }
            if let Some(selected) = &selected {
                if !selected.contains(&f) {
                    continue;
                }
            }
            if let Some(roles) = &self.roles {
                if !roles.contains(&role) {
                    continue;
                }
            }
            if let Some(sides) = &self.sides {
                if !sides.contains(&conn.face_sides(f)) {
                    continue;
                }
            }
            if let Some(facing) = &self.facing {
                match conn.face_normal(&positions, f) {
                    Some(normal) if normal.dot(*facing) > 0.0 => {}
                    _ => continue,
                }
            }
            result.insert(f);
        }
        Ok(result)
    }
}

impl VertexFilter {
    pub fn with_roles(roles: &[Role]) -> Self {
        Self {
            roles: Some(roles.to_vec()),
            ..Default::default()
        }
    }

    /// Computes the set of vertices this filter selects on `mesh`.
    pub fn resolve(&self, mesh: &HalfEdgeMesh) -> Result<HashSet<VertexId>> {
        let selected: Option<HashSet<VertexId>> = match &self.selection {
            Some(expr) => {
                check_selection_bounds(expr, mesh.read_connectivity().num_vertices())?;
                Some(
                    mesh.resolve_vertex_selection_full(expr)?
                        .into_iter()
                        .collect(),
                )
            }
            None => None,
        };

        let conn = mesh.read_connectivity();
        let vertex_roles = mesh.read_vertex_roles();

        let mut result = HashSet::new();
        for (v, _) in conn.iter_vertices() {
            let role = vertex_roles[v];
            if role == Role::Ignored {
                continue;
            }
            if let Some(selected) = &selected {
                if !selected.contains(&v) {
                    continue;
                }
            }
            if let Some(roles) = &self.roles {
                if !roles.contains(&role) {
                    continue;
                }
            }
            if let Some(degrees) = &self.degrees {
                let degree = conn
                    .vertex_outgoing_halfedges(v)
                    .map_err(|err| anyhow!("Malformed mesh: {err}"))?
                    .len();
                if !degrees.contains(&degree) {
                    continue;
                }
            }
            result.insert(v);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::super::primitives;
    use super::*;

    #[test]
    fn default_filter_selects_everything() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        let filter = FaceFilter::default();
        assert_eq!(filter.resolve(&mesh).unwrap().len(), 8);
    }

    #[test]
    fn sides_filter() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        // The two hexagonal caps.
        let filter = FaceFilter::with_sides(&[6]);
        assert_eq!(filter.resolve(&mesh).unwrap().len(), 2);
        // The six side quads.
        let filter = FaceFilter::with_sides(&[4]);
        assert_eq!(filter.resolve(&mesh).unwrap().len(), 6);
    }

    #[test]
    fn facing_filter() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        // Only the top cap faces straight up.
        let filter = FaceFilter {
            facing: Some(Vec3::Y),
            ..Default::default()
        };
        let faces = filter.resolve(&mesh).unwrap();
        // The four side quads are orthogonal to Y; only the top cap has a
        // positive dot product.
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn ignored_faces_never_match() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 6);
        {
            let conn = mesh.read_connectivity();
            let mut roles = mesh.write_face_roles();
            for (f, _) in conn.iter_faces() {
                if conn.face_sides(f) == 6 {
                    roles[f] = Role::Ignored;
                }
            }
        }
        let filter = FaceFilter::default();
        assert_eq!(filter.resolve(&mesh).unwrap().len(), 6);
    }

    #[test]
    fn out_of_range_selection_is_an_error() {
        let mesh = primitives::Prism::build(Vec3::ZERO, 1.0, 1.0, 4);
        let filter = FaceFilter {
            selection: Some(SelectionExpression::parse("100").unwrap()),
            ..Default::default()
        };
        assert!(filter.resolve(&mesh).is_err());
    }
}
