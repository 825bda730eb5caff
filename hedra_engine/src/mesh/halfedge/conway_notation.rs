// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

use super::conway_ops::{self, MeshOperator};
use super::filters::{FaceFilter, VertexFilter};
use super::primitives::{Antiprism, Platonic, Prism, Pyramid};

/// Amounts used when an operator is invoked from a notation string, which has
/// no way to spell parameters.
pub const DEFAULT_KIS_HEIGHT: f32 = 0.3;
pub const DEFAULT_TRUNCATE_FRACTION: f32 = 0.3;
pub const DEFAULT_LOFT_INSET: f32 = 0.5;
pub const DEFAULT_EXTRUDE_HEIGHT: f32 = 0.3;

/// The rightmost token of a notation string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConwaySeed {
    Tetrahedron,
    Cube,
    Octahedron,
    Dodecahedron,
    Icosahedron,
    Prism(usize),
    Antiprism(usize),
    Pyramid(usize),
}

impl ConwaySeed {
    pub fn build(&self) -> Result<HalfEdgeMesh> {
        Ok(match self {
            ConwaySeed::Tetrahedron => Platonic::tetrahedron(),
            ConwaySeed::Cube => Platonic::cube(),
            ConwaySeed::Octahedron => Platonic::octahedron(),
            ConwaySeed::Dodecahedron => Platonic::dodecahedron(),
            ConwaySeed::Icosahedron => Platonic::icosahedron(),
            ConwaySeed::Prism(n) => Prism::build(Vec3::ZERO, 1.0, 1.0, *n),
            ConwaySeed::Antiprism(n) => Antiprism::build(Vec3::ZERO, 1.0, 1.0, *n),
            ConwaySeed::Pyramid(n) => Pyramid::build(Vec3::ZERO, 1.0, 1.0, *n),
        })
    }
}

/// A single prefix letter. Parameters are fixed to the `DEFAULT_*` values
/// above; callers needing control over amounts or filters use
/// [`MeshOperator`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConwayOp {
    Dual,
    Ambo,
    Kis,
    Truncate,
    Bevel,
    Expand,
    Loft,
    Extrude,
    Spherize,
}

impl ConwayOp {
    fn to_operator(self) -> MeshOperator {
        match self {
            ConwayOp::Dual => MeshOperator::Dual,
            ConwayOp::Ambo => MeshOperator::Ambo,
            ConwayOp::Kis => MeshOperator::Kis {
                amount: DEFAULT_KIS_HEIGHT.into(),
                filter: FaceFilter::default(),
            },
            ConwayOp::Truncate => MeshOperator::Truncate {
                amount: DEFAULT_TRUNCATE_FRACTION.into(),
                filter: VertexFilter::default(),
            },
            ConwayOp::Bevel => MeshOperator::Bevel {
                amount: DEFAULT_TRUNCATE_FRACTION.into(),
            },
            ConwayOp::Expand => MeshOperator::Expand,
            ConwayOp::Loft => MeshOperator::Loft {
                amount: 0.0.into(),
                inset: DEFAULT_LOFT_INSET.into(),
                filter: FaceFilter::default(),
            },
            ConwayOp::Extrude => MeshOperator::Extrude {
                amount: DEFAULT_EXTRUDE_HEIGHT.into(),
                filter: FaceFilter::default(),
            },
            ConwayOp::Spherize => MeshOperator::Spherize { amount: 1.0 },
        }
    }
}

/// A parsed notation string. `ops` is stored in application order: the
/// rightmost letter of the input comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConwayProgram {
    pub seed: ConwaySeed,
    pub ops: Vec<ConwayOp>,
}

/// Vertex / edge / face totals of a generated mesh, reported alongside it so
/// notation callers can sanity-check results without walking the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshCounts {
    pub vertices: usize,
    pub edges: usize,
    pub faces: usize,
}

impl MeshCounts {
    pub fn of(mesh: &HalfEdgeMesh) -> Self {
        let conn = mesh.read_connectivity();
        let halfedges = conn.num_halfedges();
        let boundary = conn.num_boundary_halfedges();
        MeshCounts {
            vertices: conn.num_vertices(),
            // Interior edges carry two halfedges, boundary edges one.
            edges: (halfedges + boundary) / 2,
            faces: conn.num_faces(),
        }
    }
}

/// Parses a notation string like `"dtC"`: the rightmost token is the seed
/// solid, each letter to its left is an operator applied to the running
/// result, right-to-left.
///
/// Seeds: `T C O D I`, plus `P<n>` (prism), `A<n>` (antiprism), `Y<n>`
/// (pyramid). Operators: `d a k t b e l x s`.
pub fn parse_conway(input: &str) -> Result<ConwayProgram> {
    use nom::{
        branch::alt,
        character::complete::{char, digit1},
        combinator::map,
        multi::many0,
        sequence::{preceded, tuple},
        IResult, Parser,
    };

    fn sides(input: &str) -> IResult<&str, usize> {
        map(digit1, |s: &str| s.parse().unwrap()).parse(input)
    }

    fn seed(input: &str) -> IResult<&str, ConwaySeed> {
        alt((
            map(char('T'), |_| ConwaySeed::Tetrahedron),
            map(char('C'), |_| ConwaySeed::Cube),
            map(char('O'), |_| ConwaySeed::Octahedron),
            map(char('D'), |_| ConwaySeed::Dodecahedron),
            map(char('I'), |_| ConwaySeed::Icosahedron),
            map(preceded(char('P'), sides), ConwaySeed::Prism),
            map(preceded(char('A'), sides), ConwaySeed::Antiprism),
            map(preceded(char('Y'), sides), ConwaySeed::Pyramid),
        ))
        .parse(input)
    }

    fn operator(input: &str) -> IResult<&str, ConwayOp> {
        alt((
            map(char('d'), |_| ConwayOp::Dual),
            map(char('a'), |_| ConwayOp::Ambo),
            map(char('k'), |_| ConwayOp::Kis),
            map(char('t'), |_| ConwayOp::Truncate),
            map(char('b'), |_| ConwayOp::Bevel),
            map(char('e'), |_| ConwayOp::Expand),
            map(char('l'), |_| ConwayOp::Loft),
            map(char('x'), |_| ConwayOp::Extrude),
            map(char('s'), |_| ConwayOp::Spherize),
        ))
        .parse(input)
    }

    fn program(input: &str) -> IResult<&str, ConwayProgram> {
        map(tuple((many0(operator), seed)), |(mut ops, seed)| {
            // Notation order is outermost-first; flip to application order.
            ops.reverse();
            ConwayProgram { seed, ops }
        })
        .parse(input)
    }

    match program(input.trim()) {
        Ok(("", program)) => {
            if let ConwaySeed::Prism(n) | ConwaySeed::Antiprism(n) | ConwaySeed::Pyramid(n) =
                program.seed
            {
                if n < 3 {
                    bail!("Invalid Conway notation '{input}': seed needs at least 3 sides");
                }
            }
            Ok(program)
        }
        Ok((remainder, _)) => bail!(
            "Invalid Conway notation '{input}': trailing characters '{remainder}' after the seed"
        ),
        Err(err) => bail!("Invalid Conway notation '{input}': {err}"),
    }
}

/// Builds the seed and runs the operator chain.
pub fn eval_conway(program: &ConwayProgram) -> Result<HalfEdgeMesh> {
    let mut mesh = program.seed.build()?;
    for op in &program.ops {
        mesh = conway_ops::apply(&mesh, &op.to_operator())?;
    }
    Ok(mesh)
}

/// One-stop entry point: parse, evaluate, and report the resulting counts.
pub fn conway(input: &str) -> Result<(HalfEdgeMesh, MeshCounts)> {
    let mesh = eval_conway(&parse_conway(input)?)?;
    let counts = MeshCounts::of(&mesh);
    Ok((mesh, counts))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_rightmost_seed() {
        let program = parse_conway("dtC").unwrap();
        assert_eq!(program.seed, ConwaySeed::Cube);
        assert_eq!(program.ops, vec![ConwayOp::Truncate, ConwayOp::Dual]);
    }

    #[test]
    fn parse_parametric_seeds() {
        assert_eq!(parse_conway("P6").unwrap().seed, ConwaySeed::Prism(6));
        assert_eq!(parse_conway("kA5").unwrap().seed, ConwaySeed::Antiprism(5));
        assert_eq!(parse_conway("Y4").unwrap().seed, ConwaySeed::Pyramid(4));
    }

    #[test]
    fn malformed_strings_echo_the_input() {
        for bad in ["", "d", "Cd", "dtQ", "P2", "k C"] {
            let err = parse_conway(bad).unwrap_err().to_string();
            assert!(err.contains(bad), "error for {bad:?} should echo it: {err}");
        }
    }

    #[test]
    fn kis_cube_counts() {
        let (_, counts) = conway("kC").unwrap();
        assert_eq!(
            counts,
            MeshCounts {
                vertices: 14,
                edges: 36,
                faces: 24
            }
        );
    }

    #[test]
    fn notation_matches_manual_chain() {
        use super::super::conway_ops::{apply, MeshOperator};

        let (_, from_notation) = conway("dtC").unwrap();

        let truncated = apply(
            &Platonic::cube(),
            &MeshOperator::Truncate {
                amount: DEFAULT_TRUNCATE_FRACTION.into(),
                filter: VertexFilter::default(),
            },
        )
        .unwrap();
        let manual = apply(&truncated, &MeshOperator::Dual).unwrap();

        assert_eq!(from_notation, MeshCounts::of(&manual));
        // Triakis octahedron: the dual of the truncated cube.
        assert_eq!(from_notation.vertices, 14);
        assert_eq!(from_notation.faces, 24);
    }

    #[test]
    fn bevel_cube_counts() {
        // bC = taC, the truncated cuboctahedron pattern.
        let (_, counts) = conway("bC").unwrap();
        assert_eq!(counts.vertices, 48);
        assert_eq!(counts.faces, 26);
        assert_eq!(counts.edges, 72);
    }
}
