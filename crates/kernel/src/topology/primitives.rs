use std::collections::HashMap;
use std::f64::consts::TAU;

use tracing::{debug, info, instrument};

use super::brep::*;
use super::shape::Shape;
use crate::geometry::curves::{Circle3d, Curve};
use crate::geometry::point::Point3d;
use crate::geometry::surfaces::{Cylinder, Plane, Surface};
use crate::geometry::vector::Vec3;

/// One planar face of a polyhedron: an outer ring counter-clockwise about
/// the outward normal and hole rings clockwise, as indices into the point list.
#[derive(Debug, Clone, Default)]
pub struct FaceDef {
    pub outer: Vec<usize>,
    pub holes: Vec<Vec<usize>>,
}

impl FaceDef {
    pub fn new(outer: &[usize]) -> Self {
        Self {
            outer: outer.to_vec(),
            holes: vec![],
        }
    }
}

fn default_tol() -> f64 {
    crate::default_tolerance().coincidence
}

/// Build a closed polyhedral solid. Edges shared by two rings are created
/// once; every face lies on the plane through its outer ring.
#[instrument(skip_all, fields(points = points.len(), faces = faces.len()))]
pub fn make_polyhedron(store: &mut EntityStore, points: &[Point3d], faces: &[FaceDef]) -> SolidId {
    let tol = default_tol();
    let vertex_ids: Vec<VertexId> = points.iter().map(|p| store.add_vertex(*p, tol)).collect();
    let mut edge_by_pair: HashMap<(usize, usize), EdgeId> = HashMap::new();

    let mut ring_loop = |store: &mut EntityStore, ring: &[usize]| -> LoopId {
        let mut uses = Vec::with_capacity(ring.len());
        for i in 0..ring.len() {
            let (a, b) = (ring[i], ring[(i + 1) % ring.len()]);
            let key = (a.min(b), a.max(b));
            let edge = match edge_by_pair.get(&key) {
                Some(&e) => e,
                None => {
                    let Some(e) = store.add_line_edge(vertex_ids[key.0], vertex_ids[key.1], tol) else {
                        debug!(a, b, "skipping zero-length polyhedron edge");
                        continue;
                    };
                    edge_by_pair.insert(key, e);
                    e
                }
            };
            uses.push((edge, a < b));
        }
        store.add_loop(&uses)
    };

    let mut face_ids = Vec::with_capacity(faces.len());
    for def in faces {
        let ring: Vec<Point3d> = def.outer.iter().map(|&i| points[i]).collect();
        let normal = Point3d::vector_area(&ring);
        let surface = Surface::Plane(Plane::new(ring[0], normal));
        let outer = ring_loop(store, &def.outer);
        let holes = def.holes.iter().map(|h| ring_loop(store, h)).collect();
        face_ids.push(store.add_face(surface, true, outer, holes, tol));
    }

    let shell = store.add_shell(face_ids, ShellOrientation::Outward);
    store.add_solid(vec![shell])
}

/// Build a box solid directly from corner coordinates.
/// The box is axis-aligned with one corner at (x0,y0,z0) and opposite at (x1,y1,z1).
#[instrument(skip(store))]
pub fn make_box(store: &mut EntityStore, x0: f64, y0: f64, z0: f64, x1: f64, y1: f64, z1: f64) -> SolidId {
    info!(
        min = ?[x0, y0, z0],
        max = ?[x1, y1, z1],
        "creating box primitive"
    );
    let v = [
        Point3d::new(x0, y0, z0),
        Point3d::new(x1, y0, z0),
        Point3d::new(x1, y1, z0),
        Point3d::new(x0, y1, z0),
        Point3d::new(x0, y0, z1),
        Point3d::new(x1, y0, z1),
        Point3d::new(x1, y1, z1),
        Point3d::new(x0, y1, z1),
    ];
    let faces = [
        FaceDef::new(&[0, 3, 2, 1]), // z = z0
        FaceDef::new(&[4, 5, 6, 7]), // z = z1
        FaceDef::new(&[0, 4, 7, 3]), // x = x0
        FaceDef::new(&[1, 2, 6, 5]), // x = x1
        FaceDef::new(&[0, 1, 5, 4]), // y = y0
        FaceDef::new(&[3, 7, 6, 2]), // y = y1
    ];
    make_polyhedron(store, &v, &faces)
}

/// Extrude a counter-clockwise XY profile with optional counter-clockwise
/// holes from `z0` to `z0 + height`.
#[instrument(skip(store, profile, holes), fields(sides = profile.len(), holes = holes.len()))]
pub fn make_prism(
    store: &mut EntityStore,
    profile: &[(f64, f64)],
    holes: &[Vec<(f64, f64)>],
    z0: f64,
    height: f64,
) -> SolidId {
    info!(z0, height, "creating prism primitive");
    let mut points = Vec::new();
    // (bottom, top) index ranges per ring; ring 0 is the outline.
    let mut rings: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
    for ring in std::iter::once(profile).chain(holes.iter().map(Vec::as_slice)) {
        let bottom: Vec<usize> = (0..ring.len()).map(|i| points.len() + i).collect();
        points.extend(ring.iter().map(|&(x, y)| Point3d::new(x, y, z0)));
        let top: Vec<usize> = (0..ring.len()).map(|i| points.len() + i).collect();
        points.extend(ring.iter().map(|&(x, y)| Point3d::new(x, y, z0 + height)));
        rings.push((bottom, top));
    }

    let reversed = |r: &[usize]| r.iter().rev().copied().collect::<Vec<_>>();
    let (outline_bottom, outline_top) = &rings[0];
    let mut faces = vec![
        FaceDef {
            outer: reversed(outline_bottom),
            holes: rings[1..].iter().map(|(b, _)| b.clone()).collect(),
        },
        FaceDef {
            outer: outline_top.clone(),
            holes: rings[1..].iter().map(|(_, t)| reversed(t)).collect(),
        },
    ];
    for (k, (bottom, top)) in rings.iter().enumerate() {
        let n = bottom.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let side = if k == 0 {
                [bottom[i], bottom[j], top[j], top[i]]
            } else {
                [bottom[j], bottom[i], top[i], top[j]]
            };
            faces.push(FaceDef::new(&side));
        }
    }
    make_polyhedron(store, &points, &faces)
}

/// Build a faceted cylinder solid along the Z axis.
#[instrument(skip(store), fields(center = ?[center.x, center.y, center.z]))]
pub fn make_cylinder(store: &mut EntityStore, center: Point3d, radius: f64, height: f64, num_segments: usize) -> SolidId {
    info!(radius, height, num_segments, "creating cylinder primitive");
    let n = num_segments.max(3);
    let profile: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let a = TAU * i as f64 / n as f64;
            (center.x + radius * a.cos(), center.y + radius * a.sin())
        })
        .collect();
    make_prism(store, &profile, &[], center.z, height)
}

/// Build a cylinder solid along the Z axis with exact circular geometry:
/// two planar caps bounded by circles and one lateral face closed by a seam.
#[instrument(skip(store), fields(center = ?[center.x, center.y, center.z]))]
pub fn make_round_cylinder(store: &mut EntityStore, center: Point3d, radius: f64, height: f64) -> SolidId {
    info!(radius, height, "creating round cylinder primitive");
    let tol = default_tol();
    let top_center = center + Vec3::Z * height;
    let bottom_circle = Circle3d::new(center, Vec3::Z, radius);
    let top_circle = Circle3d {
        center: top_center,
        ..bottom_circle
    };
    let seam_dir = bottom_circle.x_axis;
    let v_bottom = store.add_vertex(center + seam_dir * radius, tol);
    let v_top = store.add_vertex(top_center + seam_dir * radius, tol);

    let e_bottom = store.add_edge(Curve::Circle(bottom_circle), v_bottom, v_bottom, (0.0, TAU), tol);
    let e_top = store.add_edge(Curve::Circle(top_circle), v_top, v_top, (0.0, TAU), tol);
    let seam = store.add_line_edge(v_bottom, v_top, tol);

    let bottom_loop = store.add_loop(&[(e_bottom, false)]);
    let top_loop = store.add_loop(&[(e_top, true)]);
    let bottom = store.add_face(Surface::Plane(Plane::new(center, -Vec3::Z)), true, bottom_loop, vec![], tol);
    let top = store.add_face(Surface::Plane(Plane::new(top_center, Vec3::Z)), true, top_loop, vec![], tol);

    let mut faces = vec![bottom, top];
    if let Some(seam) = seam {
        let side_loop = store.add_loop(&[(e_bottom, true), (seam, true), (e_top, false), (seam, false)]);
        let mut cylinder = Cylinder::new(center, Vec3::Z, radius);
        cylinder.ref_dir = seam_dir;
        faces.push(store.add_face(Surface::Cylinder(cylinder), true, side_loop, vec![], tol));
    }
    let shell = store.add_shell(faces, ShellOrientation::Outward);
    store.add_solid(vec![shell])
}

/// Open chain of straight edges through `points`.
#[instrument(skip_all, fields(points = points.len()))]
pub fn make_polyline(store: &mut EntityStore, points: &[Point3d]) -> Shape {
    let tol = default_tol();
    let vs: Vec<VertexId> = points.iter().map(|p| store.add_vertex(*p, tol)).collect();
    let edges = vs
        .windows(2)
        .filter_map(|w| store.add_line_edge(w[0], w[1], tol))
        .map(Shape::Edge)
        .collect::<Vec<_>>();
    match edges.len() {
        0 => Shape::Empty,
        1 => edges.into_iter().next().unwrap_or_default(),
        _ => Shape::Compound(edges),
    }
}

/// Planar face bounded by the polygon `points`; the normal follows the
/// right-hand rule.
#[instrument(skip_all, fields(points = points.len()))]
pub fn make_planar_face(store: &mut EntityStore, points: &[Point3d]) -> FaceId {
    let tol = default_tol();
    let vs: Vec<VertexId> = points.iter().map(|p| store.add_vertex(*p, tol)).collect();
    let n = vs.len();
    let uses: Vec<(EdgeId, bool)> = (0..n)
        .filter_map(|i| store.add_line_edge(vs[i], vs[(i + 1) % n], tol).map(|e| (e, true)))
        .collect();
    let outer = store.add_loop(&uses);
    let surface = Surface::Plane(Plane::new(points[0], Point3d::vector_area(points)));
    store.add_face(surface, true, outer, vec![], tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::shape::EntityKind;

    #[test]
    fn test_make_box_creates_correct_topology() {
        let mut store = EntityStore::new();
        let solid_id = make_box(&mut store, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0);

        let solid = &store.solids[solid_id];
        assert_eq!(solid.shells.len(), 1);

        let (v, e, f) = store.count_topology(solid.shells[0]);
        assert_eq!(v, 8, "Box should have 8 vertices");
        assert_eq!(f, 6, "Box should have 6 faces");
        assert_eq!(e, 12, "Box should have 12 edges");
        assert_eq!(v as i64 - e as i64 + f as i64, 2, "Euler formula violated");
    }

    #[test]
    fn test_make_box_normals_point_outward() {
        let mut store = EntityStore::new();
        let solid_id = make_box(&mut store, 0.0, 0.0, 0.0, 2.0, 2.0, 2.0);
        let center = Point3d::new(1.0, 1.0, 1.0);
        for face in store.solid_faces(solid_id) {
            let plane = *store.faces[face].surface.as_plane().unwrap();
            let n = store.face_normal(face, 0.0, 0.0);
            assert!((plane.origin - center).dot(&n) > 0.0, "inward normal on {face:?}");
        }
    }

    #[test]
    fn test_every_edge_used_twice_in_opposite_directions() {
        let mut store = EntityStore::new();
        let solid_id = make_prism(
            &mut store,
            &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)],
            &[vec![(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (1.0, 3.0)]],
            0.0,
            1.0,
        );
        let mut uses: HashMap<EdgeId, Vec<bool>> = HashMap::new();
        for face in store.solid_faces(solid_id) {
            for l in store.face_loops(face).collect::<Vec<_>>() {
                for &he in &store.loops[l].half_edges {
                    let he = store.half_edges[he];
                    uses.entry(he.edge).or_default().push(he.forward);
                }
            }
        }
        assert_eq!(uses.len(), 24);
        for (_, dirs) in uses {
            assert_eq!(dirs.len(), 2);
            assert_ne!(dirs[0], dirs[1]);
        }
    }

    #[test]
    fn test_make_cylinder() {
        let mut store = EntityStore::new();
        let solid_id = make_cylinder(&mut store, Point3d::ORIGIN, 5.0, 10.0, 16);
        let shell = &store.shells[store.solids[solid_id].shells[0]];
        // 2 caps + 16 sides
        assert_eq!(shell.faces.len(), 18);
    }

    #[test]
    fn test_round_cylinder_faces() {
        let mut store = EntityStore::new();
        let solid_id = make_round_cylinder(&mut store, Point3d::ORIGIN, 1.0, 2.0);
        let shape = Shape::Solid(solid_id);
        assert_eq!(store.explore_kind(&shape, EntityKind::Face).len(), 3);
        assert_eq!(store.explore_kind(&shape, EntityKind::Edge).len(), 3);
        assert_eq!(store.explore_kind(&shape, EntityKind::Vertex).len(), 2);
    }

    #[test]
    fn test_polyline_and_face() {
        let mut store = EntityStore::new();
        let line = make_polyline(
            &mut store,
            &[Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(1.0, 1.0, 0.0)],
        );
        assert_eq!(line.leaves().len(), 2);
        let face = make_planar_face(
            &mut store,
            &[Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(0.0, 1.0, 0.0)],
        );
        assert!(store.face_normal(face, 0.0, 0.0).z > 0.99);
    }
}
