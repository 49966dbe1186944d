use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, instrument};

use super::ds::Rank;
use super::interference::FaceRegion;
use super::options::Tuning;
use super::progress::{ProgressToken, Stage};
use super::report::{BooleanError, Report, WarningKind};
use crate::geometry::bbox::BoundingBox;
use crate::geometry::curves::Ray;
use crate::geometry::intersection;
use crate::geometry::point::Point3d;
use crate::geometry::polygon::{self, Containment};
use crate::geometry::surfaces::Surface;
use crate::geometry::vector::Vec3;
use crate::geometry::SurfaceEvaluable;
use crate::topology::brep::*;
use crate::topology::shape::{EntityKind, EntityRef, Shape};

/// Classification of a point relative to a solid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointClassification {
    Inside,
    Outside,
    OnBoundary,
}

/// Position of a face or edge fragment relative to the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentState {
    In,
    Out,
    OnBoundary,
}

impl From<PointClassification> for FragmentState {
    fn from(c: PointClassification) -> Self {
        match c {
            PointClassification::Inside => FragmentState::In,
            PointClassification::Outside => FragmentState::Out,
            PointClassification::OnBoundary => FragmentState::OnBoundary,
        }
    }
}

/// Fixed, deliberately non-axis-aligned ray directions.
const RAY_DIRECTIONS: [(f64, f64, f64); 7] = [
    (0.2673, 0.5345, 0.8018),
    (-0.6, 0.64, 0.48),
    (0.31, -0.77, 0.56),
    (-0.45, -0.33, -0.83),
    (0.83, 0.12, -0.54),
    (-0.17, 0.92, -0.35),
    (0.71, -0.46, 0.53),
];

#[derive(Debug, Clone)]
enum ProbeFace {
    Planar(FaceRegion),
    /// Full-revolution curved faces, bounded by their box.
    Curved { surface: Surface, bbox: BoundingBox },
}

/// The boundary faces of a solid (or of any closed face set) prepared
/// for membership queries.
#[derive(Debug, Clone)]
pub struct SolidProbe {
    faces: Vec<ProbeFace>,
    bbox: BoundingBox,
}

impl SolidProbe {
    pub fn new(store: &EntityStore, faces: impl IntoIterator<Item = FaceId>) -> Self {
        let mut bbox = BoundingBox::empty();
        let faces = faces
            .into_iter()
            .map(|f| {
                let face_box = store.face_bounding_box(f);
                bbox.add_box(&face_box);
                match FaceRegion::of(store, f) {
                    Some(region) => ProbeFace::Planar(region),
                    None => ProbeFace::Curved {
                        surface: store.faces[f].surface.clone(),
                        bbox: face_box,
                    },
                }
            })
            .collect();
        Self { faces, bbox }
    }

    /// Probe over every face of a shape.
    pub fn of_shape(store: &EntityStore, shape: &Shape) -> Self {
        let faces = store.explore_kind(shape, EntityKind::Face).into_iter().filter_map(|r| match r {
            EntityRef::Face(f) => Some(f),
            _ => None,
        });
        Self::new(store, faces)
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// True if `p` lies within `tol` of some face.
    pub fn on_boundary(&self, p: &Point3d, tol: f64) -> bool {
        self.faces.iter().any(|face| match face {
            ProbeFace::Planar(region) => {
                region.frame.height(p).abs() <= tol && region.containment(p, tol) != Containment::Outside
            }
            ProbeFace::Curved { surface, bbox } => {
                bbox.enlarged(tol).contains_point(p) && surface.distance_to(p) <= tol
            }
        })
    }

    /// Number of distinct boundary crossings along `ray`, or `None` when
    /// the ray grazes a face or passes through an edge.
    pub fn crossings(&self, ray: &Ray, tol: f64) -> Option<usize> {
        let mut hit_ts: Vec<f64> = Vec::new();
        for face in &self.faces {
            match face {
                ProbeFace::Planar(region) => {
                    let normal = region.frame.normal;
                    if ray.direction.dot(&normal).abs() < 1e-9 {
                        if region.frame.height(&ray.origin).abs() <= tol {
                            return None;
                        }
                        continue;
                    }
                    let plane = crate::geometry::surfaces::Plane::new(region.frame.origin, normal);
                    let Some(hit) = intersection::ray_plane(ray, &plane) else { continue };
                    if hit.t <= tol {
                        continue;
                    }
                    match region.containment(&hit.point, tol) {
                        Containment::Inside => hit_ts.push(hit.t),
                        Containment::OnBoundary => return None,
                        Containment::Outside => {}
                    }
                }
                ProbeFace::Curved { surface, bbox } => {
                    let hits = match surface {
                        Surface::Sphere(s) => intersection::ray_sphere(ray, s),
                        Surface::Cylinder(c) => intersection::ray_cylinder(ray, c),
                        Surface::Plane(_) => vec![],
                    };
                    for hit in hits.into_iter().filter(|h| h.t > tol) {
                        if !bbox.enlarged(tol).contains_point(&hit.point) {
                            continue;
                        }
                        if !bbox.enlarged(-tol).contains_point(&hit.point) {
                            return None;
                        }
                        hit_ts.push(hit.t);
                    }
                }
            }
        }
        Some(deduplicate_crossings(&mut hit_ts, tol))
    }
}

/// Sort hit parameters and merge clusters within `tolerance` of each other.
/// Returns the number of distinct crossings.
fn deduplicate_crossings(ts: &mut [f64], tolerance: f64) -> usize {
    if ts.is_empty() {
        return 0;
    }
    ts.sort_by(f64::total_cmp);

    let mut count = 1;
    let mut last = ts[0];
    for &t in ts.iter().skip(1) {
        if (t - last).abs() > tolerance {
            count += 1;
        }
        last = t;
    }
    count
}

/// Point membership against a probed solid. Replaceable so that callers
/// can plug in a different classifier.
pub trait MembershipTester: Send + Sync {
    fn classify(&self, probe: &SolidProbe, p: &Point3d, tol: f64) -> PointClassification;
}

/// Parity ray casting with a majority vote over several directions.
/// Rays that touch an edge or graze a face do not vote.
#[derive(Debug, Clone, Copy)]
pub struct RayCastTester {
    pub ray_count: usize,
}

impl Default for RayCastTester {
    fn default() -> Self {
        Self { ray_count: 5 }
    }
}

impl MembershipTester for RayCastTester {
    fn classify(&self, probe: &SolidProbe, p: &Point3d, tol: f64) -> PointClassification {
        if !probe.bbox.enlarged(tol).contains_point(p) {
            return PointClassification::Outside;
        }
        if probe.on_boundary(p, tol) {
            return PointClassification::OnBoundary;
        }
        let (mut votes, mut inside) = (0, 0);
        for (x, y, z) in RAY_DIRECTIONS {
            if votes == self.ray_count {
                break;
            }
            if let Some(n) = probe.crossings(&Ray::new(*p, Vec3::new(x, y, z)), tol) {
                votes += 1;
                if n % 2 == 1 {
                    inside += 1;
                }
            }
        }
        if votes == 0 {
            PointClassification::OnBoundary
        } else if inside * 2 > votes {
            PointClassification::Inside
        } else {
            PointClassification::Outside
        }
    }
}

/// Interior sample points of a face with the face normal at each.
pub fn face_samples(store: &EntityStore, face: FaceId, tol: f64, count: usize) -> Vec<(Point3d, Vec3)> {
    if let Some(region) = FaceRegion::of(store, face) {
        return polygon::interior_samples(&region.rings, tol)
            .into_iter()
            .take(count)
            .map(|p| (region.frame.to_3d(&p), region.frame.normal))
            .collect();
    }
    let surface = &store.faces[face].surface;
    let (u0, v0) = surface.project(&store.face_bounding_box(face).center());
    (0..count)
        .map(|k| {
            let u = u0 + std::f64::consts::TAU * k as f64 / count.max(1) as f64;
            (surface.point_at(u, v0), store.face_normal(face, u, v0))
        })
        .collect()
}

/// State of a face fragment plus whether it fell back to `OnBoundary`.
pub fn classify_face(
    tester: &dyn MembershipTester,
    tuning: &Tuning,
    store: &EntityStore,
    face: FaceId,
    probe: &SolidProbe,
    tol: f64,
) -> (FragmentState, bool) {
    let offset = tuning.normal_offset_factor * tol;
    for (p, n) in face_samples(store, face, tol, tuning.classification_attempts.max(1)) {
        match tester.classify(probe, &p, tol) {
            PointClassification::OnBoundary => {
                let above = tester.classify(probe, &(p + n * offset), tol);
                let below = tester.classify(probe, &(p - n * offset), tol);
                if above == below && above != PointClassification::OnBoundary {
                    return (above.into(), false);
                }
            }
            c => return (c.into(), false),
        }
    }
    (FragmentState::OnBoundary, true)
}

/// Both operands' probes, indexed by rank.
#[derive(Debug, Clone, Default)]
pub struct OperandProbes {
    pub object: Option<SolidProbe>,
    pub tool: Option<SolidProbe>,
}

impl OperandProbes {
    pub fn get(&self, rank: Rank) -> Option<&SolidProbe> {
        match rank {
            Rank::Object => self.object.as_ref(),
            Rank::Tool => self.tool.as_ref(),
        }
    }
}

/// Classifies fragments against an operand, caching by fragment.
pub struct FragmentClassifier<'a> {
    pub tester: &'a dyn MembershipTester,
    pub tuning: &'a Tuning,
    pub progress: &'a ProgressToken,
    pub parallel: bool,
    pub fuzzy: f64,
    cache: HashMap<(FaceId, Rank), FragmentState>,
}

impl<'a> FragmentClassifier<'a> {
    pub fn new(
        tester: &'a dyn MembershipTester,
        tuning: &'a Tuning,
        progress: &'a ProgressToken,
        parallel: bool,
        fuzzy: f64,
    ) -> Self {
        Self {
            tester,
            tuning,
            progress,
            parallel,
            fuzzy,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self, face: FaceId, against: Rank) -> Option<FragmentState> {
        self.cache.get(&(face, against)).copied()
    }

    /// Classify each `(face, against)` request against the operand of rank
    /// `against`. Requests without a probe come back `Out`.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub fn classify_faces(
        &mut self,
        store: &EntityStore,
        requests: &[(FaceId, Rank)],
        probes: &OperandProbes,
        report: &mut Report,
    ) -> Result<Vec<FragmentState>, BooleanError> {
        let mut pending: Vec<(FaceId, Rank)> = requests
            .iter()
            .copied()
            .filter(|key| !self.cache.contains_key(key))
            .collect();
        pending.sort();
        pending.dedup();

        let (tester, tuning, fuzzy) = (self.tester, self.tuning, self.fuzzy);
        let work = |&(face, against): &(FaceId, Rank)| match probes.get(against) {
            Some(probe) => classify_face(tester, tuning, store, face, probe, store.faces[face].tolerance + fuzzy),
            None => (FragmentState::Out, false),
        };
        for batch in pending.chunks(self.tuning.batch_size.max(1)) {
            self.progress.check(Stage::Classification)?;
            let states: Vec<(FragmentState, bool)> = if self.parallel {
                batch.par_iter().map(&work).collect()
            } else {
                batch.iter().map(&work).collect()
            };
            for (&key, (state, inconclusive)) in batch.iter().zip(states) {
                if inconclusive {
                    report.push(
                        WarningKind::ClassificationInconclusive,
                        vec![EntityRef::Face(key.0)],
                        "no sample point classified cleanly; treated as on boundary",
                    );
                }
                self.cache.insert(key, state);
            }
        }
        debug!(classified = pending.len(), cached = self.cache.len(), "fragments classified");
        Ok(requests
            .iter()
            .map(|key| self.cache.get(key).copied().unwrap_or(FragmentState::Out))
            .collect())
    }

    pub fn classify_point(&self, probe: &SolidProbe, p: &Point3d, tol: f64) -> FragmentState {
        self.tester.classify(probe, p, tol + self.fuzzy).into()
    }
}
