//! Bone transform solver.
//!
//! Bones are drawn as unit-height capsules whose long axis is local **+Y**.
//! Length is applied as scale along that same axis (`(1, length, 1)`), and
//! both orientation strategies rotate +Y onto the bone direction. Mixing the
//! axis between scale and rotation renders bones foreshortened or flipped.

use nalgebra::{UnitQuaternion, Vector3};
use serde::Deserialize;
use std::f32::consts::{FRAC_PI_2, PI};

use super::topology::SkeletonTopology;

/// Segments shorter than this have no defined direction.
pub const MIN_BONE_LENGTH: f32 = 1e-6;

/// Canonical long axis of a bone primitive.
pub fn bone_axis() -> Vector3<f32> {
    Vector3::y()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationStrategy {
    /// Shortest-arc rotation from +Y to the direction.
    #[default]
    ShortestArc,
    /// Look-at (+Z toward the direction), then +90° about X so that +Y
    /// ends up on the direction.
    LookAt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneTransform {
    pub midpoint: Vector3<f32>,
    pub length: f32,
    pub orientation: UnitQuaternion<f32>,
}

impl BoneTransform {
    /// Zero-length bone at the origin, used before any valid solve.
    pub fn rest() -> Self {
        Self {
            midpoint: Vector3::zeros(),
            length: 0.0,
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Unit vector the bone points along.
    pub fn direction(&self) -> Vector3<f32> {
        self.orientation * bone_axis()
    }

    /// Draw scale for a unit-height primitive.
    pub fn scale(&self) -> Vector3<f32> {
        Vector3::new(1.0, self.length, 1.0)
    }
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self::rest()
    }
}

fn shortest_arc(dir: &Vector3<f32>) -> UnitQuaternion<f32> {
    // rotation_between は反平行のとき None を返す
    UnitQuaternion::rotation_between(&bone_axis(), dir)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI))
}

fn look_at(dir: &Vector3<f32>) -> UnitQuaternion<f32> {
    let up = if dir.z.abs() > 0.999 {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let aim = UnitQuaternion::face_towards(dir, &up);
    aim * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2)
}

/// Stateless solve. `None` for a degenerate (zero-length) segment.
pub fn solve_bone(
    start: &Vector3<f32>,
    end: &Vector3<f32>,
    strategy: OrientationStrategy,
) -> Option<BoneTransform> {
    let delta = end - start;
    let length = delta.norm();
    if !length.is_finite() || length <= MIN_BONE_LENGTH {
        return None;
    }
    let dir = delta / length;
    let orientation = match strategy {
        OrientationStrategy::ShortestArc => shortest_arc(&dir),
        OrientationStrategy::LookAt => look_at(&dir),
    };
    Some(BoneTransform {
        midpoint: (start + end) * 0.5,
        length,
        orientation,
    })
}

/// Per-bone solver that keeps the last valid transform.
///
/// A degenerate bone returns its previous transform unchanged.
#[derive(Debug, Clone)]
pub struct BoneSolver {
    strategy: OrientationStrategy,
    previous: Vec<BoneTransform>,
}

impl BoneSolver {
    pub fn new(bone_count: usize, strategy: OrientationStrategy) -> Self {
        Self {
            strategy,
            previous: vec![BoneTransform::rest(); bone_count],
        }
    }

    pub fn for_topology(topology: &SkeletonTopology, strategy: OrientationStrategy) -> Self {
        Self::new(topology.bones().len(), strategy)
    }

    pub fn strategy(&self) -> OrientationStrategy {
        self.strategy
    }

    pub fn solve(&mut self, bone: usize, start: &Vector3<f32>, end: &Vector3<f32>) -> BoneTransform {
        if bone >= self.previous.len() {
            self.previous.resize(bone + 1, BoneTransform::rest());
        }
        if let Some(transform) = solve_bone(start, end, self.strategy) {
            self.previous[bone] = transform;
        }
        self.previous[bone]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn approx_eq_3(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
        (a - b).abs().max() < EPS
    }

    const STRATEGIES: [OrientationStrategy; 2] =
        [OrientationStrategy::ShortestArc, OrientationStrategy::LookAt];

    #[test]
    fn test_vertical_bone_down() {
        let start = Vector3::new(0.0, 1.0, 0.0);
        let end = Vector3::new(0.0, -1.0, 0.0);
        for strategy in STRATEGIES {
            let t = solve_bone(&start, &end, strategy).unwrap();
            assert!(approx_eq_3(&t.midpoint, &Vector3::zeros()));
            assert!((t.length - 2.0).abs() < EPS);
            assert!(
                approx_eq_3(&t.direction(), &Vector3::new(0.0, -1.0, 0.0)),
                "{:?}: {:?}",
                strategy,
                t.direction()
            );
        }
    }

    #[test]
    fn test_vertical_bone_up_is_identity() {
        let t = solve_bone(
            &Vector3::zeros(),
            &Vector3::new(0.0, 3.0, 0.0),
            OrientationStrategy::ShortestArc,
        )
        .unwrap();
        assert!(t.orientation.angle() < EPS);
        assert_eq!(t.scale(), Vector3::new(1.0, 3.0, 1.0));
    }

    #[test]
    fn test_length_is_euclidean_distance() {
        let cases = [
            (Vector3::new(0.0, 0.0, 0.0), Vector3::new(3.0, 4.0, 0.0)),
            (Vector3::new(-1.5, 0.25, 0.0), Vector3::new(1.0, -2.0, 0.0)),
            (Vector3::new(0.1, 0.1, 0.0), Vector3::new(0.1, 0.1001, 0.0)),
            (Vector3::new(1.0, 2.0, 3.0), Vector3::new(-4.0, 0.5, 1.0)),
        ];
        for (start, end) in cases {
            let t = solve_bone(&start, &end, OrientationStrategy::ShortestArc).unwrap();
            let expected = (end - start).norm();
            assert!((t.length - expected).abs() < EPS);
            assert!(approx_eq_3(&t.midpoint, &((start + end) / 2.0)));
        }
    }

    #[test]
    fn test_strategies_aim_the_same_way() {
        for i in 0..24 {
            let angle = i as f32 * std::f32::consts::TAU / 24.0;
            let start = Vector3::new(0.3, -0.2, 0.0);
            let end = start + Vector3::new(angle.cos(), angle.sin(), 0.0) * 1.7;
            let expected = (end - start).normalize();
            for strategy in STRATEGIES {
                let t = solve_bone(&start, &end, strategy).unwrap();
                assert!(
                    approx_eq_3(&t.direction(), &expected),
                    "{:?} at {} rad: {:?} vs {:?}",
                    strategy,
                    angle,
                    t.direction(),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_look_at_out_of_plane() {
        let t = solve_bone(
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 2.0),
            OrientationStrategy::LookAt,
        )
        .unwrap();
        assert!(approx_eq_3(&t.direction(), &Vector3::z()));
    }

    #[test]
    fn test_degenerate_bone_has_no_transform() {
        let p = Vector3::new(0.5, 0.5, 0.0);
        for strategy in STRATEGIES {
            assert!(solve_bone(&p, &p, strategy).is_none());
        }
    }

    #[test]
    fn test_solver_keeps_previous_on_degenerate() {
        let mut solver = BoneSolver::new(2, OrientationStrategy::ShortestArc);
        let first = solver.solve(1, &Vector3::new(1.0, 0.0, 0.0), &Vector3::new(-1.0, 0.0, 0.0));
        let p = Vector3::new(0.2, 0.2, 0.0);
        let second = solver.solve(1, &p, &p);
        assert_eq!(first, second);
        assert!(second.orientation.into_inner().coords.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_solver_degenerate_before_any_solve_is_rest() {
        let mut solver = BoneSolver::new(1, OrientationStrategy::LookAt);
        let t = solver.solve(0, &Vector3::zeros(), &Vector3::zeros());
        assert_eq!(t, BoneTransform::rest());
    }
}
