pub mod bone;
pub mod mapper;
pub mod smoother;
pub mod topology;

pub use bone::{bone_axis, solve_bone, BoneSolver, BoneTransform, OrientationStrategy};
pub use mapper::CoordinateMapper;
pub use smoother::{JointSmoother, JointSnapshot, SharedJoints};
pub use topology::{Bone, SkeletonTopology};
