//! Coordinate-frame service.
//!
//! A [`FrameTransform`] is a rigid transform (rotation matrix + translation)
//! that maps points expressed in one named frame into another.  The fusion
//! core only ever asks a [`FrameService`] for "the transform from frame A to
//! frame B, valid now"; [`TfEngine`] is the in-process implementation, a graph
//! of named frames whose edges are composed via BFS.
//!
//! # Example
//!
//! ```rust
//! use skyfuse_perception::transform::{FrameService, FrameTransform, TfEngine};
//! use skyfuse_perception::{Matrix3, Point3, Vector3};
//!
//! let mut tf = TfEngine::new();
//!
//! // body sits 1 m forward of local, same orientation.
//! tf.set_transform("local", "body",
//!     FrameTransform::new(Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0)));
//! // camera is 0.5 m forward of body.
//! tf.set_transform("body", "camera",
//!     FrameTransform::new(Matrix3::identity(), Vector3::new(0.5, 0.0, 0.0)));
//!
//! // A point at the camera origin sits 1.5 m forward in local.
//! let t = tf.lookup("camera", "local").unwrap();
//! assert!((t.apply(&Point3::origin()).x - 1.5).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::{Matrix3, Point3, Vector3};

use crate::rotation::rotation_from_euler;

// ────────────────────────────────────────────────────────────────────────────
// FrameTransform
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body transform: `p' = rotation · p + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl FrameTransform {
    pub fn new(rotation: Matrix3<f32>, translation: Vector3<f32>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Build a transform from Euler angles (radians) and a translation.
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32, translation: Vector3<f32>) -> Self {
        Self::new(rotation_from_euler(roll, pitch, yaw), translation)
    }

    /// Map a single point.
    pub fn apply(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// The transform that undoes `self`.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation.transpose();
        Self::new(rt, -(rt * self.translation))
    }

    /// Chain two transforms: `self` is applied first, then `next`.
    ///
    /// If `self` maps A → B and `next` maps B → C the result maps A → C.
    pub fn then(&self, next: &Self) -> Self {
        Self::new(
            next.rotation * self.rotation,
            next.rotation * self.translation + next.translation,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameService
// ────────────────────────────────────────────────────────────────────────────

/// Source of "now"-valid transforms between named frames.
///
/// Implementations must be synchronous and side-effect free.  `None` means
/// no transform is currently known; callers treat that as "no data".
pub trait FrameService: Send + Sync {
    /// The transform mapping points expressed in `from` into `to`.
    fn lookup(&self, from: &str, to: &str) -> Option<FrameTransform>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named frames.
///
/// [`set_transform`][Self::set_transform] registers the pose of `child` in
/// `parent` (a transform mapping child coordinates into the parent frame);
/// the inverse edge is derived automatically, so lookups work in either
/// direction.  [`lookup`][FrameService::lookup] performs BFS for the shortest
/// chain and composes it.
#[derive(Debug, Default, Clone)]
pub struct TfEngine {
    /// `edges[from][to]` maps points in `from` into `to`.
    edges: HashMap<String, HashMap<String, FrameTransform>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` within `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, pose: FrameTransform) {
        self.edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), pose);
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), pose.inverse());
    }

    /// Number of distinct frames known to the engine.
    pub fn frame_count(&self) -> usize {
        self.edges.len()
    }
}

impl FrameService for TfEngine {
    fn lookup(&self, from: &str, to: &str) -> Option<FrameTransform> {
        if from == to {
            return Some(FrameTransform::identity());
        }

        // Each queue item carries the transform accumulated from `from` to
        // the current node.
        let mut queue: VecDeque<(&str, FrameTransform)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((from, FrameTransform::identity()));
        visited.insert(from);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated.then(edge);
                if next == to {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
