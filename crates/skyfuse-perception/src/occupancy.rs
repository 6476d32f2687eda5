//! The live occupancy map.
//!
//! [`OccupancyMap`] owns at most one [`OccupancyOctree`].  Every ingest
//! decodes and collapses a complete new tree *outside* the lock, then swaps
//! it in; readers clone the `Arc` under the lock and do all traversal and
//! transform work after releasing it.  A tree that is being read when a
//! replacement lands stays alive until that reader drops its handle.

use std::sync::Arc;

use nalgebra::Point3;
use parking_lot::Mutex;
use skyfuse_types::{DecodeError, OccupancyUpdate};
use tracing::{debug, info};

use crate::octree::OccupancyOctree;
use crate::rotation::transform_points;
use crate::transform::FrameService;

#[derive(Default)]
pub struct OccupancyMap {
    current: Mutex<Option<Arc<OccupancyOctree>>>,
}

impl OccupancyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `blob`, collapse it to maximum likelihood and install it as
    /// the current map.
    ///
    /// The tree's resolution comes from the blob; `resolution_hint` is only
    /// logged when it disagrees.  On error the current map is untouched.
    pub fn ingest_binary(
        &self,
        blob: &[u8],
        resolution_hint: f64,
    ) -> Result<Arc<OccupancyOctree>, DecodeError> {
        let mut tree = OccupancyOctree::read(blob)?;
        tree.to_max_likelihood();
        if (tree.resolution() - resolution_hint).abs() > f64::EPSILON {
            debug!(
                hint = resolution_hint,
                resolution = tree.resolution(),
                "occupancy resolution differs from hint"
            );
        }

        let tree = Arc::new(tree);
        let previous = self.current.lock().replace(Arc::clone(&tree));
        // Released after the lock; freed once the last reader lets go.
        drop(previous);

        info!(
            nodes = tree.node_count(),
            resolution = tree.resolution(),
            bytes = blob.len(),
            "occupancy map installed"
        );
        Ok(tree)
    }

    /// Install the payload of an occupancy update message.
    ///
    /// # Errors
    ///
    /// [`DecodeError::LengthMismatch`] when the declared length disagrees
    /// with the payload, otherwise whatever [`ingest_binary`][Self::ingest_binary]
    /// reports.
    pub fn ingest_update(
        &self,
        update: &OccupancyUpdate,
        resolution_hint: f64,
    ) -> Result<Arc<OccupancyOctree>, DecodeError> {
        if update.length as usize != update.data.len() {
            return Err(DecodeError::LengthMismatch {
                declared: update.length,
                actual: update.data.len(),
            });
        }
        self.ingest_binary(&update.data, resolution_hint)
    }

    /// A shared handle on the current map, if any.
    pub fn snapshot(&self) -> Option<Arc<OccupancyOctree>> {
        self.current.lock().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Release the current map (shutdown).
    pub fn clear(&self) {
        let previous = self.current.lock().take();
        drop(previous);
    }

    /// Cell centres of the current map expressed in `output_frame`.
    ///
    /// Cells are stored in `map_frame`; the transform comes from `frames`.
    /// With `exclude_free` only occupied cells are returned, otherwise free
    /// cells too.  An empty vector means no map yet or no transform known.
    pub fn query_points(
        &self,
        frames: &dyn FrameService,
        map_frame: &str,
        output_frame: &str,
        exclude_free: bool,
    ) -> Vec<Point3<f32>> {
        let Some(tree) = self.snapshot() else {
            return Vec::new();
        };
        let Some(tf) = frames.lookup(map_frame, output_frame) else {
            debug!(map_frame, output_frame, "no transform for occupancy query");
            return Vec::new();
        };
        let centers = tree.leaf_centers(exclude_free);
        transform_points(&centers, &tf.rotation, &tf.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::CellState;
    use crate::transform::{FrameTransform, TfEngine};
    use nalgebra::{Matrix3, Vector3};
    use std::sync::Barrier;
    use std::thread;

    fn blob(cells: &[(f32, f32, f32, CellState)]) -> Vec<u8> {
        let mut tree = OccupancyOctree::new(0.5).unwrap();
        for &(x, y, z, state) in cells {
            tree.set_cell(&Point3::new(x, y, z), state);
        }
        tree.write_binary()
    }

    fn identity_frames() -> TfEngine {
        TfEngine::new()
    }

    #[test]
    fn empty_before_first_ingest() {
        let map = OccupancyMap::new();
        assert!(!map.is_installed());
        assert!(map.query_points(&identity_frames(), "map", "map", true).is_empty());
    }

    #[test]
    fn identity_query_returns_cell_centres() {
        let map = OccupancyMap::new();
        map.ingest_binary(
            &blob(&[
                (1.2, -0.3, 4.0, CellState::Occupied),
                (0.1, 0.1, 0.1, CellState::Free),
            ]),
            0.5,
        )
        .unwrap();

        let occupied = map.query_points(&identity_frames(), "map", "map", true);
        assert_eq!(occupied, vec![Point3::new(1.25, -0.25, 4.25)]);

        let all = map.query_points(&identity_frames(), "map", "map", false);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn resolution_comes_from_blob() {
        let map = OccupancyMap::new();
        let tree = map
            .ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.05)
            .unwrap();
        assert_eq!(tree.resolution(), 0.5);
    }

    #[test]
    fn query_applies_frame_transform() {
        let map = OccupancyMap::new();
        map.ingest_binary(&blob(&[(1.2, -0.3, 4.0, CellState::Occupied)]), 0.5)
            .unwrap();

        let mut frames = TfEngine::new();
        frames.set_transform(
            "world",
            "map",
            FrameTransform::new(Matrix3::identity(), Vector3::new(10.0, 0.0, -1.0)),
        );
        let pts = map.query_points(&frames, "map", "world", true);
        assert_eq!(pts.len(), 1);
        assert!((pts[0] - Point3::new(11.25, -0.25, 3.25)).norm() < 1e-5);
    }

    #[test]
    fn missing_transform_yields_empty() {
        let map = OccupancyMap::new();
        map.ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.5)
            .unwrap();
        assert!(map.query_points(&TfEngine::new(), "map", "camera", true).is_empty());
    }

    #[test]
    fn ingest_collapses_to_max_likelihood() {
        // Full-format stream: root (log-odds 0.2) with one pruned child at 0.7.
        let mut data = b"# Octomap OcTree file\nid OcTree\nsize 2\nres 1\ndata\n".to_vec();
        data.extend_from_slice(&0.2f32.to_le_bytes());
        data.push(0b0000_0001);
        data.extend_from_slice(&0.7f32.to_le_bytes());
        data.push(0);

        let map = OccupancyMap::new();
        let tree = map.ingest_binary(&data, 1.0).unwrap();
        assert_eq!(tree.cells()[0].state, CellState::Occupied);
        assert_eq!(*tree, {
            let mut t = OccupancyOctree::read(&data).unwrap();
            t.to_max_likelihood();
            t
        });
    }

    #[test]
    fn new_blob_replaces_old_map() {
        let map = OccupancyMap::new();
        map.ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.5)
            .unwrap();
        map.ingest_binary(&blob(&[(-1.0, 2.0, 3.0, CellState::Occupied)]), 0.5)
            .unwrap();
        let pts = map.query_points(&identity_frames(), "map", "map", true);
        assert_eq!(pts, vec![Point3::new(-0.75, 2.25, 3.25)]);
    }

    #[test]
    fn corrupt_blob_leaves_map_untouched() {
        let map = OccupancyMap::new();
        map.ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.5)
            .unwrap();
        let before = map.query_points(&identity_frames(), "map", "map", true);

        let mut corrupt = blob(&[(5.0, 5.0, 5.0, CellState::Occupied)]);
        corrupt.truncate(corrupt.len() - 1);
        assert!(map.ingest_binary(&corrupt, 0.5).is_err());
        assert!(map.ingest_binary(b"garbage", 0.5).is_err());

        assert_eq!(map.query_points(&identity_frames(), "map", "map", true), before);
    }

    #[test]
    fn update_length_mismatch_is_rejected() {
        let map = OccupancyMap::new();
        let mut update = OccupancyUpdate::new(1, blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]));
        update.length += 1;
        assert!(matches!(
            map.ingest_update(&update, 0.5),
            Err(DecodeError::LengthMismatch { .. })
        ));
        assert!(!map.is_installed());

        update.length -= 1;
        assert!(map.ingest_update(&update, 0.5).is_ok());
    }

    #[test]
    fn clear_releases_map() {
        let map = OccupancyMap::new();
        let tree = map
            .ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.5)
            .unwrap();
        assert_eq!(Arc::strong_count(&tree), 2);
        map.clear();
        assert_eq!(Arc::strong_count(&tree), 1);
        assert!(!map.is_installed());
    }

    #[test]
    fn in_flight_reader_keeps_old_map_alive() {
        let map = Arc::new(OccupancyMap::new());
        map.ingest_binary(&blob(&[(1.0, 1.0, 1.0, CellState::Occupied)]), 0.5)
            .unwrap();

        let taken = Arc::new(Barrier::new(2));
        let replaced = Arc::new(Barrier::new(2));

        let reader = {
            let map = Arc::clone(&map);
            let taken = Arc::clone(&taken);
            let replaced = Arc::clone(&replaced);
            thread::spawn(move || {
                let tree = map.snapshot().expect("installed");
                taken.wait();
                replaced.wait();
                // Still the first map, fully intact.
                tree.leaf_centers(true)
            })
        };

        taken.wait();
        map.ingest_binary(&blob(&[(-1.0, 2.0, 3.0, CellState::Occupied)]), 0.5)
            .unwrap();
        replaced.wait();

        let old = reader.join().unwrap();
        assert_eq!(old, vec![Point3::new(1.25, 1.25, 1.25)]);
        assert_eq!(
            map.query_points(&identity_frames(), "map", "map", true),
            vec![Point3::new(-0.75, 2.25, 3.25)]
        );
    }
}
