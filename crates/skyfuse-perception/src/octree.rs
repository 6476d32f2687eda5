//! Probabilistic occupancy octree (OctoMap-compatible).
//!
//! The tree has a fixed depth of [`TREE_DEPTH`] below a root cube of edge
//! `resolution · 2¹⁶` centred on the origin.  Every stored node carries a
//! log-odds occupancy value; an absent node is *unknown* space.  Inner nodes
//! carry the maximum of their children.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`OccupancyOctree`] | The tree: decode, collapse, query, encode.      |
//! | [`CellState`]       | Occupied / free / unknown classification.       |
//! | [`OccupancyCell`]   | One leaf: centre, edge length and state.        |
//!
//! # Stream formats
//!
//! Both OctoMap stream formats are accepted by [`OccupancyOctree::read`]; the
//! first header line selects the decoder.
//!
//! - `# Octomap OcTree binary file` – 2 bytes per inner node, two bits per
//!   child (`0` unknown, `1` free leaf, `2` occupied leaf, `3` inner node).
//! - `# Octomap OcTree file` – per node a little-endian `f32` log-odds and an
//!   8-bit child-existence mask, depth first.
//!
//! # Example
//!
//! ```rust
//! use skyfuse_perception::octree::{CellState, OccupancyOctree};
//! use skyfuse_perception::Point3;
//!
//! let mut tree = OccupancyOctree::new(0.5).unwrap();
//! tree.set_cell(&Point3::new(1.2, -0.3, 4.0), CellState::Occupied);
//!
//! let copy = OccupancyOctree::read(&tree.write_binary()).unwrap();
//! assert_eq!(copy.cell_state(&Point3::new(1.1, -0.4, 4.1)), CellState::Occupied);
//! assert_eq!(copy.leaf_centers(true), vec![Point3::new(1.25, -0.25, 4.25)]);
//! ```

use nalgebra::Point3;
use skyfuse_types::DecodeError;

/// Number of levels below the root.
pub const TREE_DEPTH: u8 = 16;
/// Log-odds assigned to occupied nodes by the maximum-likelihood collapse.
pub const CLAMPING_MAX: f32 = 3.5;
/// Log-odds assigned to free nodes by the maximum-likelihood collapse.
pub const CLAMPING_MIN: f32 = -2.0;
/// Nodes at or above this log-odds value are occupied.
pub const OCCUPANCY_THRESHOLD: f32 = 0.0;

const BINARY_HEADER: &str = "# Octomap OcTree binary file";
const FULL_HEADER: &str = "# Octomap OcTree file";
const TREE_ID: &str = "OcTree";

/// Half the key range: the key of the cell whose minimum corner is the origin.
const KEY_ORIGIN: i64 = 1 << (TREE_DEPTH - 1);
const KEY_RANGE: i64 = 1 << TREE_DEPTH;

// ────────────────────────────────────────────────────────────────────────────
// CellState / OccupancyCell
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellState {
    Occupied,
    Free,
    Unknown,
}

impl CellState {
    fn from_log_odds(log_odds: f32) -> Self {
        if log_odds >= OCCUPANCY_THRESHOLD {
            CellState::Occupied
        } else {
            CellState::Free
        }
    }
}

/// A leaf of the tree.  `size` is its edge length; pruned leaves above the
/// finest level cover `resolution · 2^k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyCell {
    pub center: Point3<f32>,
    pub size: f64,
    pub state: CellState,
}

// ────────────────────────────────────────────────────────────────────────────
// OccupancyOctree
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyOctree {
    resolution: f64,
    root: Option<OcNode>,
}

impl OccupancyOctree {
    /// An empty tree (every cell unknown).
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidResolution`] unless `resolution` is finite and
    /// positive.
    pub fn new(resolution: f64) -> Result<Self, DecodeError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(DecodeError::InvalidResolution(resolution));
        }
        Ok(Self {
            resolution,
            root: None,
        })
    }

    /// Decode an OctoMap stream (binary or full format).
    ///
    /// The resolution always comes from the stream's own `res` line.
    pub fn read(blob: &[u8]) -> Result<Self, DecodeError> {
        let (header, data) = parse_header(blob)?;
        let mut tree = Self::new(header.resolution)?;
        let mut cursor = Cursor::new(data);
        let mut decoded = 0usize;

        if header.size > 0 {
            tree.root = match header.format {
                Format::Binary => {
                    decoded += 1;
                    read_binary_children(&mut cursor, 0, &mut decoded)?.map(OcNode::inner)
                }
                Format::Full => Some(read_full_node(&mut cursor, 0, &mut decoded)?),
            };
        }

        if cursor.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(cursor.remaining()));
        }
        if decoded != header.size {
            return Err(DecodeError::SizeMismatch {
                declared: header.size,
                decoded,
            });
        }
        Ok(tree)
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of stored nodes, root included.
    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, OcNode::count)
    }

    /// Snap every node to its most likely state: [`CLAMPING_MAX`] at or above
    /// [`OCCUPANCY_THRESHOLD`], [`CLAMPING_MIN`] below.  Unknown space stays
    /// unknown.
    pub fn to_max_likelihood(&mut self) {
        if let Some(root) = self.root.as_mut() {
            root.collapse();
        }
    }

    /// Mark the finest-level cell containing `p`.
    ///
    /// Occupied and free cells are stored at the clamping values; `Unknown`
    /// removes the cell.  Returns `false` (and leaves the tree alone) when `p`
    /// lies outside the representable volume.
    pub fn set_cell(&mut self, p: &Point3<f32>, state: CellState) -> bool {
        let Some(key) = self.key_of(p) else {
            return false;
        };
        let value = match state {
            CellState::Occupied => Some(CLAMPING_MAX),
            CellState::Free => Some(CLAMPING_MIN),
            CellState::Unknown => None,
        };
        update_slot(&mut self.root, key, 0, value);
        true
    }

    /// Classification of the cell containing `p`.
    pub fn cell_state(&self, p: &Point3<f32>) -> CellState {
        let Some(key) = self.key_of(p) else {
            return CellState::Unknown;
        };
        let mut node = match &self.root {
            Some(n) => n,
            None => return CellState::Unknown,
        };
        for depth in 0..TREE_DEPTH {
            if node.is_leaf() {
                break;
            }
            match node.child(child_index(key, depth)) {
                Some(child) => node = child,
                None => return CellState::Unknown,
            }
        }
        CellState::from_log_odds(node.log_odds)
    }

    /// Every leaf, depth first in child order.
    pub fn cells(&self) -> Vec<OccupancyCell> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_leaves([0, 0, 0], 0, self.resolution, &mut out);
        }
        out
    }

    /// Centres of the occupied leaves, plus the free ones unless
    /// `exclude_free` is set.
    pub fn leaf_centers(&self, exclude_free: bool) -> Vec<Point3<f32>> {
        self.cells()
            .into_iter()
            .filter(|c| match c.state {
                CellState::Occupied => true,
                CellState::Free => !exclude_free,
                CellState::Unknown => false,
            })
            .map(|c| c.center)
            .collect()
    }

    /// Encode as an OctoMap binary stream.
    ///
    /// Leaves are written as occupied or free by threshold; inner node values
    /// are implied by their children and not stored.
    pub fn write_binary(&self) -> Vec<u8> {
        let size = match &self.root {
            Some(root) if !root.is_leaf() => root.count(),
            _ => 0,
        };
        let mut out = format!(
            "{BINARY_HEADER}\n\
             # (feel free to add / change comments, but leave the first line as it is!)\n\
             #\n\
             id {TREE_ID}\n\
             size {size}\n\
             res {}\n\
             data\n",
            self.resolution
        )
        .into_bytes();
        if let Some(root) = self.root.as_ref().filter(|_| size > 0) {
            root.write_binary(&mut out);
        }
        out
    }

    /// Finest-level key of `p`, or `None` outside the tree volume.
    fn key_of(&self, p: &Point3<f32>) -> Option<[u16; 3]> {
        let axis = |c: f32| -> Option<u16> {
            // Range-check in f64; NaN and infinities fail the comparison.
            let k = (f64::from(c) / self.resolution).floor() + KEY_ORIGIN as f64;
            (0.0..KEY_RANGE as f64).contains(&k).then_some(k as u16)
        };
        Some([axis(p.x)?, axis(p.y)?, axis(p.z)?])
    }
}

/// Child slot on the path to `key` below a node at `depth`.
fn child_index(key: [u16; 3], depth: u8) -> usize {
    let shift = TREE_DEPTH - 1 - depth;
    let bit = |k: u16| usize::from((k >> shift) & 1);
    bit(key[0]) | (bit(key[1]) << 1) | (bit(key[2]) << 2)
}

fn update_slot(slot: &mut Option<OcNode>, key: [u16; 3], depth: u8, value: Option<f32>) {
    if depth == TREE_DEPTH {
        *slot = value.map(OcNode::leaf);
        return;
    }
    if slot.is_none() && value.is_none() {
        return;
    }
    let node = slot.get_or_insert_with(|| OcNode::inner(empty_children()));
    // A pruned leaf stands for eight identical children.
    let v = node.log_odds;
    let children = node
        .children
        .get_or_insert_with(|| Box::new(std::array::from_fn(|_| Some(OcNode::leaf(v)))));
    update_slot(&mut children[child_index(key, depth)], key, depth + 1, value);

    match max_child_log_odds(children) {
        Some(max) => node.log_odds = max,
        None => *slot = None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OcNode – internal implementation
// ────────────────────────────────────────────────────────────────────────────

type Children = Box<[Option<OcNode>; 8]>;

#[derive(Debug, Clone, PartialEq)]
struct OcNode {
    log_odds: f32,
    /// `None` for a leaf.
    children: Option<Children>,
}

fn empty_children() -> Children {
    Box::new(std::array::from_fn(|_| None))
}

fn max_child_log_odds(children: &[Option<OcNode>; 8]) -> Option<f32> {
    children
        .iter()
        .flatten()
        .map(|c| c.log_odds)
        .reduce(f32::max)
}

impl OcNode {
    fn leaf(log_odds: f32) -> Self {
        Self {
            log_odds,
            children: None,
        }
    }

    /// Inner node whose value is the maximum of its children.
    fn inner(children: Children) -> Self {
        Self {
            log_odds: max_child_log_odds(&children).unwrap_or(CLAMPING_MIN),
            children: Some(children),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children
            .as_ref()
            .is_none_or(|c| c.iter().all(Option::is_none))
    }

    fn child(&self, i: usize) -> Option<&OcNode> {
        self.children.as_ref().and_then(|c| c[i].as_ref())
    }

    fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flat_map(|c| c.iter().flatten())
            .map(OcNode::count)
            .sum::<usize>()
    }

    fn collapse(&mut self) {
        self.log_odds = if self.log_odds >= OCCUPANCY_THRESHOLD {
            CLAMPING_MAX
        } else {
            CLAMPING_MIN
        };
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut().flatten() {
                child.collapse();
            }
        }
    }

    /// `min_key` is the smallest finest-level key inside this node.
    fn collect_leaves(&self, min_key: [u32; 3], depth: u8, res: f64, out: &mut Vec<OccupancyCell>) {
        let span = 1u32 << (TREE_DEPTH - depth);
        if self.is_leaf() {
            let centre = |k: u32| {
                ((f64::from(k) - KEY_ORIGIN as f64 + f64::from(span) / 2.0) * res) as f32
            };
            out.push(OccupancyCell {
                center: Point3::new(centre(min_key[0]), centre(min_key[1]), centre(min_key[2])),
                size: f64::from(span) * res,
                state: CellState::from_log_odds(self.log_odds),
            });
            return;
        }
        let half = span / 2;
        for (i, child) in self.children.iter().flat_map(|c| c.iter().enumerate()) {
            let Some(child) = child else { continue };
            let offset = |axis: usize| if i & (1 << axis) != 0 { half } else { 0 };
            let key = [
                min_key[0] + offset(0),
                min_key[1] + offset(1),
                min_key[2] + offset(2),
            ];
            child.collect_leaves(key, depth + 1, res, out);
        }
    }

    fn write_binary(&self, out: &mut Vec<u8>) {
        let Some(children) = &self.children else {
            out.extend_from_slice(&[0, 0]);
            return;
        };
        let mut bytes = [0u8; 2];
        for (i, child) in children.iter().enumerate() {
            let pair = match child {
                None => 0b00,
                Some(c) if c.children.is_some() => 0b11,
                Some(c) if c.log_odds >= OCCUPANCY_THRESHOLD => 0b10,
                Some(_) => 0b01,
            };
            bytes[i / 4] |= pair << ((i % 4) * 2);
        }
        out.extend_from_slice(&bytes);
        for child in children.iter().flatten() {
            if child.children.is_some() {
                child.write_binary(out);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stream decoding
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Binary,
    Full,
}

#[derive(Debug)]
struct Header {
    format: Format,
    size: usize,
    resolution: f64,
}

/// Split a stream into its header fields and the node data after `data\n`.
fn parse_header(blob: &[u8]) -> Result<(Header, &[u8]), DecodeError> {
    let mut rest = blob;
    let mut next_line = || -> Option<String> {
        if rest.is_empty() {
            return None;
        }
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        let line = String::from_utf8_lossy(&rest[..end]).trim().to_string();
        rest = &rest[(end + 1).min(rest.len())..];
        Some(line)
    };

    let first = next_line().ok_or_else(|| DecodeError::BadHeader("empty stream".into()))?;
    let format = match first.as_str() {
        BINARY_HEADER => Format::Binary,
        FULL_HEADER => Format::Full,
        other => return Err(DecodeError::BadHeader(truncate(other))),
    };

    let mut size = None;
    let mut resolution = None;
    loop {
        let line = next_line().ok_or_else(|| DecodeError::MissingField("data".into()))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, value) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let value = value.trim();
        match keyword {
            "data" => break,
            "id" if value != TREE_ID => {
                return Err(DecodeError::BadHeader(format!("unsupported tree id '{value}'")));
            }
            "id" => {}
            "size" => {
                size = Some(value.parse::<usize>().map_err(|_| {
                    DecodeError::BadHeader(format!("bad size '{}'", truncate(value)))
                })?);
            }
            "res" => {
                resolution = Some(value.parse::<f64>().map_err(|_| {
                    DecodeError::BadHeader(format!("bad res '{}'", truncate(value)))
                })?);
            }
            // Unknown keywords are skipped.
            _ => {}
        }
    }

    let header = Header {
        format,
        size: size.ok_or_else(|| DecodeError::MissingField("size".into()))?,
        resolution: resolution.ok_or_else(|| DecodeError::MissingField("res".into()))?,
    };
    Ok((header, rest))
}

fn truncate(s: &str) -> String {
    s.chars().take(64).collect()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

/// Read the two child-pair bytes of a node at `depth`, recursing into inner
/// children.  Returns `None` when every child is unknown.
fn read_binary_children(
    cursor: &mut Cursor<'_>,
    depth: u8,
    decoded: &mut usize,
) -> Result<Option<Children>, DecodeError> {
    if depth >= TREE_DEPTH {
        return Err(DecodeError::TooDeep(TREE_DEPTH));
    }
    let bytes = cursor.take::<2>()?;
    let mut children = empty_children();
    let mut inner = [false; 8];

    for (i, slot) in children.iter_mut().enumerate() {
        match (bytes[i / 4] >> ((i % 4) * 2)) & 0b11 {
            0b01 => *slot = Some(OcNode::leaf(CLAMPING_MIN)),
            0b10 => *slot = Some(OcNode::leaf(CLAMPING_MAX)),
            0b11 => inner[i] = true,
            _ => continue,
        }
        *decoded += 1;
    }
    for i in (0..8).filter(|&i| inner[i]) {
        children[i] = read_binary_children(cursor, depth + 1, decoded)?.map(OcNode::inner);
    }

    Ok(children.iter().any(Option::is_some).then_some(children))
}

fn read_full_node(
    cursor: &mut Cursor<'_>,
    depth: u8,
    decoded: &mut usize,
) -> Result<OcNode, DecodeError> {
    if depth > TREE_DEPTH {
        return Err(DecodeError::TooDeep(TREE_DEPTH));
    }
    let log_odds = f32::from_le_bytes(cursor.take::<4>()?);
    let [mask] = cursor.take::<1>()?;
    *decoded += 1;

    if mask == 0 {
        return Ok(OcNode::leaf(log_odds));
    }
    let mut children = empty_children();
    for (i, slot) in children.iter_mut().enumerate() {
        if mask & (1 << i) != 0 {
            *slot = Some(read_full_node(cursor, depth + 1, decoded)?);
        }
    }
    Ok(OcNode {
        log_odds,
        children: Some(children),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(first: &str, size: usize, res: &str) -> Vec<u8> {
        format!("{first}\n# comment\nid OcTree\nsize {size}\nres {res}\ndata\n").into_bytes()
    }

    /// Full-format node: log-odds then child mask.
    fn full_node(out: &mut Vec<u8>, log_odds: f32, mask: u8) {
        out.extend_from_slice(&log_odds.to_le_bytes());
        out.push(mask);
    }

    /// A full-format chain from the root down to the finest cell just on the
    /// positive side of the origin, ending in a leaf of `leaf_value`.
    fn full_chain(leaf_value: f32) -> Vec<u8> {
        let mut blob = header(FULL_HEADER, 17, "0.5");
        for depth in 0..TREE_DEPTH {
            // +x+y+z octant first, then always the lowest child.
            let mask = if depth == 0 { 0b1000_0000 } else { 0b0000_0001 };
            full_node(&mut blob, 1.0, mask);
        }
        full_node(&mut blob, leaf_value, 0);
        blob
    }

    fn sample_tree() -> OccupancyOctree {
        let mut tree = OccupancyOctree::new(0.5).unwrap();
        tree.set_cell(&Point3::new(1.2, -0.3, 4.0), CellState::Occupied);
        tree.set_cell(&Point3::new(-3.0, 2.0, 0.1), CellState::Occupied);
        tree.set_cell(&Point3::new(0.1, 0.1, 0.1), CellState::Free);
        tree
    }

    // ── construction / cells ────────────────────────────────────────────────

    #[test]
    fn new_rejects_bad_resolution() {
        assert!(OccupancyOctree::new(0.0).is_err());
        assert!(OccupancyOctree::new(-1.0).is_err());
        assert!(OccupancyOctree::new(f64::NAN).is_err());
    }

    #[test]
    fn empty_tree_is_all_unknown() {
        let tree = OccupancyOctree::new(0.1).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 0);
        assert_eq!(tree.cell_state(&Point3::origin()), CellState::Unknown);
        assert!(tree.cells().is_empty());
    }

    #[test]
    fn set_cell_places_leaf_at_cell_centre() {
        let tree = sample_tree();
        let occupied = tree.leaf_centers(true);
        assert_eq!(occupied.len(), 2);
        assert!(occupied.contains(&Point3::new(1.25, -0.25, 4.25)));
        assert!(occupied.contains(&Point3::new(-2.75, 2.25, 0.25)));

        let all = tree.leaf_centers(false);
        assert_eq!(all.len(), 3);
        assert!(all.contains(&Point3::new(0.25, 0.25, 0.25)));
    }

    #[test]
    fn cell_state_reports_each_class() {
        let tree = sample_tree();
        assert_eq!(tree.cell_state(&Point3::new(1.0, -0.1, 4.4)), CellState::Occupied);
        assert_eq!(tree.cell_state(&Point3::new(0.0, 0.0, 0.0)), CellState::Free);
        assert_eq!(tree.cell_state(&Point3::new(9.0, 9.0, 9.0)), CellState::Unknown);
    }

    #[test]
    fn finest_leaves_have_resolution_size() {
        let tree = sample_tree();
        assert!(tree.cells().iter().all(|c| c.size == 0.5));
    }

    #[test]
    fn unknown_removes_cell_and_prunes_path() {
        let mut tree = OccupancyOctree::new(0.5).unwrap();
        tree.set_cell(&Point3::new(1.0, 1.0, 1.0), CellState::Occupied);
        assert_eq!(tree.node_count(), 17);
        tree.set_cell(&Point3::new(1.0, 1.0, 1.0), CellState::Unknown);
        assert!(tree.is_empty());
    }

    #[test]
    fn set_cell_outside_volume_is_rejected() {
        let mut tree = OccupancyOctree::new(0.001).unwrap();
        // 32768 * 0.001 = 32.768 m half-extent.
        assert!(!tree.set_cell(&Point3::new(40.0, 0.0, 0.0), CellState::Occupied));
        assert!(tree.set_cell(&Point3::new(30.0, 0.0, 0.0), CellState::Occupied));
        assert_eq!(tree.cell_state(&Point3::new(40.0, 0.0, 0.0)), CellState::Unknown);
    }

    #[test]
    fn huge_coordinates_are_outside_volume() {
        let mut tree = OccupancyOctree::new(0.5).unwrap();
        for x in [3.0e38_f32, -3.0e38, f32::MAX, f32::INFINITY, f32::NAN] {
            let p = Point3::new(x, 0.0, 0.0);
            assert!(!tree.set_cell(&p, CellState::Occupied));
            assert_eq!(tree.cell_state(&p), CellState::Unknown);
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn inner_nodes_take_max_of_children() {
        let mut tree = OccupancyOctree::new(0.5).unwrap();
        tree.set_cell(&Point3::new(0.1, 0.1, 0.1), CellState::Free);
        assert_eq!(tree.root.as_ref().unwrap().log_odds, CLAMPING_MIN);
        tree.set_cell(&Point3::new(0.6, 0.1, 0.1), CellState::Occupied);
        assert_eq!(tree.root.as_ref().unwrap().log_odds, CLAMPING_MAX);
    }

    // ── maximum likelihood ──────────────────────────────────────────────────

    #[test]
    fn max_likelihood_snaps_to_clamping_values() {
        let mut tree = OccupancyOctree::read(&full_chain(0.4)).unwrap();
        assert_eq!(tree.root.as_ref().unwrap().log_odds, 1.0);
        tree.to_max_likelihood();
        assert_eq!(tree.root.as_ref().unwrap().log_odds, CLAMPING_MAX);
        assert_eq!(tree.cells()[0].state, CellState::Occupied);

        let mut tree = OccupancyOctree::read(&full_chain(-0.3)).unwrap();
        tree.to_max_likelihood();
        assert_eq!(tree.cells()[0].state, CellState::Free);
    }

    #[test]
    fn threshold_value_counts_as_occupied() {
        let mut tree = OccupancyOctree::read(&full_chain(OCCUPANCY_THRESHOLD)).unwrap();
        tree.to_max_likelihood();
        assert_eq!(tree.cells()[0].state, CellState::Occupied);
    }

    // ── full format ─────────────────────────────────────────────────────────

    #[test]
    fn full_format_decodes_chain() {
        let tree = OccupancyOctree::read(&full_chain(2.0)).unwrap();
        assert_eq!(tree.resolution(), 0.5);
        assert_eq!(tree.node_count(), 17);
        assert_eq!(tree.leaf_centers(true), vec![Point3::new(0.25, 0.25, 0.25)]);
    }

    #[test]
    fn full_format_pruned_leaf_covers_larger_cell() {
        let mut blob = header(FULL_HEADER, 2, "1");
        full_node(&mut blob, 1.0, 0b0000_0001);
        full_node(&mut blob, 1.0, 0);
        let tree = OccupancyOctree::read(&blob).unwrap();
        let cells = tree.cells();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].size, 32768.0);
        assert_eq!(cells[0].center, Point3::new(-16384.0, -16384.0, -16384.0));
        assert_eq!(tree.cell_state(&Point3::new(-1.0, -1.0, -1.0)), CellState::Occupied);
    }

    #[test]
    fn full_format_rejects_too_deep() {
        let mut blob = header(FULL_HEADER, 18, "0.5");
        for _ in 0..=TREE_DEPTH {
            full_node(&mut blob, 1.0, 1);
        }
        full_node(&mut blob, 1.0, 0);
        assert_eq!(
            OccupancyOctree::read(&blob),
            Err(DecodeError::TooDeep(TREE_DEPTH))
        );
    }

    // ── binary format ───────────────────────────────────────────────────────

    #[test]
    fn binary_roundtrip_preserves_cells() {
        let tree = sample_tree();
        let decoded = OccupancyOctree::read(&tree.write_binary()).unwrap();
        assert_eq!(decoded.resolution(), tree.resolution());
        assert_eq!(decoded.node_count(), tree.node_count());
        assert_eq!(decoded.cells(), tree.cells());
    }

    #[test]
    fn binary_pairs_decode_as_free_and_occupied() {
        // Root with child 0 a free leaf and child 1 an occupied leaf.
        let mut blob = header(BINARY_HEADER, 3, "1");
        blob.extend_from_slice(&[0b0000_1001, 0]);
        let tree = OccupancyOctree::read(&blob).unwrap();
        let cells = tree.cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].state, CellState::Free);
        assert_eq!(cells[1].state, CellState::Occupied);
        assert!(cells[1].center.x > 0.0 && cells[1].center.y < 0.0);
    }

    #[test]
    fn empty_binary_tree() {
        let tree = OccupancyOctree::new(0.2).unwrap();
        let blob = tree.write_binary();
        let decoded = OccupancyOctree::read(&blob).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.resolution(), 0.2);
    }

    // ── decode errors ───────────────────────────────────────────────────────

    #[test]
    fn rejects_unknown_header() {
        let err = OccupancyOctree::read(b"not an octree\n").unwrap_err();
        assert!(matches!(err, DecodeError::BadHeader(_)));
        assert!(matches!(
            OccupancyOctree::read(b""),
            Err(DecodeError::BadHeader(_))
        ));
    }

    #[test]
    fn rejects_missing_fields() {
        let blob = format!("{BINARY_HEADER}\nid OcTree\nres 0.1\ndata\n");
        assert_eq!(
            OccupancyOctree::read(blob.as_bytes()),
            Err(DecodeError::MissingField("size".into()))
        );
        let blob = format!("{BINARY_HEADER}\nsize 0\nres 0.1\n");
        assert_eq!(
            OccupancyOctree::read(blob.as_bytes()),
            Err(DecodeError::MissingField("data".into()))
        );
    }

    #[test]
    fn rejects_bad_resolution_in_stream() {
        let blob = header(BINARY_HEADER, 0, "0");
        assert_eq!(
            OccupancyOctree::read(&blob),
            Err(DecodeError::InvalidResolution(0.0))
        );
    }

    #[test]
    fn rejects_truncated_data() {
        let mut blob = sample_tree().write_binary();
        blob.truncate(blob.len() - 3);
        assert!(matches!(
            OccupancyOctree::read(&blob),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut blob = sample_tree().write_binary();
        blob.extend_from_slice(&[0, 0]);
        assert_eq!(
            OccupancyOctree::read(&blob),
            Err(DecodeError::TrailingBytes(2))
        );
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut blob = header(BINARY_HEADER, 5, "1");
        blob.extend_from_slice(&[0b0000_1001, 0]);
        assert_eq!(
            OccupancyOctree::read(&blob),
            Err(DecodeError::SizeMismatch {
                declared: 5,
                decoded: 3
            })
        );
    }

    #[test]
    fn rejects_unsupported_tree_id() {
        let blob = format!("{BINARY_HEADER}\nid ColorOcTree\nsize 0\nres 0.1\ndata\n");
        assert!(matches!(
            OccupancyOctree::read(blob.as_bytes()),
            Err(DecodeError::BadHeader(_))
        ));
    }
}
