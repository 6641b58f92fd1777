use glam::Vec3;
use terrastream_common::Aabb;

use crate::MeshData;

const LEAF_MAX: usize = 4;
const BARY_EPSILON: f32 = 1e-5;

/// Bounding-volume hierarchy over a mesh's triangles.
///
/// Owns a reordered copy of the triangle corners so queries never need the
/// source mesh. Built once per tile load and dropped on eviction.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    triangles: Vec<[Vec3; 3]>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf { bounds: Aabb, start: usize, count: usize },
    Internal { bounds: Aabb, left: usize, right: usize },
}

impl Node {
    fn bounds(&self) -> &Aabb {
        match self {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => bounds,
        }
    }
}

/// Closest ray intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

impl Bvh {
    pub fn build(mesh: &MeshData) -> Self {
        let mut triangles: Vec<[Vec3; 3]> = mesh.triangles().collect();
        let mut nodes = Vec::new();
        if !triangles.is_empty() {
            let len = triangles.len();
            build_node(&mut nodes, &mut triangles, 0, len);
        }
        Self { nodes, triangles }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| *n.bounds()).unwrap_or(Aabb::EMPTY)
    }

    /// Approximate heap footprint, for resource accounting.
    pub fn byte_size(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<Node>()
            + self.triangles.len() * std::mem::size_of::<[Vec3; 3]>()
    }

    /// Closest triangle hit along `origin + t * dir` for `t` in `[0, t_max]`.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, t_max: f32) -> Option<RayHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<(f32, usize)> = None;
        let mut stack = vec![0usize];

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            let limit = best.map_or(t_max, |(t, _)| t);
            if node.bounds().ray_entry(origin, dir, limit).is_none() {
                continue;
            }
            match *node {
                Node::Leaf { start, count, .. } => {
                    for tri in start..start + count {
                        if let Some(t) = intersect_triangle(origin, dir, &self.triangles[tri]) {
                            if t <= best.map_or(t_max, |(b, _)| b) {
                                best = Some((t, tri));
                            }
                        }
                    }
                }
                Node::Internal { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }

        best.map(|(t, tri)| {
            let [a, b, c] = self.triangles[tri];
            RayHit {
                distance: t,
                point: origin + dir * t,
                normal: (b - a).cross(c - a).normalize_or_zero(),
            }
        })
    }

    /// Height of the surface under the tile-local point `(x, y)`, found by
    /// casting straight down from above the hierarchy's bounds.
    pub fn height_at(&self, x: f32, y: f32) -> Option<f32> {
        let bounds = self.bounds();
        if bounds.is_empty() {
            return None;
        }
        let top = bounds.max.z + 1.0;
        let span = top - bounds.min.z + 1.0;
        self.raycast(Vec3::new(x, y, top), Vec3::NEG_Z, span)
            .map(|hit| hit.point.z)
    }
}

fn build_node(
    nodes: &mut Vec<Node>,
    triangles: &mut [[Vec3; 3]],
    start: usize,
    end: usize,
) -> usize {
    let slice = &mut triangles[start..end];
    let bounds = Aabb::from_points(slice.as_flattened());

    let idx = nodes.len();
    if slice.len() <= LEAF_MAX {
        nodes.push(Node::Leaf {
            bounds,
            start,
            count: slice.len(),
        });
        return idx;
    }

    let axis = split_axis(&bounds);
    slice.sort_by(|a, b| centroid(a)[axis].total_cmp(&centroid(b)[axis]));

    // Placeholder; patched once both children exist.
    nodes.push(Node::Leaf {
        bounds,
        start,
        count: 0,
    });
    let mid = start + (end - start) / 2;
    let left = build_node(nodes, triangles, start, mid);
    let right = build_node(nodes, triangles, mid, end);
    nodes[idx] = Node::Internal {
        bounds: nodes[left].bounds().union(*nodes[right].bounds()),
        left,
        right,
    };
    idx
}

fn centroid(tri: &[Vec3; 3]) -> Vec3 {
    (tri[0] + tri[1] + tri[2]) / 3.0
}

fn split_axis(bounds: &Aabb) -> usize {
    let e = bounds.extent();
    // Prefer X, then Y, then Z on ties.
    if e.x >= e.y && e.x >= e.z {
        0
    } else if e.y >= e.z {
        1
    } else {
        2
    }
}

/// Möller–Trumbore, two-sided. Returns the ray parameter of the hit.
fn intersect_triangle(origin: Vec3, dir: Vec3, tri: &[Vec3; 3]) -> Option<f32> {
    let [a, b, c] = *tri;
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < f32::EPSILON {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(-BARY_EPSILON..=1.0 + BARY_EPSILON).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < -BARY_EPSILON || u + v > 1.0 + BARY_EPSILON {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t >= 0.0).then_some(t)
}
