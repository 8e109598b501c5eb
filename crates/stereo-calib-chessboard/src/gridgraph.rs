use crate::geom::{axis_diff, is_orthogonal};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::f32::consts::FRAC_PI_4;
use stereo_calib_core::Corner;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    /// Lattice step `(di, dj)` for this direction.
    pub fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
}

/// Image-space direction of the dominant axis of `v`.
fn direction_of(v: &Vector2<f32>) -> NeighborDirection {
    match (v.x.abs() > v.y.abs(), v.x >= 0.0, v.y >= 0.0) {
        (true, true, _) => NeighborDirection::Right,
        (true, false, _) => NeighborDirection::Left,
        (false, _, true) => NeighborDirection::Down,
        (false, _, false) => NeighborDirection::Up,
    }
}

/// Lattice edge from `a` to `b`, if any.
///
/// Adjacent inner corners have swapped diagonals, and the edge between them
/// runs at 45° to both.
fn lattice_edge(
    a: &Corner,
    b: &Corner,
    index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(a.orientation, b.orientation, tol) {
        return None;
    }
    let v = b.position - a.position;
    let distance = v.norm();
    if !(params.min_spacing_pix..=params.max_spacing_pix).contains(&distance) {
        return None;
    }
    let edge = v.y.atan2(v.x);
    let off_diagonal = |orientation: f32| (axis_diff(orientation, edge) - FRAC_PI_4).abs();
    if off_diagonal(a.orientation) > tol || off_diagonal(b.orientation) > tol {
        return None;
    }
    Some(NodeNeighbor {
        direction: direction_of(&v),
        index,
        distance,
    })
}

/// Per-corner lattice neighbours, at most one per direction.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

/// Median distance from each corner to its nearest other corner.
pub fn median_nearest_spacing(corners: &[Corner]) -> Option<f32> {
    if corners.len() < 2 {
        return None;
    }
    let coords = corners
        .iter()
        .map(|c| [c.position.x, c.position.y])
        .collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();
    let mut dists: Vec<f32> = coords
        .iter()
        .filter_map(|q| {
            tree.nearest_n::<SquaredEuclidean>(q, 2)
                .into_iter()
                .map(|nn| nn.distance)
                .find(|&d| d > 0.0)
                .map(f32::sqrt)
        })
        .collect();
    if dists.is_empty() {
        return None;
    }
    dists.sort_by(|a, b| a.total_cmp(b));
    Some(dists[dists.len() / 2])
}

/// Components reachable along neighbour links, in discovery order.
pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut seen = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();
    for start in 0..graph.neighbors.len() {
        if std::mem::replace(&mut seen[start], true) {
            continue;
        }
        let mut component = vec![start];
        let mut next = 0;
        while let Some(&node) = component.get(next) {
            next += 1;
            for nb in &graph.neighbors[node] {
                if !std::mem::replace(&mut seen[nb.index], true) {
                    component.push(nb.index);
                }
            }
        }
        components.push(component);
    }
    components
}

/// BFS over a component, giving each node integer lattice coordinates
/// `(node, i, j)` relative to the first node.
pub fn assign_grid_coordinates(graph: &GridGraph, component: &[usize]) -> Vec<(usize, i32, i32)> {
    let mut coords = Vec::new();
    let Some(&start) = component.first() else {
        return coords;
    };
    let mut visited = vec![false; graph.neighbors.len()];
    let mut queue = std::collections::VecDeque::new();

    queue.push_back((start, 0, 0)); // (node index, i, j)

    while let Some((node_idx, i, j)) = queue.pop_front() {
        if visited[node_idx] {
            continue;
        }
        visited[node_idx] = true;
        coords.push((node_idx, i, j));

        for neighbor in &graph.neighbors[node_idx] {
            let (di, dj) = neighbor.direction.step();
            queue.push_back((neighbor.index, i + di, j + dj));
        }
    }

    coords
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: GridGraphParams) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let neighbors = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                // Candidates arrive nearest first, so the first hit per direction wins.
                let mut best: [Option<NodeNeighbor>; 4] = [None; 4];
                for nn in tree.nearest_n::<SquaredEuclidean>(&query, params.k_neighbors) {
                    let j = nn.item as usize;
                    if j == i {
                        continue;
                    }
                    if let Some(edge) = lattice_edge(corner, &corners[j], j, &params) {
                        best[edge.direction as usize].get_or_insert(edge);
                    }
                }
                best.into_iter().flatten().collect()
            })
            .collect();

        Self { neighbors }
    }
}
