//! Seeded stress majorization for one set of sibling boxes.
//!
//! Used when the layered pass cannot handle a hierarchy. Each container's
//! children are placed independently, so edges crossing a container
//! boundary do not pull on anything here.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FallbackConfig;
use crate::ir::{Dimensions, Position};

const OVERLAP_PASSES: usize = 200;

/// Returns top-left positions, normalized so the smallest x and y are 0.
pub(super) fn place(
    boxes: &[Dimensions],
    edges: &[(usize, usize)],
    config: &FallbackConfig,
    spacing: f32,
) -> Vec<Position> {
    let n = boxes.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![Position::default()];
    }

    let hops = hop_distances(n, edges);
    let ideal = config.ideal_edge_length.max(1.0);
    let spread = ideal * (n as f32).sqrt();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centers: Vec<(f32, f32)> = (0..n)
        .map(|_| (rng.gen_range(0.0..spread), rng.gen_range(0.0..spread)))
        .collect();

    for _ in 0..config.iterations {
        for i in 0..n {
            let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
            for j in 0..n {
                if i == j {
                    continue;
                }
                let target = hops[i][j] * ideal;
                let weight = 1.0 / (target * target);
                let dx = centers[i].0 - centers[j].0;
                let dy = centers[i].1 - centers[j].1;
                let norm = (dx * dx + dy * dy).sqrt().max(1e-3);
                sx += weight * (centers[j].0 + target * dx / norm);
                sy += weight * (centers[j].1 + target * dy / norm);
                sw += weight;
            }
            if sw > 0.0 {
                centers[i] = (sx / sw, sy / sw);
            }
        }
    }

    separate(&mut centers, boxes, spacing);

    let min_x = (0..n)
        .map(|i| centers[i].0 - boxes[i].width / 2.0)
        .fold(f32::INFINITY, f32::min);
    let min_y = (0..n)
        .map(|i| centers[i].1 - boxes[i].height / 2.0)
        .fold(f32::INFINITY, f32::min);
    (0..n)
        .map(|i| {
            Position::new(
                centers[i].0 - boxes[i].width / 2.0 - min_x,
                centers[i].1 - boxes[i].height / 2.0 - min_y,
            )
        })
        .collect()
}

/// Unweighted shortest-path lengths; disconnected pairs sit one hop past
/// the longest finite path.
fn hop_distances(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<f32>> {
    let mut adjacency = vec![Vec::new(); n];
    for &(a, b) in edges {
        if a < n && b < n && a != b {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
    }

    let mut dist = vec![vec![f32::INFINITY; n]; n];
    let mut longest = 1.0f32;
    for start in 0..n {
        let row = &mut dist[start];
        row[start] = 0.0;
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let next = row[current] + 1.0;
            for &neighbor in &adjacency[current] {
                if row[neighbor].is_infinite() {
                    row[neighbor] = next;
                    longest = longest.max(next);
                    queue.push_back(neighbor);
                }
            }
        }
    }
    for row in &mut dist {
        for value in row.iter_mut() {
            if value.is_infinite() {
                *value = longest + 1.0;
            }
        }
    }
    dist
}

/// Pushes overlapping boxes apart along the axis of least overlap.
fn separate(centers: &mut [(f32, f32)], boxes: &[Dimensions], spacing: f32) {
    let n = centers.len();
    for _ in 0..OVERLAP_PASSES {
        let mut moved = false;
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = centers[j].0 - centers[i].0;
                let dy = centers[j].1 - centers[i].1;
                let need_x = (boxes[i].width + boxes[j].width) / 2.0 + spacing - dx.abs();
                let need_y = (boxes[i].height + boxes[j].height) / 2.0 + spacing - dy.abs();
                if need_x <= 0.0 || need_y <= 0.0 {
                    continue;
                }
                moved = true;
                if need_x <= need_y {
                    let push = need_x / 2.0 * if dx < 0.0 { -1.0 } else { 1.0 };
                    centers[i].0 -= push;
                    centers[j].0 += push;
                } else {
                    let push = need_y / 2.0 * if dy < 0.0 { -1.0 } else { 1.0 };
                    centers[i].1 -= push;
                    centers[j].1 += push;
                }
            }
        }
        if !moved {
            break;
        }
    }
}
