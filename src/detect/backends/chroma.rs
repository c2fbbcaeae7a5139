//! Sliding-window red-region detector.
//!
//! Works like a single-stage cascade over a colour mask: every window of the search
//! pyramid whose target-pixel fill reaches the model's `fill_ratio` is a raw hit, and
//! overlapping hits are grouped. A group is reported only when more than
//! `min_neighbors` hits support it, which suppresses isolated false positives.

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::model::ChromaModel;
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::BYTES_PER_PIXEL;

/// Relative tolerance for treating two hits as the same object.
const GROUP_EPS: f64 = 0.2;

pub struct ChromaBackend {
    model: ChromaModel,
    scale_factor: f64,
    min_neighbors: u32,
}

impl ChromaBackend {
    pub fn new(model: ChromaModel, scale_factor: f64, min_neighbors: u32) -> Result<Self> {
        model.validate()?;
        if !scale_factor.is_finite() || scale_factor <= 1.0 {
            return Err(anyhow!("scale_factor must be greater than 1.0"));
        }
        Ok(Self {
            model,
            scale_factor,
            min_neighbors,
        })
    }

    fn scan(&self, mask: &MaskIntegral) -> Vec<BoundingBox> {
        let mut hits = Vec::new();
        let limit = mask.width.min(mask.height);
        let mut size = self.model.base_window as f64;
        let mut last_side = 0;

        loop {
            // Small scale factors can round to the same side twice; scan each side once.
            let side = (size.round() as u32).max(last_side + 1);
            if side > limit {
                break;
            }
            last_side = side;
            size = size.max(side as f64);
            let step = (side / 8).max(1);
            let area = side as f64 * side as f64;
            let threshold = ((self.model.fill_ratio as f64 * area).ceil() as u32).max(1);

            let mut y = 0;
            while y + side <= mask.height {
                let mut x = 0;
                while x + side <= mask.width {
                    if mask.count(x, y, side) >= threshold {
                        hits.push(BoundingBox::new(x, y, side, side));
                    }
                    x += step;
                }
                y += step;
            }
            size *= self.scale_factor;
        }
        hits
    }
}

impl DetectorBackend for ChromaBackend {
    fn name(&self) -> &'static str {
        "chroma"
    }

    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        if width == 0 || height == 0 {
            return Err(anyhow!("chroma backend got an empty {}x{} frame", width, height));
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(anyhow!(
                "chroma backend expected {} bytes for {}x{} RGB24, got {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let mask = MaskIntegral::build(pixels, width, height, &self.model);
        if mask.total() == 0 {
            return Ok(DetectionResult::none());
        }
        let hits = self.scan(&mask);
        Ok(DetectionResult::from_boxes(group_hits(
            &hits,
            self.min_neighbors,
        )))
    }
}

// ----------------------------------------------------------------------------
// Integral image over the target-colour mask
// ----------------------------------------------------------------------------

struct MaskIntegral {
    width: u32,
    height: u32,
    /// (width + 1) x (height + 1) prefix sums.
    sums: Vec<u32>,
}

impl MaskIntegral {
    fn build(pixels: &[u8], width: u32, height: u32, model: &ChromaModel) -> Self {
        let stride = width as usize + 1;
        let mut sums = vec![0u32; stride * (height as usize + 1)];
        for (row, line) in pixels
            .chunks_exact(width as usize * BYTES_PER_PIXEL)
            .enumerate()
        {
            let mut running = 0u32;
            for (col, px) in line.chunks_exact(BYTES_PER_PIXEL).enumerate() {
                if model.is_target(px[0], px[1], px[2]) {
                    running += 1;
                }
                sums[(row + 1) * stride + col + 1] = sums[row * stride + col + 1] + running;
            }
        }
        Self {
            width,
            height,
            sums,
        }
    }

    fn at(&self, x: u32, y: u32) -> u32 {
        self.sums[y as usize * (self.width as usize + 1) + x as usize]
    }

    /// Target pixels inside the `side` x `side` window at (x, y).
    fn count(&self, x: u32, y: u32, side: u32) -> u32 {
        let (x1, y1) = (x + side, y + side);
        self.at(x1, y1) + self.at(x, y) - self.at(x1, y) - self.at(x, y1)
    }

    fn total(&self) -> u32 {
        self.at(self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// Hit grouping
// ----------------------------------------------------------------------------

fn similar(a: &BoundingBox, b: &BoundingBox) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Member count and coordinate sums of one group of similar hits.
#[derive(Default)]
struct Cluster {
    count: u64,
    sums: [u64; 4],
}

impl Cluster {
    fn add(&mut self, hit: &BoundingBox) {
        self.count += 1;
        self.sums[0] += hit.x as u64;
        self.sums[1] += hit.y as u64;
        self.sums[2] += hit.width as u64;
        self.sums[3] += hit.height as u64;
    }

    fn average(&self) -> BoundingBox {
        let avg = |sum: u64| ((sum + self.count / 2) / self.count) as u32;
        BoundingBox::new(
            avg(self.sums[0]),
            avg(self.sums[1]),
            avg(self.sums[2]),
            avg(self.sums[3]),
        )
    }
}

/// Cluster similar hits and average each cluster with more than `min_neighbors` members.
fn group_hits(hits: &[BoundingBox], min_neighbors: u32) -> Vec<BoundingBox> {
    let mut parent: Vec<usize> = (0..hits.len()).collect();

    // Similar boxes differ in x by at most GROUP_EPS * width, so a sweep over
    // x-sorted hits only needs to look that far ahead.
    let mut order: Vec<usize> = (0..hits.len()).collect();
    order.sort_by_key(|&i| hits[i].x);
    for (pos, &i) in order.iter().enumerate() {
        let reach = hits[i].x as f64 + GROUP_EPS * hits[i].width as f64;
        for &j in &order[pos + 1..] {
            if hits[j].x as f64 > reach {
                break;
            }
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut slot_of_root = vec![usize::MAX; hits.len()];
    for (i, hit) in hits.iter().enumerate() {
        let root = find(&mut parent, i);
        if slot_of_root[root] == usize::MAX {
            slot_of_root[root] = clusters.len();
            clusters.push(Cluster::default());
        }
        clusters[slot_of_root[root]].add(hit);
    }

    clusters
        .into_iter()
        .filter(|cluster| cluster.count > min_neighbors as u64)
        .map(|cluster| cluster.average())
        .collect()
}
