use std::collections::HashSet;

use crate::models::geometry::Point3;

/// Upper bound on accumulated map points; bounds the live payload, not the map.
pub const MAX_MAP_POINTS: usize = 5000;

/// Running, deduplicated 3-D map for one job.
///
/// Points are deduplicated on their coordinates rounded to 3 decimal places;
/// the first unrounded observation of each rounded position is kept.
#[derive(Debug, Clone)]
pub struct MapAccumulator {
    points: Vec<Point3>,
    seen: HashSet<(i64, i64, i64)>,
    limit: usize,
}

impl Default for MapAccumulator {
    fn default() -> Self {
        Self::with_limit(MAX_MAP_POINTS)
    }
}

impl MapAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            points: Vec::new(),
            seen: HashSet::new(),
            limit,
        }
    }

    /// Add a frame's tracked points, returning how many were new.
    ///
    /// Stops as soon as the limit is reached; the rest of the frame is dropped.
    pub fn extend<'a, I>(&mut self, observed: I) -> usize
    where
        I: IntoIterator<Item = &'a Point3>,
    {
        let mut added = 0;
        for point in observed {
            if self.is_full() {
                break;
            }
            // Points without a rounded key (non-finite or absurdly far) are skipped.
            let Some(key) = point.rounded_key() else {
                continue;
            };
            if self.seen.insert(key) {
                self.points.push(*point);
                added += 1;
            }
        }
        added
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.points.len() >= self.limit
    }
}
