use nalgebra::{Point2, Vector2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    /// Orientation in degrees, `-1.0` when not computed.
    pub angle: f64,
    pub response: f64,
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: -1.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response;
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.octave = octave;
        self
    }

    pub fn pt(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

impl Default for KeyPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl FeatureMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matches {
    pub matches: Vec<FeatureMatch>,
}

impl Matches {
    pub fn new() -> Self {
        Self {
            matches: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            matches: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, m: FeatureMatch) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter()
    }

    pub fn filter_by_distance(&mut self, max_distance: f32) {
        self.matches.retain(|m| m.distance <= max_distance);
    }
}

/// A pair of image points believed to show the same scene content.
///
/// `train` lives in the already-placed tile, `query` in the tile being registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub train: Point2<f64>,
    pub query: Point2<f64>,
}

impl Correspondence {
    pub fn new(train: Point2<f64>, query: Point2<f64>) -> Self {
        Self { train, query }
    }

    /// Displacement that maps the query tile onto the train tile.
    pub fn displacement(&self) -> Vector2<f64> {
        self.train - self.query
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyPoints {
    pub keypoints: Vec<KeyPoint>,
}

impl KeyPoints {
    pub fn new() -> Self {
        Self {
            keypoints: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keypoints: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, kp: KeyPoint) {
        self.keypoints.push(kp);
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyPoint> {
        self.keypoints.iter()
    }

    /// Keep the `n` strongest keypoints. Ties are broken by raster order so that
    /// identical image content always yields the identical subset.
    pub fn retain_strongest(&mut self, n: usize) {
        self.keypoints.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
        });
        self.keypoints.truncate(n);
    }
}
