use crate::feature_index::{Crop, FeatureIndex};
use crate::offset::{Offset, OffsetEstimate, OffsetEstimator};
use crate::tile_store::{Tile, TileStore};
use crate::{Adjacency, MatchStrategy, Result, StitchError};
use mosaic_core::GridCoord;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info};

/// How one estimation attempt was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Edge,
    Full,
    Nominal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub method: Method,
    pub inliers: usize,
    pub accepted: bool,
}

/// Result of registering one neighbour against one placed tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    pub offset: Option<Offset>,
    pub attempts: Vec<Attempt>,
}

impl Registration {
    fn record(&mut self, method: Method, estimate: OffsetEstimate) {
        self.attempts.push(Attempt {
            method,
            inliers: estimate.inliers(),
            accepted: estimate.offset().is_some(),
        });
        if self.offset.is_none() {
            self.offset = estimate.offset();
        }
    }
}

/// Capability: estimate where `neighbour` sits relative to `placed`.
pub trait PairRegistrar: Sync {
    fn register(&self, placed: &Tile, neighbour: &Tile) -> Registration;
}

/// Registration from image content through a [`FeatureIndex`].
pub struct FeatureRegistrar<'a> {
    index: &'a FeatureIndex,
    estimator: OffsetEstimator,
    strategy: MatchStrategy,
}

impl<'a> FeatureRegistrar<'a> {
    pub fn new(index: &'a FeatureIndex, estimator: OffsetEstimator, strategy: MatchStrategy) -> Self {
        Self {
            index,
            estimator,
            strategy,
        }
    }

    /// Crops the propagation will ask for under this strategy.
    pub fn crops(&self, adjacency: Adjacency) -> Vec<Crop> {
        match self.strategy {
            MatchStrategy::EdgeOnly if adjacency == Adjacency::Four => {
                vec![Crop::Left, Crop::Right, Crop::Top, Crop::Bottom]
            }
            MatchStrategy::FullOnly | MatchStrategy::Nominal => vec![Crop::Full],
            _ => Crop::ALL.to_vec(),
        }
    }

    fn edge(&self, placed: &Tile, neighbour: &Tile, crop_t: Crop, crop_n: Crop) -> OffsetEstimate {
        let overlap = self.index.overlap_px();
        let a = self.index.features(placed, crop_t);
        let b = self.index.features(neighbour, crop_n);
        let (ax, ay) = crop_t.origin(placed.width(), placed.height(), overlap);
        let (bx, by) = crop_n.origin(neighbour.width(), neighbour.height(), overlap);
        let correction = Vector2::new(ax as f64 - bx as f64, ay as f64 - by as f64);
        self.estimator.estimate(&a, &b, correction)
    }

    fn full(&self, placed: &Tile, neighbour: &Tile) -> OffsetEstimate {
        let a = self.index.features(placed, Crop::Full);
        let b = self.index.features(neighbour, Crop::Full);
        self.estimator.estimate(&a, &b, Vector2::zeros())
    }
}

impl PairRegistrar for FeatureRegistrar<'_> {
    fn register(&self, placed: &Tile, neighbour: &Tile) -> Registration {
        let mut reg = Registration::default();
        let direction = placed.coord().direction_to(&neighbour.coord());

        let try_edge = matches!(
            self.strategy,
            MatchStrategy::EdgeThenFull | MatchStrategy::EdgeOnly
        );
        if let (true, Some(direction)) = (try_edge, direction) {
            let (crop_t, crop_n) = Crop::band_pair(direction);
            reg.record(Method::Edge, self.edge(placed, neighbour, crop_t, crop_n));
            if reg.offset.is_some() {
                return reg;
            }
        }

        // diagonal neighbours share no band, they always fall through to full
        let try_full = match self.strategy {
            MatchStrategy::EdgeThenFull | MatchStrategy::FullOnly => true,
            MatchStrategy::EdgeOnly => direction.is_none(),
            MatchStrategy::Nominal => false,
        };
        if try_full {
            reg.record(Method::Full, self.full(placed, neighbour));
        }
        reg
    }
}

/// Registration-free placement on the nominal grid step
/// `((w - overlap) * d_col, (h - overlap) * d_row)`.
pub struct NominalRegistrar {
    overlap_px: u32,
}

impl NominalRegistrar {
    pub fn new(overlap_px: u32) -> Self {
        Self { overlap_px }
    }
}

impl PairRegistrar for NominalRegistrar {
    fn register(&self, placed: &Tile, neighbour: &Tile) -> Registration {
        let d_row = (neighbour.coord().row - placed.coord().row) as f64;
        let d_col = (neighbour.coord().col - placed.coord().col) as f64;
        let step_x = placed.width() as f64 - self.overlap_px as f64;
        let step_y = placed.height() as f64 - self.overlap_px as f64;
        let offset = Offset {
            dx: step_x * d_col,
            dy: step_y * d_row,
            inliers: 0,
        };
        Registration {
            offset: Some(offset),
            attempts: vec![Attempt {
                method: Method::Nominal,
                inliers: 0,
                accepted: true,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Unvisited,
    Queued,
    Placed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub coord: GridCoord,
    pub state: TileState,
    pub position: Option<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: GridCoord,
    pub to: GridCoord,
    pub attempts: Vec<Attempt>,
    pub offset: Option<Offset>,
}

/// What the breadth-first walk did: final state of every tile and every
/// attempted edge in the order it was tried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub tiles: Vec<TileRecord>,
    pub edges: Vec<EdgeRecord>,
    pub elapsed_secs: f64,
}

impl PropagationReport {
    pub fn placed_count(&self) -> usize {
        self.tiles
            .iter()
            .filter(|t| t.state == TileState::Placed)
            .count()
    }

    pub fn unvisited(&self) -> impl Iterator<Item = GridCoord> + '_ {
        self.tiles
            .iter()
            .filter(|t| t.state == TileState::Unvisited)
            .map(|t| t.coord)
    }
}

/// Visit state of every stored coordinate. Slots follow the sorted coordinate
/// list, so memory tracks the tile count however sparse the grid is.
struct StateGrid {
    coords: Vec<GridCoord>,
    states: Vec<TileState>,
}

impl StateGrid {
    fn new(coords: &[GridCoord]) -> Self {
        let mut coords = coords.to_vec();
        coords.sort();
        coords.dedup();
        let states = vec![TileState::Unvisited; coords.len()];
        Self { coords, states }
    }

    fn index(&self, c: &GridCoord) -> Option<usize> {
        self.coords.binary_search(c).ok()
    }

    fn get(&self, c: &GridCoord) -> Option<TileState> {
        self.index(c).map(|i| self.states[i])
    }

    fn set(&mut self, c: &GridCoord, state: TileState) {
        if let Some(i) = self.index(c) {
            self.states[i] = state;
        }
    }
}

/// Breadth-first placement of tiles from the origin.
///
/// Each tile is placed from the first already-placed neighbour that yields an
/// offset; later candidate estimates are never computed or reconciled.
pub struct PositionPropagator {
    adjacency: Adjacency,
}

impl PositionPropagator {
    pub fn new(adjacency: Adjacency) -> Self {
        Self { adjacency }
    }

    fn neighbours(&self, c: GridCoord) -> Vec<GridCoord> {
        let mut out: Vec<GridCoord> = c.neighbors4().into_iter().map(|(n, _)| n).collect();
        if self.adjacency == Adjacency::Eight {
            out.extend(c.diagonals());
        }
        out
    }

    pub fn propagate(&self, store: &mut TileStore, registrar: &dyn PairRegistrar) -> Result<PropagationReport> {
        let _span = tracing::info_span!("propagate", tiles = store.len()).entered();
        let start = Instant::now();

        if !store.contains(&GridCoord::ORIGIN) {
            return Err(StitchError::MissingOrigin);
        }

        let coords = store.coords();
        let mut grid = StateGrid::new(&coords);
        let mut edges = Vec::new();
        let mut queue = VecDeque::new();

        store.place(&GridCoord::ORIGIN, Point2::origin())?;
        grid.set(&GridCoord::ORIGIN, TileState::Queued);
        queue.push_back(GridCoord::ORIGIN);

        while let Some(t) = queue.pop_front() {
            grid.set(&t, TileState::Placed);

            for n in self.neighbours(t) {
                if grid.get(&n) != Some(TileState::Unvisited) || !store.contains(&n) {
                    continue;
                }

                let (registration, position) = {
                    let (Some(placed), Some(neighbour)) = (store.get(&t), store.get(&n)) else {
                        continue;
                    };
                    let Some(base) = placed.position() else {
                        continue;
                    };
                    let reg = registrar.register(placed, neighbour);
                    let pos = reg.offset.map(|o| base + o.vector());
                    (reg, pos)
                };

                match position {
                    Some(p) => {
                        store.place(&n, p)?;
                        grid.set(&n, TileState::Queued);
                        queue.push_back(n);
                        debug!(from = %t, to = %n, x = p.x, y = p.y, "tile placed");
                    }
                    None => {
                        debug!(from = %t, to = %n, attempts = ?registration.attempts, "no estimate");
                    }
                }

                edges.push(EdgeRecord {
                    from: t,
                    to: n,
                    attempts: registration.attempts,
                    offset: registration.offset,
                });
            }
        }

        let tiles: Vec<TileRecord> = coords
            .iter()
            .map(|c| TileRecord {
                coord: *c,
                state: grid.get(c).unwrap_or(TileState::Unvisited),
                position: store.get(c).and_then(|t| t.position()).map(|p| [p.x, p.y]),
            })
            .collect();

        let report = PropagationReport {
            tiles,
            edges,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            placed = report.placed_count(),
            total = store.len(),
            edges = report.edges.len(),
            "propagation finished"
        );
        Ok(report)
    }
}
