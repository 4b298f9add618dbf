use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a tile in the acquisition grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub row: i32,
    pub col: i32,
}

impl GridCoord {
    pub const ORIGIN: GridCoord = GridCoord { row: 0, col: 0 };

    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// The coordinate `(d_row, d_col)` away, `None` when it leaves the `i32`
    /// grid.
    pub fn offset(&self, d_row: i32, d_col: i32) -> Option<Self> {
        Some(Self::new(
            self.row.checked_add(d_row)?,
            self.col.checked_add(d_col)?,
        ))
    }

    pub fn step(&self, direction: Direction) -> Option<Self> {
        let (d_row, d_col) = direction.delta();
        self.offset(d_row, d_col)
    }

    /// The 4-neighbourhood in a fixed order: left, right, top, bottom.
    /// Neighbours outside the representable grid are left out.
    pub fn neighbors4(&self) -> Vec<(GridCoord, Direction)> {
        Direction::ALL
            .into_iter()
            .filter_map(|d| Some((self.step(d)?, d)))
            .collect()
    }

    /// The diagonal neighbours that exist.
    pub fn diagonals(&self) -> Vec<GridCoord> {
        [(-1, -1), (-1, 1), (1, -1), (1, 1)]
            .into_iter()
            .filter_map(|(dr, dc)| self.offset(dr, dc))
            .collect()
    }

    /// Direction from `self` toward a 4-adjacent `other`.
    pub fn direction_to(&self, other: &GridCoord) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|d| self.step(*d) == Some(*other))
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Direction from a placed tile toward its grid neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Top,
        Direction::Bottom,
    ];

    /// `(d_row, d_col)` step in grid space.
    pub fn delta(&self) -> (i32, i32) {
        match self {
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
            Direction::Top => (-1, 0),
            Direction::Bottom => (1, 0),
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Top => Direction::Bottom,
            Direction::Bottom => Direction::Top,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Top => "top",
            Direction::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
