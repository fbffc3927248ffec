use crate::{
    error::MdpError,
    model::{Heuristic, Problem},
};
use std::{collections::HashSet, path::Path};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Probability of moving in the intended direction; the remainder is split
/// evenly between the two perpendicular directions.
const INTENDED_PROBABILITY: f64 = 0.8;
const SLIP_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub x: usize,
    pub y: usize,
}

impl GridCell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    fn manhattan_distance(&self, other: &GridCell) -> usize {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum GridAction {
    Up,
    Down,
    Left,
    Right,
}

impl GridAction {
    fn perpendicular(&self) -> [GridAction; 2] {
        match self {
            GridAction::Up | GridAction::Down => [GridAction::Left, GridAction::Right],
            GridAction::Left | GridAction::Right => [GridAction::Up, GridAction::Down],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tile {
    Free,
    Wall,
    Trap,
}

/// A grid world read from an ASCII map:
///
/// * `.` free cell
/// * `x` wall
/// * `S` start (exactly one)
/// * `G` goal (at least one)
/// * `@` trap, a cell with no applicable action
///
/// Every move costs one. Moving into a wall or off the map leaves the agent
/// where it is.
#[derive(Debug, Clone)]
pub struct GridWorld {
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
    start: GridCell,
    goals: HashSet<GridCell>,
    actions: Vec<GridAction>,
}

impl GridWorld {
    pub fn from_map(map: &str) -> Result<Self, MdpError> {
        let mut tiles = vec![];
        let mut start = None;
        let mut goals = HashSet::new();
        let mut width = None;
        let mut height = 0;

        for (line_index, line) in map.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_number = line_index + 1;
            let row_width = line.chars().count();
            match width {
                None => width = Some(row_width),
                Some(width) if width != row_width => {
                    return Err(MdpError::MalformedMap {
                        line: line_number,
                        reason: format!("expected {} columns, found {}", width, row_width),
                    })
                }
                Some(_) => {}
            }
            for (x, c) in line.chars().enumerate() {
                let cell = GridCell::new(x, height);
                let tile = match c {
                    '.' => Tile::Free,
                    'x' => Tile::Wall,
                    '@' => Tile::Trap,
                    'G' => {
                        goals.insert(cell);
                        Tile::Free
                    }
                    'S' => {
                        if start.replace(cell).is_some() {
                            return Err(MdpError::MalformedMap {
                                line: line_number,
                                reason: "more than one start cell".to_string(),
                            });
                        }
                        Tile::Free
                    }
                    other => {
                        return Err(MdpError::MalformedMap {
                            line: line_number,
                            reason: format!("unexpected character {:?}", other),
                        })
                    }
                };
                tiles.push(tile);
            }
            height += 1;
        }

        let start = start.ok_or_else(|| MdpError::MalformedMap {
            line: height,
            reason: "no start cell".to_string(),
        })?;
        if goals.is_empty() {
            return Err(MdpError::MalformedMap {
                line: height,
                reason: "no goal cell".to_string(),
            });
        }

        Ok(Self {
            width: width.unwrap_or(0),
            height,
            tiles,
            start,
            goals,
            actions: GridAction::iter().collect(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, MdpError> {
        let text = std::fs::read_to_string(path).map_err(|e| MdpError::io(path, e))?;
        Self::from_map(&text)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn tile(&self, cell: &GridCell) -> Tile {
        self.tiles[cell.y * self.width + cell.x]
    }

    fn step(&self, cell: &GridCell, direction: GridAction) -> GridCell {
        let next = match direction {
            GridAction::Up if cell.y > 0 => GridCell::new(cell.x, cell.y - 1),
            GridAction::Down if cell.y + 1 < self.height => GridCell::new(cell.x, cell.y + 1),
            GridAction::Left if cell.x > 0 => GridCell::new(cell.x - 1, cell.y),
            GridAction::Right if cell.x + 1 < self.width => GridCell::new(cell.x + 1, cell.y),
            _ => *cell,
        };
        if self.tile(&next) == Tile::Wall {
            *cell
        } else {
            next
        }
    }

    /// Admissible Manhattan-distance heuristic for this map.
    pub fn manhattan_heuristic(&self) -> ManhattanHeuristic {
        ManhattanHeuristic {
            goals: self.goals.iter().copied().collect(),
        }
    }
}

impl Problem for GridWorld {
    type State = GridCell;
    type Action = GridAction;

    fn initial_state(&self) -> GridCell {
        self.start
    }

    fn actions(&self) -> &[GridAction] {
        &self.actions
    }

    fn is_goal(&self, state: &GridCell) -> bool {
        self.goals.contains(state)
    }

    fn applicable(&self, state: &GridCell, _action: &GridAction) -> bool {
        self.tile(state) != Tile::Trap
    }

    fn transition(&self, state: &GridCell, action: &GridAction) -> Vec<(GridCell, f64)> {
        let mut outcomes: Vec<(GridCell, f64)> = vec![];
        let [left, right] = action.perpendicular();
        for (direction, probability) in [
            (*action, INTENDED_PROBABILITY),
            (left, SLIP_PROBABILITY),
            (right, SLIP_PROBABILITY),
        ] {
            let next = self.step(state, direction);
            match outcomes.iter_mut().find(|(cell, _)| *cell == next) {
                Some((_, total)) => *total += probability,
                None => outcomes.push((next, probability)),
            }
        }
        outcomes
    }

    fn cost(&self, _state: &GridCell, _action: &GridAction) -> f64 {
        1.
    }
}

#[derive(Debug, Clone)]
pub struct ManhattanHeuristic {
    goals: Vec<GridCell>,
}

impl Heuristic<GridCell> for ManhattanHeuristic {
    fn evaluate(&self, state: &GridCell) -> f64 {
        self.goals
            .iter()
            .map(|goal| state.manhattan_distance(goal))
            .min()
            .unwrap_or(0) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{OPEN_GRID, TRAP_GRID};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn parses_map() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        assert_eq!(grid.width(), 4);
        assert_eq!(grid.height(), 3);
        assert_eq!(grid.initial_state(), GridCell::new(0, 2));
        assert!(grid.is_goal(&GridCell::new(3, 0)));
        assert_eq!(grid.actions().len(), 4);
        assert_eq!(GridAction::Left.to_string(), "left");
    }

    #[test]
    fn transitions_conserve_probability() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        for x in 0..grid.width() {
            for y in 0..grid.height() {
                let cell = GridCell::new(x, y);
                if grid.tile(&cell) == Tile::Wall {
                    continue;
                }
                for action in grid.actions() {
                    let total: f64 = grid.transition(&cell, action).iter().map(|(_, p)| p).sum();
                    assert_approx_eq!(total, 1.);
                }
            }
        }
    }

    #[test]
    fn bumping_into_corner_merges_outcomes() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        // bottom-left corner moving down: intended and left slip both stay put
        let outcomes = grid.transition(&GridCell::new(0, 2), &GridAction::Down);
        let stay = outcomes
            .iter()
            .find(|(cell, _)| *cell == GridCell::new(0, 2))
            .unwrap();
        assert_approx_eq!(stay.1, 0.9);
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn traps_have_no_applicable_action() {
        let grid = GridWorld::from_map(TRAP_GRID).unwrap();
        let trap = GridCell::new(1, 0);
        assert!(grid
            .actions()
            .iter()
            .all(|action| !grid.applicable(&trap, action)));
    }

    #[test]
    fn malformed_maps_are_rejected() {
        assert!(matches!(
            GridWorld::from_map("S.\n..G\n"),
            Err(MdpError::MalformedMap { line: 2, .. })
        ));
        assert!(matches!(
            GridWorld::from_map("S?G"),
            Err(MdpError::MalformedMap { line: 1, .. })
        ));
        assert!(GridWorld::from_map("S..").is_err());
        assert!(GridWorld::from_map("..G").is_err());
    }

    #[test]
    fn manhattan_heuristic_is_distance_to_nearest_goal() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let heuristic = grid.manhattan_heuristic();
        assert_eq!(heuristic.evaluate(&GridCell::new(0, 2)), 5.);
        assert_eq!(heuristic.evaluate(&GridCell::new(3, 0)), 0.);
    }

    #[test]
    fn reads_map_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, OPEN_GRID.as_bytes()).unwrap();
        let grid = GridWorld::from_path(file.path()).unwrap();
        assert_eq!(grid.height(), 3);
    }
}
