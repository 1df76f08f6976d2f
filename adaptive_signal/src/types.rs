// src/types.rs
//
// Core intersection vocabulary: approaches, axes, signal phases, actions.

use serde::{Deserialize, Serialize};

/// Number of approaches at the intersection.
pub const NUM_APPROACHES: usize = 4;

/// Per-approach counters, indexed by `Approach::index()`.
pub type PerApproach<T> = [T; NUM_APPROACHES];

/// One of the four intersection approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Approach {
    North,
    South,
    East,
    West,
}

impl Approach {
    pub const ALL: [Approach; NUM_APPROACHES] =
        [Approach::North, Approach::South, Approach::East, Approach::West];

    /// Stable index into `PerApproach` arrays.
    pub fn index(self) -> usize {
        match self {
            Approach::North => 0,
            Approach::South => 1,
            Approach::East => 2,
            Approach::West => 3,
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            Approach::North | Approach::South => Axis::NorthSouth,
            Approach::East | Approach::West => Axis::EastWest,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Approach::North => "N",
            Approach::South => "S",
            Approach::East => "E",
            Approach::West => "W",
        }
    }
}

/// A pair of opposing approaches that move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    NorthSouth,
    EastWest,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::NorthSouth => Axis::EastWest,
            Axis::EastWest => Axis::NorthSouth,
        }
    }

    /// The two approaches released when this axis is green.
    pub fn approaches(self) -> [Approach; 2] {
        match self {
            Axis::NorthSouth => [Approach::North, Approach::South],
            Axis::EastWest => [Approach::East, Approach::West],
        }
    }
}

/// Signal phase. Exactly one is active at any tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    NsGreen,
    NsYellow,
    EwGreen,
    EwYellow,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::NsGreen,
        Phase::NsYellow,
        Phase::EwGreen,
        Phase::EwYellow,
    ];

    pub fn index(self) -> usize {
        match self {
            Phase::NsGreen => 0,
            Phase::NsYellow => 1,
            Phase::EwGreen => 2,
            Phase::EwYellow => 3,
        }
    }

    /// Axis this phase belongs to (the axis being served or cleared).
    pub fn axis(self) -> Axis {
        match self {
            Phase::NsGreen | Phase::NsYellow => Axis::NorthSouth,
            Phase::EwGreen | Phase::EwYellow => Axis::EastWest,
        }
    }

    pub fn is_green(self) -> bool {
        matches!(self, Phase::NsGreen | Phase::EwGreen)
    }

    pub fn is_yellow(self) -> bool {
        !self.is_green()
    }

    pub fn green_of(axis: Axis) -> Phase {
        match axis {
            Axis::NorthSouth => Phase::NsGreen,
            Axis::EastWest => Phase::EwGreen,
        }
    }

    pub fn yellow_of(axis: Axis) -> Phase {
        match axis {
            Axis::NorthSouth => Phase::NsYellow,
            Axis::EastWest => Phase::EwYellow,
        }
    }
}

/// Number of actions in the action set.
pub const NUM_ACTIONS: usize = 2;

/// Agent decision at one epoch.
///
/// `Extend` keeps the current green for one more tick; `Switch` ends it and
/// starts the yellow clearance of the current axis. The green duration is the
/// run of `Extend` decisions, so direction and duration are one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    Extend,
    Switch,
}

impl Action {
    pub const ALL: [Action; NUM_ACTIONS] = [Action::Extend, Action::Switch];

    pub fn index(self) -> usize {
        match self {
            Action::Extend => 0,
            Action::Switch => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    /// Actions the agent may choose in `phase`. Yellow is not agent-controlled.
    pub fn valid_for(phase: Phase) -> &'static [Action] {
        if phase.is_green() {
            &Action::ALL
        } else {
            &[Action::Extend]
        }
    }
}
