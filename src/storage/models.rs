use serde::{Deserialize, Serialize};

/// Column value of a black seat nobody has taken yet
pub const OPEN_SEAT: i64 = -1;
/// Column value of a black seat played by the automated opponent
pub const AUTOMATED_SEAT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerColor {
    White,
    Black,
}

impl PlayerColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerColor::White => "white",
            PlayerColor::Black => "black",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PlayerColor::White => PlayerColor::Black,
            PlayerColor::Black => PlayerColor::White,
        }
    }
}

impl std::fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupant of the black side of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    Open,
    Automated,
    Player(i64),
}

impl Seat {
    pub fn from_column(value: i64) -> Self {
        match value {
            OPEN_SEAT => Seat::Open,
            AUTOMATED_SEAT => Seat::Automated,
            id => Seat::Player(id),
        }
    }

    pub fn to_column(self) -> i64 {
        match self {
            Seat::Open => OPEN_SEAT,
            Seat::Automated => AUTOMATED_SEAT,
            Seat::Player(id) => id,
        }
    }

    pub fn player_id(self) -> Option<i64> {
        match self {
            Seat::Player(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub rating: i64,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub rating: i64,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub white_id: i64,
    pub black: Seat,
    /// Serialized move history
    pub position: String,
    /// Unix milliseconds
    pub last_move_time: i64,
    pub created_at: i64,
    pub result: Option<String>,
}

impl GameRecord {
    pub fn color_of(&self, player_id: i64) -> Option<PlayerColor> {
        if self.white_id == player_id {
            Some(PlayerColor::White)
        } else if self.black == Seat::Player(player_id) {
            Some(PlayerColor::Black)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_column_values() {
        assert_eq!(Seat::from_column(-1), Seat::Open);
        assert_eq!(Seat::from_column(0), Seat::Automated);
        assert_eq!(Seat::from_column(7), Seat::Player(7));
        assert_eq!(Seat::Player(7).to_column(), 7);
        assert_eq!(Seat::Open.player_id(), None);
    }
}
