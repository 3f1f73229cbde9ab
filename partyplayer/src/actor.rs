//! Auteurs des actions et verrous des contrôles partagés.

use std::fmt;
use std::str::FromStr;

use partyqueue::{Submitter, SYSTEM_SUBMITTER_ID};
use serde::{Deserialize, Serialize};

/// Auteur d'une action sur le lecteur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(Submitter),
    /// Administration et tâches internes ; ignore les verrous
    System,
}

impl Actor {
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Actor::User(Submitter::new(id, name))
    }

    pub fn id(&self) -> &str {
        match self {
            Actor::User(s) => &s.id,
            Actor::System => SYSTEM_SUBMITTER_ID,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Actor::User(s) => &s.name,
            Actor::System => "System",
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contrôle partagé soumis au délai global et aux verrous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Control {
    Pause,
    Skip,
    Shuffle,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Control::Pause => "PAUSE",
            Control::Skip => "SKIP",
            Control::Shuffle => "SHUFFLE",
        };
        f.write_str(s)
    }
}

/// Cible d'une commande de verrouillage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTarget {
    One(Control),
    All,
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::One(control) => control.fmt(f),
            LockTarget::All => f.write_str("ALL"),
        }
    }
}

impl FromStr for LockTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PAUSE" => Ok(LockTarget::One(Control::Pause)),
            "SKIP" => Ok(LockTarget::One(Control::Skip)),
            "SHUFFLE" => Ok(LockTarget::One(Control::Shuffle)),
            "ALL" => Ok(LockTarget::All),
            other => Err(format!("unknown lock target: {}", other)),
        }
    }
}

/// Verrous posés par l'administrateur
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Locks {
    pub pause: bool,
    pub skip: bool,
    pub shuffle: bool,
}

impl Locks {
    pub fn is_locked(&self, control: Control) -> bool {
        match control {
            Control::Pause => self.pause,
            Control::Skip => self.skip,
            Control::Shuffle => self.shuffle,
        }
    }

    pub fn set(&mut self, target: LockTarget, locked: bool) {
        match target {
            LockTarget::One(Control::Pause) => self.pause = locked,
            LockTarget::One(Control::Skip) => self.skip = locked,
            LockTarget::One(Control::Shuffle) => self.shuffle = locked,
            LockTarget::All => {
                self.pause = locked;
                self.skip = locked;
                self.shuffle = locked;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_targets_parse_case_insensitively() {
        assert_eq!("skip".parse(), Ok(LockTarget::One(Control::Skip)));
        assert_eq!("All".parse(), Ok(LockTarget::All));
        assert!("volume".parse::<LockTarget>().is_err());
    }

    #[test]
    fn lock_all_sets_every_control() {
        let mut locks = Locks::default();
        locks.set(LockTarget::All, true);
        assert!(locks.is_locked(Control::Pause));
        assert!(locks.is_locked(Control::Skip));
        assert!(locks.is_locked(Control::Shuffle));

        locks.set(LockTarget::One(Control::Skip), false);
        assert!(!locks.is_locked(Control::Skip));
        assert!(locks.is_locked(Control::Pause));
    }

    #[test]
    fn system_actor_uses_reserved_id() {
        assert_eq!(Actor::System.id(), "SYSTEM");
        assert!(Actor::System.is_system());
        assert_eq!(Actor::user("u1", "Alice").id(), "u1");
    }
}
