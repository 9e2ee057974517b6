//! Protocol commands
//!
//! Defines the commands understood by the panel. Every command is a
//! caret, a letter, and fixed-width decimal arguments, terminated by CR.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Highest id that fits the three digit wire field
pub const MAX_DEVICE_ID: u16 = 999;

/// Commands sent to the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Turn a load fully on (`^A`)
    ActivateLoad(u16),

    /// Turn a load off (`^B`)
    DeactivateLoad(u16),

    /// Fire a scene in the "on" direction (`^C`)
    SceneOn(u16),

    /// Fire a scene in the "off" direction (`^D`)
    SceneOff(u16),

    /// Ramp a load to a level 0-99 at a rate 0-99 (`^E`)
    SetLoadLevel {
        /// Load number
        id: u16,
        /// Target level, clamped to 99
        level: u8,
        /// Ramp rate, clamped to 99
        rate: u8,
    },

    /// Ask for the current level of a load (`^F`)
    QueryLoadLevel(u16),

    /// Ask for the on/off bitmap of every load (`^G`)
    QueryAllLoads,

    /// Ask for the on/off bitmap of every switch (`^H`)
    QueryAllSwitches,

    /// Begin a simulated switch press (`^I`)
    PressSwitch(u16),

    /// End a simulated switch press (`^J`)
    ReleaseSwitch(u16),
}

impl Command {
    /// Command letter following the caret
    pub fn letter(&self) -> char {
        match self {
            Command::ActivateLoad(_) => 'A',
            Command::DeactivateLoad(_) => 'B',
            Command::SceneOn(_) => 'C',
            Command::SceneOff(_) => 'D',
            Command::SetLoadLevel { .. } => 'E',
            Command::QueryLoadLevel(_) => 'F',
            Command::QueryAllLoads => 'G',
            Command::QueryAllSwitches => 'H',
            Command::PressSwitch(_) => 'I',
            Command::ReleaseSwitch(_) => 'J',
        }
    }

    /// Device or scene number the command addresses, if any
    pub fn id(&self) -> Option<u16> {
        match *self {
            Command::ActivateLoad(id)
            | Command::DeactivateLoad(id)
            | Command::SceneOn(id)
            | Command::SceneOff(id)
            | Command::SetLoadLevel { id, .. }
            | Command::QueryLoadLevel(id)
            | Command::PressSwitch(id)
            | Command::ReleaseSwitch(id) => Some(id),
            Command::QueryAllLoads | Command::QueryAllSwitches => None,
        }
    }

    /// Reject ids that would widen the fixed width id field
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self.id() {
            Some(id) if id > MAX_DEVICE_ID => Err(ProtocolError::InvalidId(id)),
            _ => Ok(()),
        }
    }

    /// Wire text without the CR terminator
    ///
    /// Only parses back for commands that pass [`Command::validate`].
    pub fn to_wire(&self) -> String {
        let letter = self.letter();
        match *self {
            Command::ActivateLoad(id)
            | Command::DeactivateLoad(id)
            | Command::SceneOn(id)
            | Command::SceneOff(id)
            | Command::QueryLoadLevel(id)
            | Command::PressSwitch(id)
            | Command::ReleaseSwitch(id) => format!("^{}{:03}", letter, id),
            Command::SetLoadLevel { id, level, rate } => {
                format!("^{}{:03}{:02}{:02}", letter, id, level.min(99), rate.min(99))
            }
            Command::QueryAllLoads | Command::QueryAllSwitches => format!("^{}", letter),
        }
    }

    /// Bytes to write, CR terminated
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_wire().into_bytes();
        bytes.push(b'\r');
        bytes
    }

    /// Check if the panel answers this command with a reply line
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Command::QueryLoadLevel(_) | Command::QueryAllLoads | Command::QueryAllSwitches
        )
    }

    /// Parse wire text (with or without CR) back into a command
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_end_matches('\r');
        let rest = text.strip_prefix('^')?;
        let mut chars = rest.chars();
        let letter = chars.next()?;
        let args = chars.as_str();

        let id = |digits: &str| -> Option<u16> {
            if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()) {
                digits.parse().ok()
            } else {
                None
            }
        };

        match letter {
            'A' => id(args).map(Command::ActivateLoad),
            'B' => id(args).map(Command::DeactivateLoad),
            'C' => id(args).map(Command::SceneOn),
            'D' => id(args).map(Command::SceneOff),
            'E' if args.len() == 7 && args.bytes().all(|b| b.is_ascii_digit()) => {
                Some(Command::SetLoadLevel {
                    id: args[0..3].parse().ok()?,
                    level: args[3..5].parse().ok()?,
                    rate: args[5..7].parse().ok()?,
                })
            }
            'F' => id(args).map(Command::QueryLoadLevel),
            'G' if args.is_empty() => Some(Command::QueryAllLoads),
            'H' if args.is_empty() => Some(Command::QueryAllSwitches),
            'I' => id(args).map(Command::PressSwitch),
            'J' => id(args).map(Command::ReleaseSwitch),
            _ => None,
        }
    }
}

/// Direction to fire a scene in
///
/// The panel has no native scene-off; "off" is a second command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneDirection {
    /// Fire with `^C`
    On,
    /// Fire with `^D`
    Off,
}

impl SceneDirection {
    /// Pick the direction from an entity name ending in `-ON` or `-OFF`
    pub fn from_scene_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        if upper.ends_with("-OFF") {
            Some(SceneDirection::Off)
        } else if upper.ends_with("-ON") {
            Some(SceneDirection::On)
        } else {
            None
        }
    }

    /// Command firing scene `id` in this direction
    pub fn command(self, id: u16) -> Command {
        match self {
            SceneDirection::On => Command::SceneOn(id),
            SceneDirection::Off => Command::SceneOff(id),
        }
    }
}
