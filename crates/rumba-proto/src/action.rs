//! Action identifiers: `NAMESPACE.FUNCTION` strings produced by input
//! devices and stored in menu rows.
//!
//! ```text
//!   MENU.TOGGLE          advance / close the page menu
//!   MENU.3               whatever occupies slot 3 of the visible menu
//!   KEY.LEFTALT+F10.QL   inject a key combo (".QL" is a display label)
//!   JUKEBOX.PLAYPAUSE    call a module function
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MENU_NAMESPACE: &str = "MENU";
pub const KEY_NAMESPACE: &str = "KEY";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionParseError {
    #[error("action '{0}' is not of the form NAMESPACE.FUNCTION")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionId(String);

/// What an action addresses once its namespace is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    MenuToggle,
    /// `MENU.NOTOGGLE` is a menu key that must not do anything.
    MenuInert,
    /// 1-based menu slot.
    MenuSlot(usize),
    Key(&'a str),
    Module {
        module: &'a str,
        function: &'a str,
    },
}

impl ActionId {
    pub fn new(module: &str, function: &str) -> Self {
        Self(format!("{}.{}", module.to_uppercase(), function))
    }

    pub fn parse(raw: &str) -> Result<Self, ActionParseError> {
        let raw = raw.trim();
        match raw.split_once('.') {
            Some((ns, func)) if !ns.is_empty() && !func.is_empty() => {
                Ok(Self(format!("{}.{}", ns.to_uppercase(), func)))
            }
            _ => Err(ActionParseError::Malformed(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once('.').map(|(ns, _)| ns).unwrap_or(&self.0)
    }

    pub fn function(&self) -> &str {
        self.0.split_once('.').map(|(_, f)| f).unwrap_or("")
    }

    pub fn target(&self) -> Target<'_> {
        match self.namespace() {
            MENU_NAMESPACE => match self.function() {
                "TOGGLE" => Target::MenuToggle,
                slot => match slot.parse::<usize>() {
                    Ok(n) if n > 0 => Target::MenuSlot(n),
                    _ => Target::MenuInert,
                },
            },
            KEY_NAMESPACE => Target::Key(self.function()),
            module => Target::Module {
                module,
                function: self.function(),
            },
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ActionId {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActionId {
    type Error = ActionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActionId> for String {
    fn from(value: ActionId) -> Self {
        value.0
    }
}
