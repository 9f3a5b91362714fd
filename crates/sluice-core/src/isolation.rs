//! Transaction isolation levels

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SluiceError;

/// Transaction isolation level
///
/// Each level maps onto the numeric constant drivers use to identify it.
/// `Default` means "leave whatever the connection currently uses".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    #[default]
    Default,
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// All levels, in ascending order of their driver constant
    pub const ALL: [IsolationLevel; 6] = [
        IsolationLevel::Default,
        IsolationLevel::None,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// The driver constant for this level
    pub const fn as_raw(self) -> i32 {
        match self {
            IsolationLevel::Default => -1,
            IsolationLevel::None => 0,
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::ReadCommitted => 2,
            IsolationLevel::RepeatableRead => 4,
            IsolationLevel::Serializable => 8,
        }
    }

    /// Whether this is the `Default` placeholder
    pub fn is_default(self) -> bool {
        self == IsolationLevel::Default
    }

    /// SQL spelling of the level
    pub fn sql_name(self) -> &'static str {
        match self {
            IsolationLevel::Default => "DEFAULT",
            IsolationLevel::None => "NONE",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl TryFrom<i32> for IsolationLevel {
    type Error = SluiceError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        IsolationLevel::ALL
            .into_iter()
            .find(|level| level.as_raw() == raw)
            .ok_or(SluiceError::InvalidIsolationLevel(raw))
    }
}

impl From<IsolationLevel> for i32 {
    fn from(level: IsolationLevel) -> Self {
        level.as_raw()
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}
