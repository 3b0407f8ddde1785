// SQL dialect differences between supported backends

use jobstore_core::error::AppError;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    #[default]
    Sqlite,
    MySql,
}

impl Driver {
    /// Integer cast target used by the aggregation queries
    pub fn int_cast(&self) -> &'static str {
        match self {
            Driver::Sqlite => "int",
            Driver::MySql => "unsigned",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite3",
            Driver::MySql => "mysql",
        }
    }
}

impl FromStr for Driver {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "mysql" => Ok(Driver::MySql),
            other => Err(AppError::Config(format!("unsupported database driver: {}", other))),
        }
    }
}
