use crate::error::{QuarryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Min,
    Max,
    Avg,
    Sum,
    Count,
}

impl AggregateFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
        }
    }
}

/// `FN(columns) [AS alias]`
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub columns: Vec<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// ORDER BY entry. The direction keeps the spelling the caller used.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    pub column: String,
    pub direction: Direction,
    pub spelling: String,
}

impl OrderClause {
    pub fn parse(column: &str, direction: &str) -> Result<Self> {
        let trimmed = direction.trim();
        let parsed = match trimmed.to_ascii_lowercase().as_str() {
            "asc" => Direction::Asc,
            "desc" => Direction::Desc,
            _ => {
                return Err(QuarryError::InvalidArgument(format!(
                    "Illegal order direction `{}`",
                    direction
                )))
            }
        };
        Ok(Self {
            column: column.to_string(),
            direction: parsed,
            spelling: trimmed.to_string(),
        })
    }
}
