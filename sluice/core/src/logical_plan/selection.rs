use serde::{Deserialize, Serialize};
use sluice_schemas::DatasetReference;
use std::fmt;

use super::condition::Condition;
use super::value::{join, Value};

/// Rows read by a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    /// A dataset, fields qualified by the reference alias
    Dataset { reference: DatasetReference },
    /// A nested selection under an alias
    Selection {
        selection: Box<Selection>,
        alias: String,
    },
}

impl Source {
    pub fn alias(&self) -> &str {
        match self {
            Source::Dataset { reference } => reference.alias_or_name(),
            Source::Selection { alias, .. } => alias,
        }
    }
}

/// `SELECT [DISTINCT] projection FROM source WHERE condition GROUP BY group_by LIMIT limit`
///
/// A selection without source yields a single row, which is how literal rows are inserted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    pub projection: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Value>,

    #[serde(default)]
    pub distinct: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Selection {
    pub fn from_dataset(reference: DatasetReference) -> Selection {
        Selection {
            source: Some(Source::Dataset { reference }),
            ..Default::default()
        }
    }

    pub fn from_selection(selection: Selection, alias: impl Into<String>) -> Selection {
        Selection {
            source: Some(Source::Selection {
                selection: Box::new(selection),
                alias: alias.into(),
            }),
            ..Default::default()
        }
    }

    /// Source-less selection of a single row
    pub fn values(projection: Vec<Value>) -> Selection {
        Selection {
            projection,
            ..Default::default()
        }
    }

    pub fn project(mut self, projection: Vec<Value>) -> Selection {
        self.projection = projection;
        self
    }

    /// Adds a condition, combined with the existing one by AND
    pub fn filter(mut self, condition: Condition) -> Selection {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and_also(condition),
            None => condition,
        });
        self
    }

    pub fn filter_opt(self, condition: Option<Condition>) -> Selection {
        match condition {
            Some(condition) => self.filter(condition),
            None => self,
        }
    }

    pub fn group_by(mut self, group_by: Vec<Value>) -> Selection {
        self.group_by = group_by;
        self
    }

    pub fn distinct(mut self) -> Selection {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Selection {
        self.limit = Some(limit);
        self
    }

    /// Whether rows are aggregated, by grouping or by aggregate functions
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || self.projection.iter().any(Value::contains_aggregate)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "{}", join(&self.projection))?;

        match &self.source {
            Some(Source::Dataset { reference }) => {
                write!(f, " FROM {}", reference.qualified_name())?;
                if let Some(alias) = &reference.alias {
                    write!(f, " as {alias}")?;
                }
            }
            Some(Source::Selection { selection, alias }) => {
                write!(f, " FROM ({selection}) as {alias}")?
            }
            None => {}
        }

        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", join(&self.group_by))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}
