//! Stage specifications.
//!
//! A pipeline is written as a comma-separated list of
//! `src[+src...]:dst` segments, e.g. `chunk:summary,summary+chunk:analysis`.
//! Stage order is the order of the segments; dependencies between stages
//! are asserted by the author, not derived.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::suggestions::closest_match;
use crate::errors::{MalformedStageSpecError, UnknownColumnError};

/// Separator between stage segments.
pub const STAGE_SEPARATOR: char = ',';
/// Separator between sources and destination.
pub const DESTINATION_SEPARATOR: char = ':';
/// Separator between multiple sources.
pub const SOURCE_SEPARATOR: char = '+';
/// Text placed between source values when a stage reads several columns.
pub const SOURCE_JOINER: &str = "\n";

/// One `sources -> destination` transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDescriptor {
    sources: Vec<String>,
    destination: String,
}

impl StageDescriptor {
    /// Creates a stage descriptor.
    ///
    /// # Errors
    ///
    /// Fails if `sources` is empty, any name is blank, or the destination
    /// also appears as a source.
    pub fn new<I, S>(sources: I, destination: impl Into<String>) -> Result<Self, MalformedStageSpecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        let destination = destination.into();
        let label = stage_label(&sources, &destination);

        if sources.is_empty() {
            return Err(MalformedStageSpecError::new(label, "stage has no source column"));
        }
        if sources.iter().any(|s| s.trim().is_empty()) {
            return Err(MalformedStageSpecError::new(label, "empty source column name"));
        }
        if destination.trim().is_empty() {
            return Err(MalformedStageSpecError::new(label, "empty destination column name"));
        }
        if sources.contains(&destination) {
            return Err(MalformedStageSpecError::new(
                label,
                "destination column is also a source",
            ));
        }

        Ok(Self {
            sources,
            destination,
        })
    }

    /// Source columns, in concatenation order.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Destination column. Also the stage's name for prompt lookup.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns true if the stage reads more than one column.
    #[must_use]
    pub fn is_multi_source(&self) -> bool {
        self.sources.len() > 1
    }

    /// Joins source values into the user message, in source order.
    #[must_use]
    pub fn join_sources<S: AsRef<str>>(values: &[S]) -> String {
        values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(SOURCE_JOINER)
    }
}

fn stage_label(sources: &[String], destination: &str) -> String {
    let mut label = String::new();
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            label.push(SOURCE_SEPARATOR);
        }
        label.push_str(source);
    }
    label.push(DESTINATION_SEPARATOR);
    label.push_str(destination);
    label
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stage_label(&self.sources, &self.destination))
    }
}

impl std::str::FromStr for StageDescriptor {
    type Err = MalformedStageSpecError;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        let trimmed = segment.trim();
        let mut parts = trimmed.split(DESTINATION_SEPARATOR);
        let (Some(sources), Some(destination), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(MalformedStageSpecError::new(
                trimmed,
                "expected exactly one ':' between sources and destination",
            ));
        };

        let sources: Vec<&str> = sources.split(SOURCE_SEPARATOR).map(str::trim).collect();
        let destination = destination.trim();

        if sources.iter().any(|s| s.is_empty()) {
            return Err(MalformedStageSpecError::new(trimmed, "empty source column name"));
        }
        if destination.is_empty() {
            return Err(MalformedStageSpecError::new(
                trimmed,
                "empty destination column name",
            ));
        }

        Self::new(sources, destination).map_err(|e| MalformedStageSpecError::new(trimmed, e.reason))
    }
}

/// Parses a comma-separated stage specification into ordered stages.
///
/// # Errors
///
/// Returns [`MalformedStageSpecError`] for the first segment that does not
/// contain exactly one `:` or names an empty column, and for a spec with no
/// segments at all.
pub fn parse_stage_spec(spec: &str) -> Result<Vec<StageDescriptor>, MalformedStageSpecError> {
    if spec.trim().is_empty() {
        return Err(MalformedStageSpecError::new(spec, "no stages given"));
    }

    spec.split(STAGE_SEPARATOR)
        .map(str::parse::<StageDescriptor>)
        .collect()
}

/// Checks that every source of `stage` is a known column.
///
/// `known_columns` is the table's column list in enumeration order; the
/// order decides ties between equally close suggestions.
///
/// # Errors
///
/// Returns [`UnknownColumnError`] naming the first missing source and the
/// nearest known column, if one is close enough.
pub fn validate_columns<S: AsRef<str>>(
    known_columns: &[S],
    stage: &StageDescriptor,
) -> Result<(), UnknownColumnError> {
    for source in stage.sources() {
        if !known_columns.iter().any(|c| c.as_ref() == source) {
            let suggestion =
                closest_match(source, known_columns.iter().map(AsRef::as_ref)).map(str::to_string);
            return Err(UnknownColumnError::new(source.clone(), suggestion));
        }
    }
    Ok(())
}

/// Validates every stage of a pipeline against the table's columns.
///
/// A source may also be the destination of an earlier stage; such columns
/// are created before processing starts, so they count as known from the
/// following stage onward.
///
/// # Errors
///
/// Returns the first [`UnknownColumnError`] encountered, in stage order.
pub fn validate_pipeline_columns<S: AsRef<str>>(
    table_columns: &[S],
    stages: &[StageDescriptor],
) -> Result<(), UnknownColumnError> {
    let mut known: Vec<String> = table_columns.iter().map(|c| c.as_ref().to_string()).collect();

    for stage in stages {
        validate_columns(&known, stage)?;
        if !known.iter().any(|c| c == stage.destination()) {
            known.push(stage.destination().to_string());
        }
    }
    Ok(())
}
