//! Declarative descriptions of the series a view fetches.
//!
//! A [`SeriesConfig`] knows which GraphQL query retrieves its samples and
//! how to build the query variables. The time window and granularity are
//! not part of the config: the fetcher injects them under the shared
//! variable names at query time, so one config can be reused across
//! windows.

use serde_json::{Map, Value, json};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::datamodel::{AggregateFunction, Metric, Sample, TagFilter};

/// Variable name for the window start, injected by the fetcher.
pub const FROM_VARIABLE: &str = "from";
/// Variable name for the window end, injected by the fetcher.
pub const TO_VARIABLE: &str = "to";
/// Variable name for the bucket width, injected by the fetcher.
pub const GRANULARITY_VARIABLE: &str = "granularity";

/// Identifier usable in expressions without a matching term. The server
/// substitutes the query granularity in seconds.
pub const GRANULARITY_IDENTIFIER: &str = "GRANULARITY";

pub const AGGREGATE_QUERY: &str = r#"
query($series: SeriesGroup!, $from: Datetime!, $to: Datetime!, $granularity: Int, $function: AggregateFunction, $downsample: AggregateFunction) {
  samples: aggregate(series: $series, from: $from, to: $to, granularity: $granularity, function: $function, downsample: $downsample) {
    unix_ts: unix_timestamp
    v: value
  }
}"#;

pub const EXPRESSION_QUERY: &str = r#"
query($from: Datetime!, $to: Datetime!, $granularity: Int, $expression: String!, $terms: [ExpressionTerm]) {
  samples: expression(from: $from, to: $to, granularity: $granularity, expression: $expression, terms: $terms) {
    unix_ts: unix_timestamp
    v: value
  }
}"#;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeriesConfigError {
    #[error("expression series \"{label}\" has no terms")]
    EmptyTerms { label: String },

    #[error("expression references \"{name}\" which is not a term")]
    UnknownIdentifier { name: String },

    #[error("invalid character {ch:?} in expression")]
    InvalidCharacter { ch: char },
}

/// One metric aggregated server-side over a group of series.
///
/// `tag` selects a grouping key (all values of that key), while `tags`
/// filters on exact key/value pairs. Both map straight onto the
/// `SeriesGroup` GraphQL input and are omitted from the variables when
/// unset.
#[derive(Debug, Clone)]
pub struct AggregateSeries {
    pub label: Option<String>,
    pub metric: Metric,
    pub period: u32,
    pub tag: Option<TagFilter>,
    pub tags: Option<SmallVec<[TagFilter; 2]>>,
    pub aggregate: AggregateFunction,
    pub downsample: AggregateFunction,
    /// Fixed bucket width overriding the caller's granularity.
    pub granularity: Option<u32>,
}

impl AggregateSeries {
    pub fn new(metric: Metric, period: u32) -> Self {
        AggregateSeries {
            label: None,
            metric,
            period,
            tag: None,
            tags: None,
            aggregate: AggregateFunction::Sum,
            downsample: AggregateFunction::None,
            granularity: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Aggregates across every series carrying the given tag key.
    pub fn grouped_by(mut self, tag: TagFilter) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Restricts to series matching all the given key/value pairs.
    pub fn filtered_by(mut self, tags: impl IntoIterator<Item = TagFilter>) -> Self {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    pub fn with_aggregate(mut self, function: AggregateFunction) -> Self {
        self.aggregate = function;
        self
    }

    pub fn with_downsample(mut self, function: AggregateFunction) -> Self {
        self.downsample = function;
        self
    }

    /// Pins the bucket width so resolution changes do not affect this
    /// series. The query still runs over the caller's date range.
    pub fn with_granularity(mut self, seconds: u32) -> Self {
        self.granularity = Some(seconds);
        self
    }

    fn variables(&self) -> Map<String, Value> {
        let mut series = Map::new();
        series.insert("metric".to_string(), json!({ "name": self.metric.name }));
        series.insert("period".to_string(), json!(self.period));
        if let Some(tag) = &self.tag {
            series.insert("tag".to_string(), json!(tag));
        }
        if let Some(tags) = &self.tags {
            let tags: Vec<Value> = tags.iter().map(|tag| json!(tag)).collect();
            series.insert("tags".to_string(), Value::Array(tags));
        }

        let mut variables = Map::new();
        variables.insert("series".to_string(), Value::Object(series));
        variables.insert("function".to_string(), json!(self.aggregate));
        variables.insert("downsample".to_string(), json!(self.downsample));
        variables
    }
}

/// An arithmetic combination of aggregate series, evaluated server-side.
///
/// Each term binds a name to an aggregate series; the expression refers
/// to terms by name. Construction fails unless every identifier in the
/// expression is a term name or [`GRANULARITY_IDENTIFIER`].
#[derive(Debug, Clone)]
pub struct ExpressionSeries {
    pub label: String,
    pub metric: Metric,
    pub expression: String,
    pub terms: BTreeMap<String, AggregateSeries>,
}

impl ExpressionSeries {
    pub fn new(
        label: impl Into<String>,
        metric: Metric,
        expression: impl Into<String>,
        terms: BTreeMap<String, AggregateSeries>,
    ) -> Result<Self, SeriesConfigError> {
        let label = label.into();
        let expression = expression.into();

        if terms.is_empty() {
            return Err(SeriesConfigError::EmptyTerms { label });
        }
        validate_expression(&expression, &terms)?;

        Ok(ExpressionSeries {
            label,
            metric,
            expression,
            terms,
        })
    }

    fn variables(&self) -> Map<String, Value> {
        let terms: Vec<Value> = self
            .terms
            .iter()
            .map(|(name, term)| {
                let mut object = Map::new();
                object.insert("name".to_string(), json!(name));
                object.extend(term.variables());
                Value::Object(object)
            })
            .collect();

        let mut variables = Map::new();
        variables.insert("expression".to_string(), json!(self.expression));
        variables.insert("terms".to_string(), Value::Array(terms));
        variables
    }
}

fn validate_expression(
    expression: &str,
    terms: &BTreeMap<String, AggregateSeries>,
) -> Result<(), SeriesConfigError> {
    let mut chars = expression.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            name.push(c);
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name != GRANULARITY_IDENTIFIER && !terms.contains_key(&name) {
                return Err(SeriesConfigError::UnknownIdentifier { name });
            }
        } else if c.is_ascii_digit() {
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || next == '.' {
                    chars.next();
                } else {
                    break;
                }
            }
        } else if matches!(c, '+' | '-' | '*' | '/' | '(' | ')') || c.is_whitespace() {
            continue;
        } else {
            return Err(SeriesConfigError::InvalidCharacter { ch: c });
        }
    }

    Ok(())
}

/// What to fetch for one drawn series.
#[derive(Debug, Clone)]
pub enum SeriesConfig {
    Aggregate(AggregateSeries),
    Expression(ExpressionSeries),
}

impl SeriesConfig {
    /// Display label. Aggregate series without an explicit label fall
    /// back to their metric's label.
    pub fn label(&self) -> &str {
        match self {
            SeriesConfig::Aggregate(series) => series
                .label
                .as_deref()
                .unwrap_or_else(|| series.metric.display_label()),
            SeriesConfig::Expression(series) => &series.label,
        }
    }

    pub fn metric(&self) -> &Metric {
        match self {
            SeriesConfig::Aggregate(series) => &series.metric,
            SeriesConfig::Expression(series) => &series.metric,
        }
    }

    pub fn query(&self) -> &'static str {
        match self {
            SeriesConfig::Aggregate(_) => AGGREGATE_QUERY,
            SeriesConfig::Expression(_) => EXPRESSION_QUERY,
        }
    }

    /// Bucket width pinned on the series itself, if any. Expression
    /// series always follow the caller's granularity so their terms
    /// stay aligned.
    pub fn granularity_override(&self) -> Option<u32> {
        match self {
            SeriesConfig::Aggregate(series) => series.granularity,
            SeriesConfig::Expression(_) => None,
        }
    }

    /// Query variables, without the window variables the fetcher injects.
    pub fn variables(&self) -> Map<String, Value> {
        match self {
            SeriesConfig::Aggregate(series) => series.variables(),
            SeriesConfig::Expression(series) => series.variables(),
        }
    }

    /// Converts raw sample values into the metric's display unit.
    pub fn transform(&self, samples: Vec<Sample>) -> Vec<Sample> {
        let scale = self.metric().scale;
        samples
            .into_iter()
            .map(|sample| Sample::new(sample.datetime, sample.value * scale))
            .collect()
    }
}

impl From<AggregateSeries> for SeriesConfig {
    fn from(series: AggregateSeries) -> Self {
        SeriesConfig::Aggregate(series)
    }
}

impl From<ExpressionSeries> for SeriesConfig {
    fn from(series: ExpressionSeries) -> Self {
        SeriesConfig::Expression(series)
    }
}
