//! Query preparation: translation strategies, admission and deadlines.

use std::time::Duration;

use crate::config::{QueryConfig, TranslatorKind};
use crate::cypher::analyzer::{self, ComplexityMeasure};
use crate::cypher::filters::{FilterSet, MutationDetector};
use crate::cypher::format::Emitter;
use crate::cypher::model::Query;
use crate::cypher::{self, age, walk, ParseContext};
use crate::error::AppError;
use crate::graph::Statement;

/// Longest deadline a caller may ask for.
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Deadline before complexity reduction.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Weight step that earns one more reduction of the default deadline.
const REDUCTION_STEP: i64 = 5;

/// A user query ready to execute.
///
/// Only a [`QueryTranslator`] can build one, so holding a value means the
/// text parsed and passed every filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    statement: Statement,
    stripped: String,
    complexity: Option<ComplexityMeasure>,
    has_mutation: bool,
}

impl PreparedQuery {
    /// Text in the dialect the backend runs.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Query text with literals replaced, safe to log. Empty for push-down
    /// translations.
    pub fn stripped(&self) -> &str {
        &self.stripped
    }

    /// Cost estimate. Absent for push-down translations.
    pub fn complexity(&self) -> Option<ComplexityMeasure> {
        self.complexity
    }

    pub fn has_mutation(&self) -> bool {
        self.has_mutation
    }

    /// Weight of the query, zero when it was not measured.
    pub fn weight(&self) -> i64 {
        self.complexity.map(|c| c.weight).unwrap_or_default()
    }
}

/// Turns raw user text into a [`PreparedQuery`].
pub trait QueryTranslator: Send + Sync {
    fn prepare(&self, raw: &str) -> Result<PreparedQuery, AppError>;
}

/// Parses under the user query filters and reports whether the query writes.
fn parse_user_query(raw: &str, allow_mutations: bool) -> Result<(Query, bool), AppError> {
    let mut ctx = ParseContext::new(FilterSet::user_queries(allow_mutations).build());
    let query = cypher::parse(&mut ctx, raw)?;

    let mut detector = MutationDetector::default();
    walk::walk_query(&query, &mut detector)?;

    Ok((query, detector.has_mutation))
}

/// Re-emits Cypher and measures its complexity.
#[derive(Debug, Clone, Copy, Default)]
pub struct CypherTranslator {
    allow_mutations: bool,
}

impl CypherTranslator {
    pub fn new(allow_mutations: bool) -> Self {
        Self { allow_mutations }
    }
}

impl QueryTranslator for CypherTranslator {
    fn prepare(&self, raw: &str) -> Result<PreparedQuery, AppError> {
        let (query, has_mutation) = parse_user_query(raw, self.allow_mutations)?;
        let complexity = analyzer::query_complexity(&query)?;
        let stripped = Emitter::stripped().emit(&query)?;
        let executable = Emitter::verbatim().emit(&query)?;

        Ok(PreparedQuery {
            statement: Statement::Cypher(executable),
            stripped,
            complexity: Some(complexity),
            has_mutation,
        })
    }
}

/// Pushes the query down into Apache AGE SQL without measuring it.
#[derive(Debug, Clone)]
pub struct AgeSqlTranslator {
    graph_name: String,
    allow_mutations: bool,
}

impl AgeSqlTranslator {
    pub fn new(graph_name: impl Into<String>, allow_mutations: bool) -> Self {
        Self {
            graph_name: graph_name.into(),
            allow_mutations,
        }
    }
}

impl QueryTranslator for AgeSqlTranslator {
    fn prepare(&self, raw: &str) -> Result<PreparedQuery, AppError> {
        let (query, has_mutation) = parse_user_query(raw, self.allow_mutations)?;
        let sql = age::translate(&self.graph_name, &query)?;

        Ok(PreparedQuery {
            statement: Statement::Sql(sql),
            stripped: String::new(),
            complexity: None,
            has_mutation,
        })
    }
}

/// Builds the translator the configuration selects.
pub fn translator_for(config: &QueryConfig, graph_name: &str) -> Box<dyn QueryTranslator> {
    match config.translator {
        TranslatorKind::Cypher => Box::new(CypherTranslator::new(config.enable_cypher_mutations)),
        TranslatorKind::AgeSql => Box::new(AgeSqlTranslator::new(
            graph_name,
            config.enable_cypher_mutations,
        )),
    }
}

/// Rejects measured queries heavier than the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub complexity_limit: i64,
    pub disabled: bool,
}

impl Admission {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            complexity_limit: config.complexity_limit,
            disabled: config.disable_cypher_complexity_limit,
        }
    }

    /// # Errors
    ///
    /// Returns [`AppError::CypherQueryTooComplex`] when the limit is active
    /// and the weight exceeds it. Unmeasured queries are always admitted.
    pub fn check(&self, prepared: &PreparedQuery) -> Result<(), AppError> {
        let Some(complexity) = prepared.complexity() else {
            return Ok(());
        };

        if !self.disabled && complexity.weight > self.complexity_limit {
            tracing::error!(
                query = prepared.stripped(),
                weight = complexity.weight,
                complexity_limit = self.complexity_limit,
                "Query rejected: weight exceeds the complexity limit"
            );
            return Err(AppError::CypherQueryTooComplex);
        }
        Ok(())
    }

    /// Deadline for executing a query.
    ///
    /// A caller timeout wins, capped at [`MAX_QUERY_TIMEOUT`]. Otherwise
    /// measured queries get the default shortened by their weight and
    /// unmeasured ones get no deadline.
    pub fn timeout(&self, prepared: &PreparedQuery, caller: Option<Duration>) -> Option<Duration> {
        if let Some(caller) = caller.filter(|t| !t.is_zero()) {
            return Some(caller.min(MAX_QUERY_TIMEOUT));
        }

        let complexity = prepared.complexity()?;
        if self.disabled {
            return Some(DEFAULT_QUERY_TIMEOUT);
        }

        let (timeout, reduction_factor) =
            apply_timeout_reduction(complexity.weight, DEFAULT_QUERY_TIMEOUT);
        tracing::debug!(
            weight = complexity.weight,
            reduction_factor,
            timeout_secs = timeout.as_secs(),
            "Reduced query timeout"
        );
        Some(timeout)
    }
}

/// Divides the runtime by `1 + weight / 5`, flooring to whole seconds.
///
/// Returns the reduced runtime and the factor used.
pub fn apply_timeout_reduction(weight: i64, available: Duration) -> (Duration, i64) {
    let factor = 1 + weight.max(0) / REDUCTION_STEP;
    let seconds = available.as_secs() / factor as u64;
    (Duration::from_secs(seconds), factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heavy_query() -> String {
        format!("MATCH (n){} RETURN n", "-[*]->()".repeat(9))
    }

    fn admission(limit: i64, disabled: bool) -> Admission {
        Admission {
            complexity_limit: limit,
            disabled,
        }
    }

    #[test]
    fn test_timeout_reduction_table() {
        let cases = [(0, 900, 1), (4, 900, 1), (5, 450, 2), (9, 450, 2), (13, 300, 3), (50, 81, 11)];
        for (weight, seconds, factor) in cases {
            assert_eq!(
                apply_timeout_reduction(weight, DEFAULT_QUERY_TIMEOUT),
                (Duration::from_secs(seconds), factor),
                "weight {}",
                weight
            );
        }
    }

    #[test]
    fn test_cypher_translator() {
        let prepared = CypherTranslator::new(false)
            .prepare("MATCH (n:User) WHERE n.name = 'BOB' RETURN n")
            .unwrap();

        assert_eq!(
            prepared.statement(),
            &Statement::Cypher("match (n:User) where n.name = 'BOB' return n".to_string())
        );
        assert_eq!(prepared.stripped(), "match (n:User) where n.name = $STRIPPED return n");
        assert_eq!(prepared.weight(), 1);
        assert!(!prepared.has_mutation());
    }

    #[test]
    fn test_mutations_follow_flag() {
        let text = "MATCH (n:User) SET n.owned = true RETURN n";

        let err = CypherTranslator::new(false).prepare(text).unwrap_err();
        assert_eq!(err.app_code(), "QUERY_PARSE_ERROR");

        assert!(CypherTranslator::new(true).prepare(text).unwrap().has_mutation());
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let depth = 1000;
        let text = format!(
            "MATCH (n) WHERE {}1{} = 1 RETURN n",
            "(".repeat(depth),
            ")".repeat(depth)
        );

        for translator in [
            Box::new(CypherTranslator::new(false)) as Box<dyn QueryTranslator>,
            Box::new(AgeSqlTranslator::new("bloodhound", false)),
        ] {
            let err = translator.prepare(&text).unwrap_err();
            assert_eq!(err.app_code(), "QUERY_PARSE_ERROR");
        }
    }

    #[test]
    fn test_age_translator_skips_measurement() {
        let prepared = AgeSqlTranslator::new("bloodhound", false)
            .prepare("MATCH (n:User) RETURN n")
            .unwrap();

        assert!(matches!(prepared.statement(), Statement::Sql(sql) if sql.starts_with("SELECT * FROM cypher('bloodhound'")));
        assert_eq!(prepared.complexity(), None);
        assert_eq!(prepared.stripped(), "");

        assert!(admission(0, false).check(&prepared).is_ok());
        assert_eq!(admission(50, false).timeout(&prepared, None), None);
        assert_eq!(
            admission(50, false).timeout(&prepared, Some(Duration::from_secs(7200))),
            Some(MAX_QUERY_TIMEOUT)
        );
    }

    #[test]
    fn test_admission_boundary() {
        let prepared = CypherTranslator::new(false).prepare(&heavy_query()).unwrap();
        assert_eq!(prepared.weight(), 55);

        assert!(matches!(
            admission(50, false).check(&prepared),
            Err(AppError::CypherQueryTooComplex)
        ));
        assert!(admission(55, false).check(&prepared).is_ok());
        assert!(admission(50, true).check(&prepared).is_ok());
    }

    #[test]
    fn test_caller_timeout_precedence() {
        let prepared = CypherTranslator::new(false).prepare(&heavy_query()).unwrap();
        let policy = admission(100, false);

        assert_eq!(
            policy.timeout(&prepared, Some(Duration::from_secs(60))),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            policy.timeout(&prepared, Some(Duration::from_secs(3600))),
            Some(MAX_QUERY_TIMEOUT)
        );
        assert_eq!(
            policy.timeout(&prepared, Some(Duration::ZERO)),
            Some(Duration::from_secs(900 / 12))
        );
        assert_eq!(
            admission(100, true).timeout(&prepared, None),
            Some(DEFAULT_QUERY_TIMEOUT)
        );
    }

    #[test]
    fn test_translator_for_config() {
        let mut config = QueryConfig::default();
        let prepared = translator_for(&config, "g").prepare("MATCH (n) RETURN n").unwrap();
        assert!(matches!(prepared.statement(), Statement::Cypher(_)));

        config.translator = TranslatorKind::AgeSql;
        let prepared = translator_for(&config, "g").prepare("MATCH (n) RETURN n").unwrap();
        assert!(matches!(prepared.statement(), Statement::Sql(_)));
    }
}
