//! Cost model for user queries.
//!
//! The weight grows with the constructs that widen the search space a
//! backend has to explore: additional matches and pipeline stages,
//! relationship expansions (unbounded ones most of all), path searches,
//! disjunctive or negated predicates and unanchored string scans.

use crate::cypher::model::*;
use crate::cypher::walk::{walk_query, SyntaxNode, Visitor};
use crate::cypher::ParseError;

/// Weight charged for an unbounded variable-length expansion.
const UNBOUNDED_EXPANSION_WEIGHT: i64 = 5;

/// Cap on the weight charged for a bounded variable-length expansion.
const MAX_BOUNDED_EXPANSION_WEIGHT: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexityMeasure {
    /// Non-negative cost estimate.
    pub weight: i64,
    pub num_matches: i64,
    pub num_multi_part: i64,
}

#[derive(Debug, Default)]
struct ComplexityVisitor {
    measure: ComplexityMeasure,
}

impl ComplexityVisitor {
    fn clause(&mut self, clause: &Clause) {
        match clause {
            Clause::Match(m) => {
                self.measure.num_matches += 1;
                self.measure.weight += 1;
                if m.optional {
                    self.measure.weight += 1;
                }
                // Disconnected parts in one MATCH form a cartesian product
                self.measure.weight += 3 * m.pattern.len().saturating_sub(1) as i64;
            }
            Clause::With(_) => {
                self.measure.num_multi_part += 1;
                self.measure.weight += 2;
            }
            Clause::Unwind(_) => self.measure.weight += 1,
            _ => {}
        }
    }

    fn relationship(&mut self, relationship: &RelationshipPattern) {
        self.measure.weight += 1;
        if relationship.direction == Direction::Both {
            self.measure.weight += 1;
        }

        if let Some(range) = &relationship.range {
            self.measure.weight += match range.end {
                None => UNBOUNDED_EXPANSION_WEIGHT,
                Some(end) => {
                    (end - range.start.unwrap_or(1)).clamp(0, MAX_BOUNDED_EXPANSION_WEIGHT)
                }
            };
        }
    }

    fn expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Disjunction(_)
            | Expression::ExclusiveDisjunction(_)
            | Expression::Negation(_) => self.measure.weight += 1,
            Expression::Comparison { partials, .. } => {
                let scans = partials
                    .iter()
                    .filter(|partial| {
                        matches!(
                            partial.operator,
                            ComparisonOperator::RegexMatch
                                | ComparisonOperator::EndsWith
                                | ComparisonOperator::Contains
                        )
                    })
                    .count();
                self.measure.weight += scans as i64;
            }
            _ => {}
        }
    }
}

impl Visitor for ComplexityVisitor {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        match node {
            SyntaxNode::Clause(clause) => self.clause(clause),
            SyntaxNode::PatternPart(part) => {
                self.measure.weight += match part.search {
                    PathSearch::Walk => 0,
                    PathSearch::ShortestPath => 1,
                    PathSearch::AllShortestPaths => 2,
                };
            }
            SyntaxNode::RelationshipPattern(relationship) => self.relationship(relationship),
            SyntaxNode::Projection(projection) if !projection.order.is_empty() => {
                self.measure.weight += 1;
            }
            SyntaxNode::Expression(expression) => self.expression(expression),
            _ => {}
        }
        Ok(())
    }
}

/// Measures the cost of a parsed query.
pub fn query_complexity(query: &Query) -> Result<ComplexityMeasure, ParseError> {
    let mut visitor = ComplexityVisitor::default();
    walk_query(query, &mut visitor)?;
    Ok(visitor.measure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parser::parse_query;

    fn weight(text: &str) -> i64 {
        query_complexity(&parse_query(text).unwrap()).unwrap().weight
    }

    #[test]
    fn test_single_node_match() {
        assert_eq!(weight("match (n) return n"), 1);
        assert_eq!(weight("match (n:User) where n.name = 'BOB' return n"), 1);
    }

    #[test]
    fn test_unbounded_expansions() {
        assert_eq!(
            weight("match ()-[:HasSession*..]->()-[:MemberOf*..]->() return n"),
            13
        );
    }

    #[test]
    fn test_bounded_expansions_are_capped() {
        assert_eq!(weight("match (a)-[:MemberOf*1..3]->(b) return b"), 4);
        assert_eq!(weight("match (a)-[:MemberOf*1..20]->(b) return b"), 7);
        assert_eq!(weight("match (a)-[:MemberOf*2]->(b) return b"), 2);
    }

    #[test]
    fn test_pipeline_and_predicates() {
        let measure = query_complexity(
            &parse_query(
                "match (n:User) with n optional match (n)-[r]-(c) \
                 where c.name contains 'SQL' or not c.enabled return c order by c.name",
            )
            .unwrap(),
        )
        .unwrap();

        // match 1, with 2, optional match 2, undirected rel 2, contains 1, or 1, not 1, order by 1
        assert_eq!(measure.weight, 11);
        assert_eq!(measure.num_matches, 2);
        assert_eq!(measure.num_multi_part, 1);
    }

    #[test]
    fn test_cartesian_and_shortest_paths() {
        assert_eq!(weight("match (a), (b) return a, b"), 4);
        assert_eq!(
            weight("match p = allShortestPaths((a)-[*1..]->(b)) return p"),
            1 + 2 + 1 + 5
        );
    }

    #[test]
    fn test_long_expansion_chain_exceeds_default_limit() {
        let chain = "-[*]->()".repeat(9);
        let measure = weight(&format!("match (n){} return n", chain));
        assert_eq!(measure, 55);
        assert!(measure > 50);
    }
}
