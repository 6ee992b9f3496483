//! Validation visitors that reject constructs users may not submit.

use crate::cypher::model::{Clause, Expression};
use crate::cypher::walk::{SyntaxNode, Visitor};
use crate::cypher::ParseError;

/// Rejects `CALL proc(args)`.
pub struct ExplicitProcedureInvocationFilter;

impl Visitor for ExplicitProcedureInvocationFilter {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        match node {
            SyntaxNode::Clause(Clause::Call(call)) if call.arguments.is_some() => {
                Err(ParseError::ExplicitProcedureInvocation(call.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Rejects `CALL proc` without an argument list.
pub struct ImplicitProcedureInvocationFilter;

impl Visitor for ImplicitProcedureInvocationFilter {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        match node {
            SyntaxNode::Clause(Clause::Call(call)) if call.arguments.is_none() => {
                Err(ParseError::ImplicitProcedureInvocation(call.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Rejects `$name` parameter references anywhere in the query.
pub struct SpecifiedParametersFilter;

impl Visitor for SpecifiedParametersFilter {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        match node {
            SyntaxNode::Expression(Expression::Parameter(name)) => {
                Err(ParseError::SpecifiedParameter(name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Rejects CREATE, MERGE, SET, DELETE and REMOVE.
pub struct UpdatingNotAllowedClauseFilter;

impl Visitor for UpdatingNotAllowedClauseFilter {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        match node {
            SyntaxNode::Clause(clause) if clause.is_updating() => {
                Err(ParseError::UpdatingClauseNotAllowed)
            }
            _ => Ok(()),
        }
    }
}

/// Records whether the query writes to the graph.
#[derive(Debug, Default)]
pub struct MutationDetector {
    pub has_mutation: bool,
}

impl Visitor for MutationDetector {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError> {
        if let SyntaxNode::Clause(clause) = node {
            self.has_mutation |= clause.is_updating();
        }
        Ok(())
    }
}

/// Which filters a [`ParseContext`](crate::cypher::ParseContext) should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSet {
    pub allow_mutations: bool,
}

impl FilterSet {
    /// The filters applied to user-submitted queries.
    pub fn user_queries(allow_mutations: bool) -> Self {
        Self { allow_mutations }
    }

    pub fn build(&self) -> Vec<Box<dyn Visitor + Send>> {
        let mut filters: Vec<Box<dyn Visitor + Send>> = vec![
            Box::new(ExplicitProcedureInvocationFilter),
            Box::new(ImplicitProcedureInvocationFilter),
            Box::new(SpecifiedParametersFilter),
        ];
        if !self.allow_mutations {
            filters.push(Box::new(UpdatingNotAllowedClauseFilter));
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::{parse, ParseContext};

    fn parse_user(text: &str, allow_mutations: bool) -> Result<(), ParseError> {
        let mut ctx = ParseContext::new(FilterSet::user_queries(allow_mutations).build());
        parse(&mut ctx, text).map(|_| ())
    }

    #[test]
    fn test_rejects_procedure_invocations() {
        assert_eq!(
            parse_user("CALL db.labels() YIELD label RETURN label", false),
            Err(ParseError::ExplicitProcedureInvocation("db.labels".to_string()))
        );
        assert_eq!(
            parse_user("CALL db.labels", false),
            Err(ParseError::ImplicitProcedureInvocation("db.labels".to_string()))
        );
    }

    #[test]
    fn test_rejects_parameters_in_patterns_and_expressions() {
        assert_eq!(
            parse_user("MATCH (n) WHERE n.objectid = $oid RETURN n", false),
            Err(ParseError::SpecifiedParameter("oid".to_string()))
        );
        assert_eq!(
            parse_user("MATCH (n {name: $name}) RETURN n", false),
            Err(ParseError::SpecifiedParameter("name".to_string()))
        );
    }

    #[test]
    fn test_updating_clauses_follow_flag() {
        let text = "MATCH (n:User) SET n.owned = true RETURN n";
        assert_eq!(
            parse_user(text, false),
            Err(ParseError::UpdatingClauseNotAllowed)
        );
        assert_eq!(parse_user(text, true), Ok(()));
    }

    #[test]
    fn test_mutation_detector() {
        let query = crate::cypher::parser::parse_query("MATCH (n) DETACH DELETE n").unwrap();
        let mut detector = MutationDetector::default();
        crate::cypher::walk::walk_query(&query, &mut detector).unwrap();
        assert!(detector.has_mutation);
    }
}
