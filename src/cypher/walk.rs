//! Depth-first traversal of the syntax tree.

use crate::cypher::model::*;
use crate::cypher::ParseError;

/// A borrowed reference to any node a [`Visitor`] can observe.
#[derive(Debug, Clone, Copy)]
pub enum SyntaxNode<'a> {
    SingleQuery(&'a SingleQuery),
    Clause(&'a Clause),
    PatternPart(&'a PatternPart),
    NodePattern(&'a NodePattern),
    RelationshipPattern(&'a RelationshipPattern),
    Projection(&'a Projection),
    Expression(&'a Expression),
}

/// Observes syntax nodes in pre-order (`enter`) and post-order (`exit`).
///
/// Returning an error from either hook stops the walk.
pub trait Visitor {
    fn enter(&mut self, node: SyntaxNode<'_>) -> Result<(), ParseError>;

    fn exit(&mut self, _node: SyntaxNode<'_>) -> Result<(), ParseError> {
        Ok(())
    }
}

pub fn walk_query(query: &Query, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    for single in query.single_queries() {
        walk_single_query(single, visitor)?;
    }
    Ok(())
}

fn walk_single_query(query: &SingleQuery, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::SingleQuery(query);
    visitor.enter(node)?;
    for clause in &query.clauses {
        walk_clause(clause, visitor)?;
    }
    visitor.exit(node)
}

fn walk_clause(clause: &Clause, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::Clause(clause);
    visitor.enter(node)?;

    match clause {
        Clause::Match(m) => {
            walk_pattern(&m.pattern, visitor)?;
            walk_optional(m.where_clause.as_ref(), visitor)?;
        }
        Clause::Unwind(unwind) => walk_expression(&unwind.expression, visitor)?,
        Clause::With(with) => {
            walk_projection(&with.projection, visitor)?;
            walk_optional(with.where_clause.as_ref(), visitor)?;
        }
        Clause::Return(ret) => walk_projection(&ret.projection, visitor)?,
        Clause::Create(create) => walk_pattern(&create.pattern, visitor)?,
        Clause::Merge(merge) => {
            walk_pattern_part(&merge.pattern, visitor)?;
            for action in &merge.actions {
                walk_set_items(&action.items, visitor)?;
            }
        }
        Clause::Set(set) => walk_set_items(&set.items, visitor)?,
        Clause::Delete(delete) => {
            for expression in &delete.expressions {
                walk_expression(expression, visitor)?;
            }
        }
        Clause::Remove(remove) => {
            for item in &remove.items {
                if let RemoveItem::Property(expression) = item {
                    walk_expression(expression, visitor)?;
                }
            }
        }
        Clause::Call(call) => {
            for argument in call.arguments.iter().flatten() {
                walk_expression(argument, visitor)?;
            }
            walk_optional(call.where_clause.as_ref(), visitor)?;
        }
    }

    visitor.exit(node)
}

fn walk_optional(expression: Option<&Expression>, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    match expression {
        Some(expression) => walk_expression(expression, visitor),
        None => Ok(()),
    }
}

fn walk_set_items(items: &[SetItem], visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    for item in items {
        match item {
            SetItem::Property { target, value } => {
                walk_expression(target, visitor)?;
                walk_expression(value, visitor)?;
            }
            SetItem::MergeProperties { value, .. } | SetItem::ReplaceProperties { value, .. } => {
                walk_expression(value, visitor)?;
            }
            SetItem::Kinds { .. } => {}
        }
    }
    Ok(())
}

fn walk_pattern(pattern: &[PatternPart], visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    for part in pattern {
        walk_pattern_part(part, visitor)?;
    }
    Ok(())
}

fn walk_pattern_part(part: &PatternPart, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::PatternPart(part);
    visitor.enter(node)?;

    walk_node_pattern(&part.start, visitor)?;
    for step in &part.chain {
        let relationship = SyntaxNode::RelationshipPattern(&step.relationship);
        visitor.enter(relationship)?;
        walk_optional(step.relationship.properties.as_ref(), visitor)?;
        visitor.exit(relationship)?;

        walk_node_pattern(&step.node, visitor)?;
    }

    visitor.exit(node)
}

fn walk_node_pattern(pattern: &NodePattern, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::NodePattern(pattern);
    visitor.enter(node)?;
    walk_optional(pattern.properties.as_ref(), visitor)?;
    visitor.exit(node)
}

fn walk_projection(projection: &Projection, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::Projection(projection);
    visitor.enter(node)?;

    if let ProjectionItems::Items(items) = &projection.items {
        for item in items {
            walk_expression(&item.expression, visitor)?;
        }
    }
    for sort in &projection.order {
        walk_expression(&sort.expression, visitor)?;
    }
    walk_optional(projection.skip.as_ref(), visitor)?;
    walk_optional(projection.limit.as_ref(), visitor)?;

    visitor.exit(node)
}

pub fn walk_expression(expression: &Expression, visitor: &mut dyn Visitor) -> Result<(), ParseError> {
    let node = SyntaxNode::Expression(expression);
    visitor.enter(node)?;

    match expression {
        Expression::Literal(_)
        | Expression::Parameter(_)
        | Expression::Variable(_)
        | Expression::CountStar => {}
        Expression::PropertyLookup { atom, .. } => walk_expression(atom, visitor)?,
        Expression::KindMatcher { reference, .. } => walk_expression(reference, visitor)?,
        Expression::FunctionInvocation { arguments, .. } => {
            for argument in arguments {
                walk_expression(argument, visitor)?;
            }
        }
        Expression::List(items)
        | Expression::Conjunction(items)
        | Expression::Disjunction(items)
        | Expression::ExclusiveDisjunction(items) => {
            for item in items {
                walk_expression(item, visitor)?;
            }
        }
        Expression::Map(entries) => {
            for (_, value) in entries {
                walk_expression(value, visitor)?;
            }
        }
        Expression::Case {
            subject,
            alternatives,
            default,
        } => {
            walk_optional(subject.as_deref(), visitor)?;
            for alternative in alternatives {
                walk_expression(&alternative.when, visitor)?;
                walk_expression(&alternative.then, visitor)?;
            }
            walk_optional(default.as_deref(), visitor)?;
        }
        Expression::PatternPredicate(part) => walk_pattern_part(part, visitor)?,
        Expression::Parenthetical(inner)
        | Expression::Negation(inner)
        | Expression::Negative(inner) => walk_expression(inner, visitor)?,
        Expression::Comparison { left, partials } => {
            walk_expression(left, visitor)?;
            for partial in partials {
                walk_expression(&partial.right, visitor)?;
            }
        }
        Expression::NullCheck { expression, .. } => walk_expression(expression, visitor)?,
        Expression::Arithmetic { left, partials } => {
            walk_expression(left, visitor)?;
            for partial in partials {
                walk_expression(&partial.right, visitor)?;
            }
        }
    }

    visitor.exit(node)
}
