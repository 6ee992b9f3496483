//! Writes a syntax tree back out as Cypher text.
//!
//! The output is normalized: lowercase keywords, single spaces, and
//! single-quoted strings. With `strip_literals` every literal value is
//! replaced by [`STRIPPED_LITERAL`] so the text can be logged without
//! leaking user data.

use std::fmt::Write;

use crate::cypher::model::*;
use crate::cypher::ParseError;

/// Placeholder written in place of literal values by a stripping emitter.
pub const STRIPPED_LITERAL: &str = "$STRIPPED";

type FmtResult = std::fmt::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Emitter {
    strip_literals: bool,
}

impl Emitter {
    pub fn new(strip_literals: bool) -> Self {
        Self { strip_literals }
    }

    /// An emitter that reproduces the query verbatim.
    pub fn verbatim() -> Self {
        Self::new(false)
    }

    /// An emitter that replaces every literal with a placeholder.
    pub fn stripped() -> Self {
        Self::new(true)
    }

    pub fn emit(&self, query: &Query) -> Result<String, ParseError> {
        let mut out = String::new();
        self.write_query(query, &mut out)?;
        Ok(out)
    }

    pub fn emit_expression(&self, expression: &Expression) -> Result<String, ParseError> {
        let mut out = String::new();
        self.write_expression(expression, &mut out)?;
        Ok(out)
    }

    fn write_query(&self, query: &Query, out: &mut String) -> FmtResult {
        self.write_single_query(&query.first, out)?;
        for union in &query.unions {
            out.push_str(if union.all { " union all " } else { " union " });
            self.write_single_query(&union.query, out)?;
        }
        Ok(())
    }

    fn write_single_query(&self, query: &SingleQuery, out: &mut String) -> FmtResult {
        for (idx, clause) in query.clauses.iter().enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            self.write_clause(clause, out)?;
        }
        Ok(())
    }

    fn write_clause(&self, clause: &Clause, out: &mut String) -> FmtResult {
        match clause {
            Clause::Match(m) => {
                out.push_str(if m.optional { "optional match " } else { "match " });
                self.write_pattern(&m.pattern, out)?;
                self.write_where(m.where_clause.as_ref(), out)?;
            }
            Clause::Unwind(unwind) => {
                out.push_str("unwind ");
                self.write_expression(&unwind.expression, out)?;
                out.push_str(" as ");
                write_name(&unwind.variable, out);
            }
            Clause::With(with) => {
                out.push_str("with ");
                self.write_projection(&with.projection, out)?;
                self.write_where(with.where_clause.as_ref(), out)?;
            }
            Clause::Return(ret) => {
                out.push_str("return ");
                self.write_projection(&ret.projection, out)?;
            }
            Clause::Create(create) => {
                out.push_str("create ");
                self.write_pattern(&create.pattern, out)?;
            }
            Clause::Merge(merge) => {
                out.push_str("merge ");
                self.write_pattern_part(&merge.pattern, out)?;
                for action in &merge.actions {
                    out.push_str(if action.on_create {
                        " on create set "
                    } else {
                        " on match set "
                    });
                    self.write_set_items(&action.items, out)?;
                }
            }
            Clause::Set(set) => {
                out.push_str("set ");
                self.write_set_items(&set.items, out)?;
            }
            Clause::Delete(delete) => {
                out.push_str(if delete.detach { "detach delete " } else { "delete " });
                self.write_list(&delete.expressions, out)?;
            }
            Clause::Remove(remove) => {
                out.push_str("remove ");
                for (idx, item) in remove.items.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    match item {
                        RemoveItem::Property(expression) => self.write_expression(expression, out)?,
                        RemoveItem::Kinds { variable, kinds } => {
                            write_name(variable, out);
                            write_kinds(kinds, ":", out);
                        }
                    }
                }
            }
            Clause::Call(call) => {
                write!(out, "call {}", call.name)?;
                if let Some(arguments) = &call.arguments {
                    out.push('(');
                    self.write_list(arguments, out)?;
                    out.push(')');
                }
                if !call.yields.is_empty() {
                    out.push_str(" yield ");
                    for (idx, item) in call.yields.iter().enumerate() {
                        if idx > 0 {
                            out.push_str(", ");
                        }
                        write_name(&item.field, out);
                        if let Some(alias) = &item.alias {
                            out.push_str(" as ");
                            write_name(alias, out);
                        }
                    }
                }
                self.write_where(call.where_clause.as_ref(), out)?;
            }
        }
        Ok(())
    }

    fn write_where(&self, expression: Option<&Expression>, out: &mut String) -> FmtResult {
        if let Some(expression) = expression {
            out.push_str(" where ");
            self.write_expression(expression, out)?;
        }
        Ok(())
    }

    fn write_set_items(&self, items: &[SetItem], out: &mut String) -> FmtResult {
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            match item {
                SetItem::Property { target, value } => {
                    self.write_expression(target, out)?;
                    out.push_str(" = ");
                    self.write_expression(value, out)?;
                }
                SetItem::MergeProperties { variable, value } => {
                    write_name(variable, out);
                    out.push_str(" += ");
                    self.write_expression(value, out)?;
                }
                SetItem::ReplaceProperties { variable, value } => {
                    write_name(variable, out);
                    out.push_str(" = ");
                    self.write_expression(value, out)?;
                }
                SetItem::Kinds { variable, kinds } => {
                    write_name(variable, out);
                    write_kinds(kinds, ":", out);
                }
            }
        }
        Ok(())
    }

    fn write_projection(&self, projection: &Projection, out: &mut String) -> FmtResult {
        if projection.distinct {
            out.push_str("distinct ");
        }

        match &projection.items {
            ProjectionItems::All => out.push('*'),
            ProjectionItems::Items(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    self.write_expression(&item.expression, out)?;
                    if let Some(alias) = &item.alias {
                        out.push_str(" as ");
                        write_name(alias, out);
                    }
                }
            }
        }

        if !projection.order.is_empty() {
            out.push_str(" order by ");
            for (idx, sort) in projection.order.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                self.write_expression(&sort.expression, out)?;
                if !sort.ascending {
                    out.push_str(" desc");
                }
            }
        }
        if let Some(skip) = &projection.skip {
            out.push_str(" skip ");
            self.write_expression(skip, out)?;
        }
        if let Some(limit) = &projection.limit {
            out.push_str(" limit ");
            self.write_expression(limit, out)?;
        }
        Ok(())
    }

    fn write_pattern(&self, pattern: &[PatternPart], out: &mut String) -> FmtResult {
        for (idx, part) in pattern.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            self.write_pattern_part(part, out)?;
        }
        Ok(())
    }

    fn write_pattern_part(&self, part: &PatternPart, out: &mut String) -> FmtResult {
        if let Some(variable) = &part.variable {
            write_name(variable, out);
            out.push_str(" = ");
        }

        let wrapper = match part.search {
            PathSearch::Walk => None,
            PathSearch::ShortestPath => Some("shortestPath("),
            PathSearch::AllShortestPaths => Some("allShortestPaths("),
        };
        if let Some(prefix) = wrapper {
            out.push_str(prefix);
        }

        self.write_node_pattern(&part.start, out)?;
        for step in &part.chain {
            self.write_relationship_pattern(&step.relationship, out)?;
            self.write_node_pattern(&step.node, out)?;
        }

        if wrapper.is_some() {
            out.push(')');
        }
        Ok(())
    }

    fn write_node_pattern(&self, node: &NodePattern, out: &mut String) -> FmtResult {
        out.push('(');
        if let Some(variable) = &node.variable {
            write_name(variable, out);
        }
        write_kinds(&node.kinds, ":", out);
        if let Some(properties) = &node.properties {
            if node.variable.is_some() || !node.kinds.is_empty() {
                out.push(' ');
            }
            self.write_expression(properties, out)?;
        }
        out.push(')');
        Ok(())
    }

    fn write_relationship_pattern(
        &self,
        relationship: &RelationshipPattern,
        out: &mut String,
    ) -> FmtResult {
        out.push_str(if relationship.direction == Direction::Inbound {
            "<-"
        } else {
            "-"
        });

        let has_detail = relationship.variable.is_some()
            || !relationship.kinds.is_empty()
            || relationship.range.is_some()
            || relationship.properties.is_some();

        if has_detail {
            out.push('[');
            if let Some(variable) = &relationship.variable {
                write_name(variable, out);
            }
            if !relationship.kinds.is_empty() {
                out.push(':');
                for (idx, kind) in relationship.kinds.iter().enumerate() {
                    if idx > 0 {
                        out.push('|');
                    }
                    write_name(kind, out);
                }
            }
            if let Some(range) = &relationship.range {
                write_range(range, out)?;
            }
            if let Some(properties) = &relationship.properties {
                out.push(' ');
                self.write_expression(properties, out)?;
            }
            out.push(']');
        }

        out.push_str(if relationship.direction == Direction::Outbound {
            "->"
        } else {
            "-"
        });
        Ok(())
    }

    fn write_list(&self, expressions: &[Expression], out: &mut String) -> FmtResult {
        for (idx, expression) in expressions.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            self.write_expression(expression, out)?;
        }
        Ok(())
    }

    fn write_joined(&self, expressions: &[Expression], sep: &str, out: &mut String) -> FmtResult {
        for (idx, expression) in expressions.iter().enumerate() {
            if idx > 0 {
                out.push_str(sep);
            }
            self.write_expression(expression, out)?;
        }
        Ok(())
    }

    fn write_literal(&self, literal: &Literal, out: &mut String) -> FmtResult {
        if self.strip_literals {
            out.push_str(STRIPPED_LITERAL);
            return Ok(());
        }

        match literal {
            Literal::Null => out.push_str("null"),
            Literal::Bool(value) => write!(out, "{}", value)?,
            Literal::Integer(value) => write!(out, "{}", value)?,
            Literal::Float(value) => write!(out, "{:?}", value)?,
            Literal::String(value) => {
                out.push('\'');
                for c in value.chars() {
                    match c {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
        }
        Ok(())
    }

    fn write_expression(&self, expression: &Expression, out: &mut String) -> FmtResult {
        match expression {
            Expression::Literal(literal) => self.write_literal(literal, out)?,
            Expression::Parameter(name) => write!(out, "${}", name)?,
            Expression::Variable(name) => write_name(name, out),
            Expression::PropertyLookup { atom, key } => {
                self.write_expression(atom, out)?;
                out.push('.');
                write_name(key, out);
            }
            Expression::KindMatcher { reference, kinds } => {
                self.write_expression(reference, out)?;
                write_kinds(kinds, ":", out);
            }
            Expression::FunctionInvocation {
                name,
                distinct,
                arguments,
            } => {
                out.push_str(name);
                out.push('(');
                if *distinct {
                    out.push_str("distinct ");
                }
                self.write_list(arguments, out)?;
                out.push(')');
            }
            Expression::CountStar => out.push_str("count(*)"),
            Expression::List(items) => {
                out.push('[');
                self.write_list(items, out)?;
                out.push(']');
            }
            Expression::Map(entries) => {
                out.push('{');
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    write_name(key, out);
                    out.push_str(": ");
                    self.write_expression(value, out)?;
                }
                out.push('}');
            }
            Expression::Case {
                subject,
                alternatives,
                default,
            } => {
                out.push_str("case");
                if let Some(subject) = subject {
                    out.push(' ');
                    self.write_expression(subject, out)?;
                }
                for alternative in alternatives {
                    out.push_str(" when ");
                    self.write_expression(&alternative.when, out)?;
                    out.push_str(" then ");
                    self.write_expression(&alternative.then, out)?;
                }
                if let Some(default) = default {
                    out.push_str(" else ");
                    self.write_expression(default, out)?;
                }
                out.push_str(" end");
            }
            Expression::PatternPredicate(part) => self.write_pattern_part(part, out)?,
            Expression::Parenthetical(inner) => {
                out.push('(');
                self.write_expression(inner, out)?;
                out.push(')');
            }
            Expression::Negation(inner) => {
                out.push_str("not ");
                self.write_expression(inner, out)?;
            }
            Expression::Negative(inner) => {
                out.push('-');
                self.write_expression(inner, out)?;
            }
            Expression::Conjunction(items) => self.write_joined(items, " and ", out)?,
            Expression::Disjunction(items) => self.write_joined(items, " or ", out)?,
            Expression::ExclusiveDisjunction(items) => self.write_joined(items, " xor ", out)?,
            Expression::Comparison { left, partials } => {
                self.write_expression(left, out)?;
                for partial in partials {
                    write!(out, " {} ", partial.operator.as_str())?;
                    self.write_expression(&partial.right, out)?;
                }
            }
            Expression::NullCheck {
                expression,
                negated,
            } => {
                self.write_expression(expression, out)?;
                out.push_str(if *negated { " is not null" } else { " is null" });
            }
            Expression::Arithmetic { left, partials } => {
                self.write_expression(left, out)?;
                for partial in partials {
                    write!(out, " {} ", partial.operator.as_str())?;
                    self.write_expression(&partial.right, out)?;
                }
            }
        }
        Ok(())
    }
}

fn write_range(range: &PatternRange, out: &mut String) -> FmtResult {
    out.push('*');
    match (range.start, range.end) {
        (Some(start), Some(end)) if start == end => write!(out, "{}", start),
        (start, end) => {
            if let Some(start) = start {
                write!(out, "{}", start)?;
            }
            out.push_str("..");
            if let Some(end) = end {
                write!(out, "{}", end)?;
            }
            Ok(())
        }
    }
}

fn write_kinds(kinds: &[String], prefix: &str, out: &mut String) {
    for kind in kinds {
        out.push_str(prefix);
        write_name(kind, out);
    }
}

fn write_name(name: &str, out: &mut String) {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        out.push_str(name);
    } else {
        out.push('`');
        out.push_str(&name.replace('`', "``"));
        out.push('`');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parser::parse_query;

    fn verbatim(text: &str) -> String {
        Emitter::verbatim().emit(&parse_query(text).unwrap()).unwrap()
    }

    fn stripped(text: &str) -> String {
        Emitter::stripped().emit(&parse_query(text).unwrap()).unwrap()
    }

    #[test]
    fn test_normalizes_keywords_and_spacing() {
        assert_eq!(
            verbatim("MATCH   (n:User)\nWHERE n.name = 'ADMIN@CORP'   RETURN n LIMIT 10"),
            "match (n:User) where n.name = 'ADMIN@CORP' return n limit 10"
        );
    }

    #[test]
    fn test_relationship_patterns() {
        assert_eq!(
            verbatim("MATCH p=(a)-[:HasSession*..]->()<-[r:MemberOf*1..3]-(b)--(c) RETURN p"),
            "match p = (a)-[:HasSession*..]->()<-[r:MemberOf*1..3]-(b)--(c) return p"
        );
        assert_eq!(
            verbatim("MATCH p = allShortestPaths((a)-[*]->(b)) RETURN p"),
            "match p = allShortestPaths((a)-[*..]->(b)) return p"
        );
    }

    #[test]
    fn test_stripping_replaces_every_literal() {
        assert_eq!(
            stripped("MATCH (n:User {name: 'bob'}) WHERE n.age > 30 AND n.enabled = true RETURN n LIMIT 5"),
            "match (n:User {name: $STRIPPED}) where n.age > $STRIPPED and n.enabled = $STRIPPED return n limit $STRIPPED"
        );
    }

    #[test]
    fn test_null_checks_are_not_stripped() {
        assert_eq!(
            stripped("MATCH (n) WHERE n.email IS NULL RETURN n"),
            "match (n) where n.email is null return n"
        );
    }

    #[test]
    fn test_emitted_text_reparses() {
        let text = "MATCH (n:Computer) WHERE n.name ENDS WITH '.CORP' OR NOT (n)-[:AdminTo]->(:Computer) \
                    WITH n, count(*) AS c ORDER BY c DESC RETURN DISTINCT n.name AS name, \
                    CASE WHEN c > 1 THEN 'many' ELSE 'one' END AS amount SKIP 1 LIMIT 2";
        let first = verbatim(text);
        assert_eq!(verbatim(&first), first);
    }

    #[test]
    fn test_quotes_unusual_names() {
        assert_eq!(
            verbatim("MATCH (n) RETURN n.`display name` AS `the name`"),
            "match (n) return n.`display name` as `the name`"
        );
    }
}
