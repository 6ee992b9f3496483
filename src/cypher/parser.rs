//! Builds the [`Query`] syntax tree from pest parse pairs.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::cypher::model::*;
use crate::cypher::ParseError;

#[derive(Parser)]
#[grammar = "cypher/cypher.pest"]
struct CypherParser;

type Result<T> = std::result::Result<T, ParseError>;

/// Deepest bracket or `CASE` nesting accepted in user text.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Most `NOT`s or postfix lookups accepted in a single chain.
const MAX_CHAIN_LENGTH: usize = 8;

/// Parses a Cypher query without applying any filters.
///
/// # Example
///
/// ```ignore
/// let query = parse_query("MATCH (n:User) WHERE n.enabled RETURN n LIMIT 10")?;
/// assert_eq!(query.first.clauses.len(), 2);
/// ```
pub fn parse_query(text: &str) -> Result<Query> {
    check_nesting(text)?;

    let cypher = CypherParser::parse(Rule::Cypher, text)
        .map_err(|e| ParseError::InvalidSyntax(format!("{}", e)))?
        .next()
        .ok_or_else(|| ParseError::InvalidSyntax("empty query".to_string()))?;

    let query = cypher
        .into_inner()
        .find(|p| p.as_rule() == Rule::Query)
        .ok_or_else(|| ParseError::InvalidSyntax("empty query".to_string()))?;

    build_query(query)
}

/// Rejects text nested deeper than [`MAX_NESTING_DEPTH`].
///
/// Parsing, walking and emitting all recurse per nesting level, so the
/// depth is bounded before any of them run. Brackets inside string literals,
/// escaped names and comments are ignored. `CASE` opens a level that the
/// matching `END` closes.
fn check_nesting(text: &str) -> Result<()> {
    let chars: Vec<char> = text.chars().collect();
    let mut open: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            '`' => {
                i += 1;
                while i < chars.len() {
                    if chars[i] == '`' {
                        if chars.get(i + 1) == Some(&'`') {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 1;
            }
            '(' | '[' | '{' => open.push(c),
            ')' | ']' | '}' => {
                if open.last().is_some_and(|top| *top != 'C') {
                    open.pop();
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i + 1 < chars.len() && (chars[i + 1].is_ascii_alphanumeric() || chars[i + 1] == '_') {
                    i += 1;
                }
                let word: String = chars[start..=i].iter().collect();
                let (before, after) = neighbours(&chars, start, i + 1);
                // property keys, labels and map keys are never keywords
                let keyword = !matches!(before, Some('.' | ':' | '|')) && after != Some(':');
                if keyword && word.eq_ignore_ascii_case("case") {
                    open.push('C');
                } else if keyword
                    && word.eq_ignore_ascii_case("end")
                    && after != Some('(')
                    && open.last() == Some(&'C')
                {
                    open.pop();
                }
            }
            _ => {}
        }

        if open.len() > MAX_NESTING_DEPTH {
            return Err(ParseError::InvalidSyntax(format!(
                "query nesting exceeds the maximum depth of {}",
                MAX_NESTING_DEPTH
            )));
        }
        i += 1;
    }
    Ok(())
}

/// Nearest non-whitespace characters around `chars[start..end]`.
fn neighbours(chars: &[char], start: usize, end: usize) -> (Option<char>, Option<char>) {
    let before = chars[..start].iter().rev().find(|c| !c.is_whitespace()).copied();
    let after = chars[end..].iter().find(|c| !c.is_whitespace()).copied();
    (before, after)
}

fn chain_too_long(pair: &Pair<Rule>) -> ParseError {
    ParseError::InvalidSyntax(format!(
        "more than {} chained operators near '{}'",
        MAX_CHAIN_LENGTH,
        pair.as_str()
    ))
}

fn unexpected(pair: &Pair<Rule>) -> ParseError {
    ParseError::InvalidSyntax(format!(
        "unexpected {:?} near '{}'",
        pair.as_rule(),
        pair.as_str()
    ))
}

fn has(pair: &Pair<Rule>, rule: Rule) -> bool {
    pair.clone().into_inner().any(|p| p.as_rule() == rule)
}

fn child<'i>(pair: &Pair<'i, Rule>, rule: Rule) -> Result<Pair<'i, Rule>> {
    pair.clone()
        .into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| {
            ParseError::InvalidSyntax(format!("expected {:?} in '{}'", rule, pair.as_str()))
        })
}

fn first_inner<'i>(pair: &Pair<'i, Rule>) -> Result<Pair<'i, Rule>> {
    pair.clone()
        .into_inner()
        .next()
        .ok_or_else(|| unexpected(pair))
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

fn unescape_name(raw: &str) -> String {
    match raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        Some(inner) => inner.replace("``", "`"),
        None => raw.to_string(),
    }
}

fn variable_name(pair: &Pair<Rule>) -> String {
    unescape_name(pair.as_str())
}

fn schema_names(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::SchemaName)
        .map(|p| unescape_name(p.as_str()))
        .collect()
}

fn unescape_string(raw: &str) -> String {
    // Strip the surrounding quotes.
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or("");
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Queries and clauses
// ---------------------------------------------------------------------------

fn build_query(pair: Pair<Rule>) -> Result<Query> {
    let mut first = None;
    let mut unions = Vec::new();
    let mut pending_union = None;

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::SingleQuery => {
                let query = build_single_query(inner)?;
                match pending_union.take() {
                    Some(all) => unions.push(Union { all, query }),
                    None => first = Some(query),
                }
            }
            Rule::Union => pending_union = Some(has(&inner, Rule::ALL)),
            _ => return Err(unexpected(&inner)),
        }
    }

    let first = first.ok_or_else(|| unexpected(&pair))?;
    Ok(Query { first, unions })
}

fn build_single_query(pair: Pair<Rule>) -> Result<SingleQuery> {
    let clauses = pair
        .into_inner()
        .map(build_clause)
        .collect::<Result<Vec<_>>>()?;
    Ok(SingleQuery { clauses })
}

fn build_clause(pair: Pair<Rule>) -> Result<Clause> {
    match pair.as_rule() {
        Rule::Match => build_match(pair).map(Clause::Match),
        Rule::Unwind => build_unwind(pair).map(Clause::Unwind),
        Rule::With => build_with(pair).map(Clause::With),
        Rule::Return => build_projection(child(&pair, Rule::ProjectionBody)?)
            .map(|projection| Clause::Return(Return { projection })),
        Rule::Create => build_pattern(child(&pair, Rule::Pattern)?)
            .map(|pattern| Clause::Create(Create { pattern })),
        Rule::Merge => build_merge(pair).map(Clause::Merge),
        Rule::Set => build_set_items(pair).map(|items| Clause::Set(Set { items })),
        Rule::Delete => build_delete(pair).map(Clause::Delete),
        Rule::Remove => build_remove(pair).map(Clause::Remove),
        Rule::Call => build_call(pair).map(Clause::Call),
        _ => Err(unexpected(&pair)),
    }
}

fn build_where(pair: Pair<Rule>) -> Result<Expression> {
    build_expression(child(&pair, Rule::Expression)?)
}

fn build_match(pair: Pair<Rule>) -> Result<Match> {
    let mut optional = false;
    let mut pattern = Vec::new();
    let mut where_clause = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::OPTIONAL => optional = true,
            Rule::Pattern => pattern = build_pattern(inner)?,
            Rule::Where => where_clause = Some(build_where(inner)?),
            _ => {}
        }
    }

    Ok(Match {
        optional,
        pattern,
        where_clause,
    })
}

fn build_unwind(pair: Pair<Rule>) -> Result<Unwind> {
    Ok(Unwind {
        expression: build_expression(child(&pair, Rule::Expression)?)?,
        variable: variable_name(&child(&pair, Rule::Variable)?),
    })
}

fn build_with(pair: Pair<Rule>) -> Result<With> {
    let projection = build_projection(child(&pair, Rule::ProjectionBody)?)?;
    let where_clause = match pair.into_inner().find(|p| p.as_rule() == Rule::Where) {
        Some(inner) => Some(build_where(inner)?),
        None => None,
    };
    Ok(With {
        projection,
        where_clause,
    })
}

fn build_projection(pair: Pair<Rule>) -> Result<Projection> {
    let mut projection = Projection {
        distinct: false,
        items: ProjectionItems::Items(Vec::new()),
        order: Vec::new(),
        skip: None,
        limit: None,
    };

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::DISTINCT => projection.distinct = true,
            Rule::ProjectionItems => projection.items = build_projection_items(inner)?,
            Rule::Order => {
                projection.order = inner
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::SortItem)
                    .map(build_sort_item)
                    .collect::<Result<Vec<_>>>()?;
            }
            Rule::Skip => projection.skip = Some(build_expression(child(&inner, Rule::Expression)?)?),
            Rule::Limit => {
                projection.limit = Some(build_expression(child(&inner, Rule::Expression)?)?)
            }
            _ => {}
        }
    }

    Ok(projection)
}

fn build_projection_items(pair: Pair<Rule>) -> Result<ProjectionItems> {
    if has(&pair, Rule::ProjectionStar) {
        return Ok(ProjectionItems::All);
    }

    let items = pair
        .into_inner()
        .map(|item| {
            let mut expression = None;
            let mut alias = None;
            for inner in item.into_inner() {
                match inner.as_rule() {
                    Rule::Expression => expression = Some(build_expression(inner)?),
                    Rule::Variable => alias = Some(variable_name(&inner)),
                    _ => {}
                }
            }
            let expression = expression
                .ok_or_else(|| ParseError::InvalidSyntax("empty projection item".to_string()))?;
            Ok(ProjectionItem { expression, alias })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProjectionItems::Items(items))
}

fn build_sort_item(pair: Pair<Rule>) -> Result<SortItem> {
    let expression = build_expression(child(&pair, Rule::Expression)?)?;
    let ascending = match pair.into_inner().find(|p| p.as_rule() == Rule::SortDirection) {
        Some(direction) => !(has(&direction, Rule::DESC) || has(&direction, Rule::DESCENDING)),
        None => true,
    };
    Ok(SortItem {
        expression,
        ascending,
    })
}

fn build_merge(pair: Pair<Rule>) -> Result<Merge> {
    let pattern = build_pattern_part(child(&pair, Rule::PatternPart)?)?;
    let actions = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::MergeAction)
        .map(|action| {
            let on_create = has(&action, Rule::OnCreate);
            let items = build_set_items(action)?;
            Ok(MergeAction { on_create, items })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Merge { pattern, actions })
}

fn build_set_items(pair: Pair<Rule>) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();

    for inner in pair.into_inner() {
        let item = match inner.as_rule() {
            Rule::SetProperty => SetItem::Property {
                target: build_property_expression(child(&inner, Rule::PropertyExpression)?)?,
                value: build_expression(child(&inner, Rule::Expression)?)?,
            },
            Rule::SetMergeProperties => SetItem::MergeProperties {
                variable: variable_name(&child(&inner, Rule::Variable)?),
                value: build_expression(child(&inner, Rule::Expression)?)?,
            },
            Rule::SetReplaceProperties => SetItem::ReplaceProperties {
                variable: variable_name(&child(&inner, Rule::Variable)?),
                value: build_expression(child(&inner, Rule::Expression)?)?,
            },
            Rule::SetKinds => SetItem::Kinds {
                variable: variable_name(&child(&inner, Rule::Variable)?),
                kinds: schema_names(child(&inner, Rule::NodeLabels)?),
            },
            _ => continue,
        };
        items.push(item);
    }

    Ok(items)
}

fn build_property_expression(pair: Pair<Rule>) -> Result<Expression> {
    let mut inner = pair.into_inner();
    let variable = inner
        .next()
        .ok_or_else(|| ParseError::InvalidSyntax("empty property expression".to_string()))?;
    let mut expression = Expression::Variable(variable_name(&variable));

    for lookup in inner {
        let key = unescape_name(child(&lookup, Rule::SchemaName)?.as_str());
        expression = Expression::PropertyLookup {
            atom: Box::new(expression),
            key,
        };
    }

    Ok(expression)
}

fn build_delete(pair: Pair<Rule>) -> Result<Delete> {
    let detach = has(&pair, Rule::DETACH);
    let expressions = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::Expression)
        .map(build_expression)
        .collect::<Result<Vec<_>>>()?;
    Ok(Delete {
        detach,
        expressions,
    })
}

fn build_remove(pair: Pair<Rule>) -> Result<Remove> {
    let mut items = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::RemoveKinds => items.push(RemoveItem::Kinds {
                variable: variable_name(&child(&inner, Rule::Variable)?),
                kinds: schema_names(child(&inner, Rule::NodeLabels)?),
            }),
            Rule::RemoveProperty => items.push(RemoveItem::Property(build_property_expression(
                child(&inner, Rule::PropertyExpression)?,
            )?)),
            _ => {}
        }
    }

    Ok(Remove { items })
}

fn build_call(pair: Pair<Rule>) -> Result<ProcedureCall> {
    let mut call = ProcedureCall {
        name: String::new(),
        arguments: None,
        yields: Vec::new(),
        where_clause: None,
    };

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ProcedureName => call.name = inner.as_str().to_string(),
            Rule::ProcedureArguments => {
                call.arguments = Some(
                    inner
                        .into_inner()
                        .map(build_expression)
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            Rule::YieldItems => {
                for item in inner.into_inner() {
                    match item.as_rule() {
                        Rule::YieldItem => {
                            let field = unescape_name(child(&item, Rule::SchemaName)?.as_str());
                            let alias = item
                                .into_inner()
                                .find(|p| p.as_rule() == Rule::Variable)
                                .map(|p| variable_name(&p));
                            call.yields.push(YieldItem { field, alias });
                        }
                        Rule::Where => call.where_clause = Some(build_where(item)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(call)
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn build_pattern(pair: Pair<Rule>) -> Result<Vec<PatternPart>> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::PatternPart)
        .map(build_pattern_part)
        .collect()
}

fn build_pattern_part(pair: Pair<Rule>) -> Result<PatternPart> {
    let mut variable = None;
    let mut element = None;

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::Variable => variable = Some(variable_name(&inner)),
            Rule::ShortestPathPattern => {
                element = Some((PathSearch::ShortestPath, child(&inner, Rule::PatternChain)?))
            }
            Rule::AllShortestPathsPattern => {
                element = Some((
                    PathSearch::AllShortestPaths,
                    child(&inner, Rule::PatternChain)?,
                ))
            }
            Rule::PatternChain => element = Some((PathSearch::Walk, inner)),
            _ => {}
        }
    }

    let (search, chain_pair) = element.ok_or_else(|| unexpected(&pair))?;
    let (start, chain) = build_chain(chain_pair)?;

    Ok(PatternPart {
        variable,
        search,
        start,
        chain,
    })
}

fn build_chain(pair: Pair<Rule>) -> Result<(NodePattern, Vec<PatternStep>)> {
    let context = pair.clone();
    let mut inner = pair.into_inner();
    let start = build_node_pattern(inner.next().ok_or_else(|| unexpected(&context))?)?;
    let mut chain = Vec::new();

    while let Some(relationship) = inner.next() {
        let node = inner.next().ok_or_else(|| unexpected(&context))?;
        chain.push(PatternStep {
            relationship: build_relationship_pattern(relationship)?,
            node: build_node_pattern(node)?,
        });
    }

    Ok((start, chain))
}

fn build_node_pattern(pair: Pair<Rule>) -> Result<NodePattern> {
    let mut node = NodePattern {
        variable: None,
        kinds: Vec::new(),
        properties: None,
    };

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::Variable => node.variable = Some(variable_name(&inner)),
            Rule::NodeLabels => node.kinds = schema_names(inner),
            Rule::MapLiteral | Rule::Parameter => node.properties = Some(build_atom(inner)?),
            _ => {}
        }
    }

    Ok(node)
}

fn build_relationship_pattern(pair: Pair<Rule>) -> Result<RelationshipPattern> {
    let left = has(&pair, Rule::LeftArrow);
    let right = has(&pair, Rule::RightArrow);
    let direction = match (left, right) {
        (true, false) => Direction::Inbound,
        (false, true) => Direction::Outbound,
        _ => Direction::Both,
    };

    let mut relationship = RelationshipPattern {
        variable: None,
        kinds: Vec::new(),
        direction,
        range: None,
        properties: None,
    };

    if let Some(detail) = pair.into_inner().find(|p| p.as_rule() == Rule::RelationshipDetail) {
        for inner in detail.into_inner() {
            match inner.as_rule() {
                Rule::Variable => relationship.variable = Some(variable_name(&inner)),
                Rule::RelationshipTypes => relationship.kinds = schema_names(inner),
                Rule::RangeLiteral => relationship.range = Some(build_range(inner)?),
                Rule::MapLiteral | Rule::Parameter => {
                    relationship.properties = Some(build_atom(inner)?)
                }
                _ => {}
            }
        }
    }

    Ok(relationship)
}

fn build_range(pair: Pair<Rule>) -> Result<PatternRange> {
    let mut start = None;
    let mut end = None;
    let mut dots = false;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::RangeStart => start = Some(parse_integer(inner.as_str())?),
            Rule::RangeEnd => end = Some(parse_integer(inner.as_str())?),
            Rule::RangeDots => dots = true,
            _ => {}
        }
    }

    // `*n` means exactly n hops.
    if !dots {
        end = start;
    }

    Ok(PatternRange { start, end })
}

fn parse_integer(text: &str) -> Result<i64> {
    text.trim()
        .parse()
        .map_err(|e| ParseError::InvalidSyntax(format!("invalid integer '{}': {}", text, e)))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn build_expression(pair: Pair<Rule>) -> Result<Expression> {
    match pair.as_rule() {
        Rule::Expression => build_expression(first_inner(&pair)?),
        Rule::OrExpression => build_operands(pair, Expression::Disjunction),
        Rule::XorExpression => build_operands(pair, Expression::ExclusiveDisjunction),
        Rule::AndExpression => build_operands(pair, Expression::Conjunction),
        Rule::NotExpression => build_not(pair),
        Rule::ComparisonExpression => build_comparison(pair),
        Rule::AddSubExpression | Rule::MultDivExpression | Rule::PowerExpression => {
            build_arithmetic(pair)
        }
        Rule::UnaryExpression => build_unary(pair),
        Rule::PostfixExpression => build_postfix(pair),
        _ => build_atom(pair),
    }
}

/// Collapses `a OP b OP c` into one n-ary node, or returns the lone operand.
fn build_operands(pair: Pair<Rule>, combine: fn(Vec<Expression>) -> Expression) -> Result<Expression> {
    let context = pair.clone();
    let mut operands = pair
        .into_inner()
        .filter(|p| !matches!(p.as_rule(), Rule::OR | Rule::XOR | Rule::AND))
        .map(build_expression)
        .collect::<Result<Vec<_>>>()?;

    match operands.len() {
        0 => Err(unexpected(&context)),
        1 => Ok(operands.remove(0)),
        _ => Ok(combine(operands)),
    }
}

fn build_not(pair: Pair<Rule>) -> Result<Expression> {
    let mut negations = 0;
    let mut operand = None;

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::NOT => negations += 1,
            _ => operand = Some(build_expression(inner)?),
        }
    }

    if negations > MAX_CHAIN_LENGTH {
        return Err(chain_too_long(&pair));
    }

    let mut expression = operand.ok_or_else(|| unexpected(&pair))?;
    for _ in 0..negations {
        expression = Expression::Negation(Box::new(expression));
    }
    Ok(expression)
}

fn finish_comparison(left: Expression, partials: Vec<PartialComparison>) -> Expression {
    if partials.is_empty() {
        left
    } else {
        Expression::Comparison {
            left: Box::new(left),
            partials,
        }
    }
}

fn build_comparison(pair: Pair<Rule>) -> Result<Expression> {
    let context = pair.clone();
    let mut inner = pair.into_inner();
    let mut left = build_expression(inner.next().ok_or_else(|| unexpected(&context))?)?;
    let mut partials = Vec::new();

    for partial in inner {
        let mut parts = partial.clone().into_inner();
        let operator_pair = parts.next().ok_or_else(|| unexpected(&partial))?;

        let operator = match operator_pair.as_rule() {
            Rule::NullOperator => {
                let negated = has(&operator_pair, Rule::NOT);
                let checked = finish_comparison(left, std::mem::take(&mut partials));
                left = Expression::NullCheck {
                    expression: Box::new(checked),
                    negated,
                };
                continue;
            }
            Rule::ComparisonOperator => match operator_pair.as_str() {
                "=" => ComparisonOperator::Equals,
                "<>" => ComparisonOperator::NotEquals,
                "<" => ComparisonOperator::LessThan,
                "<=" => ComparisonOperator::LessThanOrEqual,
                ">" => ComparisonOperator::GreaterThan,
                ">=" => ComparisonOperator::GreaterThanOrEqual,
                "=~" => ComparisonOperator::RegexMatch,
                _ => return Err(unexpected(&operator_pair)),
            },
            Rule::StringOperator => {
                if has(&operator_pair, Rule::STARTS) {
                    ComparisonOperator::StartsWith
                } else if has(&operator_pair, Rule::ENDS) {
                    ComparisonOperator::EndsWith
                } else if has(&operator_pair, Rule::CONTAINS) {
                    ComparisonOperator::Contains
                } else {
                    ComparisonOperator::In
                }
            }
            _ => return Err(unexpected(&operator_pair)),
        };

        let right = build_expression(parts.next().ok_or_else(|| unexpected(&partial))?)?;
        partials.push(PartialComparison { operator, right });
    }

    Ok(finish_comparison(left, partials))
}

fn build_arithmetic(pair: Pair<Rule>) -> Result<Expression> {
    let is_power = pair.as_rule() == Rule::PowerExpression;
    let context = pair.clone();
    let mut inner = pair.into_inner();
    let left = build_expression(inner.next().ok_or_else(|| unexpected(&context))?)?;
    let mut partials = Vec::new();

    while let Some(next) = inner.next() {
        let (operator, operand) = match next.as_rule() {
            Rule::AddSubOperator | Rule::MultDivOperator => {
                let operator = match next.as_str() {
                    "+" => ArithmeticOperator::Add,
                    "-" => ArithmeticOperator::Subtract,
                    "*" => ArithmeticOperator::Multiply,
                    "/" => ArithmeticOperator::Divide,
                    "%" => ArithmeticOperator::Modulo,
                    _ => return Err(unexpected(&next)),
                };
                (operator, inner.next().ok_or_else(|| unexpected(&context))?)
            }
            // `^` is an anonymous token, so power operands arrive back to back.
            _ if is_power => (ArithmeticOperator::Power, next),
            _ => return Err(unexpected(&next)),
        };

        partials.push(PartialArithmetic {
            operator,
            right: build_expression(operand)?,
        });
    }

    if partials.is_empty() {
        Ok(left)
    } else {
        Ok(Expression::Arithmetic {
            left: Box::new(left),
            partials,
        })
    }
}

fn build_unary(pair: Pair<Rule>) -> Result<Expression> {
    let negative = has(&pair, Rule::UnaryMinus);
    let operand = build_expression(child(&pair, Rule::PostfixExpression)?)?;
    if negative {
        Ok(Expression::Negative(Box::new(operand)))
    } else {
        Ok(operand)
    }
}

fn build_postfix(pair: Pair<Rule>) -> Result<Expression> {
    let context = pair.clone();
    let mut inner = pair.into_inner();
    let mut expression = build_atom(inner.next().ok_or_else(|| unexpected(&context))?)?;

    let postfixes: Vec<_> = inner.collect();
    if postfixes.len() > MAX_CHAIN_LENGTH {
        return Err(chain_too_long(&context));
    }

    for postfix in postfixes {
        expression = match postfix.as_rule() {
            Rule::PropertyLookup => Expression::PropertyLookup {
                atom: Box::new(expression),
                key: unescape_name(child(&postfix, Rule::SchemaName)?.as_str()),
            },
            Rule::NodeLabels => Expression::KindMatcher {
                reference: Box::new(expression),
                kinds: schema_names(postfix),
            },
            _ => return Err(unexpected(&postfix)),
        };
    }

    Ok(expression)
}

fn build_atom(pair: Pair<Rule>) -> Result<Expression> {
    let expression = match pair.as_rule() {
        Rule::NullLiteral => Expression::Literal(Literal::Null),
        Rule::BooleanLiteral => {
            Expression::Literal(Literal::Bool(pair.as_str().eq_ignore_ascii_case("true")))
        }
        Rule::IntegerLiteral => Expression::Literal(Literal::Integer(parse_integer(pair.as_str())?)),
        Rule::DoubleLiteral => {
            let value = pair.as_str().parse().map_err(|e| {
                ParseError::InvalidSyntax(format!("invalid number '{}': {}", pair.as_str(), e))
            })?;
            Expression::Literal(Literal::Float(value))
        }
        Rule::StringLiteral => Expression::Literal(Literal::String(unescape_string(pair.as_str()))),
        Rule::Parameter => Expression::Parameter(pair.as_str().trim_start_matches('$').to_string()),
        Rule::Variable => Expression::Variable(variable_name(&pair)),
        Rule::CountStar => Expression::CountStar,
        Rule::CaseExpression => build_case(pair)?,
        Rule::FunctionInvocation => {
            let name = child(&pair, Rule::FunctionName)?.as_str().to_string();
            let distinct = has(&pair, Rule::DISTINCT);
            let arguments = pair
                .into_inner()
                .filter(|p| p.as_rule() == Rule::Expression)
                .map(build_expression)
                .collect::<Result<Vec<_>>>()?;
            Expression::FunctionInvocation {
                name,
                distinct,
                arguments,
            }
        }
        Rule::PatternPredicate => {
            let (start, chain) = build_chain(pair)?;
            Expression::PatternPredicate(Box::new(PatternPart {
                variable: None,
                search: PathSearch::Walk,
                start,
                chain,
            }))
        }
        Rule::ParenthesizedExpression => Expression::Parenthetical(Box::new(build_expression(
            child(&pair, Rule::Expression)?,
        )?)),
        Rule::ListLiteral => Expression::List(
            pair.into_inner()
                .map(build_expression)
                .collect::<Result<Vec<_>>>()?,
        ),
        Rule::MapLiteral => {
            let entries = pair
                .into_inner()
                .map(|entry| {
                    let key = unescape_name(child(&entry, Rule::SchemaName)?.as_str());
                    let value = build_expression(child(&entry, Rule::Expression)?)?;
                    Ok((key, value))
                })
                .collect::<Result<Vec<_>>>()?;
            Expression::Map(entries)
        }
        _ => return Err(unexpected(&pair)),
    };

    Ok(expression)
}

fn build_case(pair: Pair<Rule>) -> Result<Expression> {
    let mut subject = None;
    let mut alternatives = Vec::new();
    let mut default = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::Expression => subject = Some(Box::new(build_expression(inner)?)),
            Rule::CaseAlternative => {
                let mut parts = inner
                    .clone()
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::Expression);
                let when = parts.next().ok_or_else(|| unexpected(&inner))?;
                let then = parts.next().ok_or_else(|| unexpected(&inner))?;
                alternatives.push(CaseAlternative {
                    when: build_expression(when)?,
                    then: build_expression(then)?,
                });
            }
            Rule::CaseDefault => {
                default = Some(Box::new(build_expression(child(&inner, Rule::Expression)?)?))
            }
            _ => {}
        }
    }

    Ok(Expression::Case {
        subject,
        alternatives,
        default,
    })
}
