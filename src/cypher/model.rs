//! Syntax tree for the accepted Cypher subset.

/// A complete query: one or more single queries joined by `UNION`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub first: SingleQuery,
    pub unions: Vec<Union>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub all: bool,
    pub query: SingleQuery,
}

impl Query {
    /// Every single query in source order.
    pub fn single_queries(&self) -> impl Iterator<Item = &SingleQuery> {
        std::iter::once(&self.first).chain(self.unions.iter().map(|u| &u.query))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleQuery {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(Match),
    Unwind(Unwind),
    With(With),
    Return(Return),
    Create(Create),
    Merge(Merge),
    Set(Set),
    Delete(Delete),
    Remove(Remove),
    Call(ProcedureCall),
}

impl Clause {
    /// True for clauses that write to the graph.
    pub fn is_updating(&self) -> bool {
        matches!(
            self,
            Clause::Create(_) | Clause::Merge(_) | Clause::Set(_) | Clause::Delete(_) | Clause::Remove(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub optional: bool,
    pub pattern: Vec<PatternPart>,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unwind {
    pub expression: Expression,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub projection: Projection,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub distinct: bool,
    pub items: ProjectionItems,
    pub order: Vec<SortItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItems {
    /// `RETURN *`
    All,
    Items(Vec<ProjectionItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expression: Expression,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expression: Expression,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Create {
    pub pattern: Vec<PatternPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub pattern: PatternPart,
    pub actions: Vec<MergeAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeAction {
    pub on_create: bool,
    pub items: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    pub items: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// `n.prop = value`
    Property { target: Expression, value: Expression },
    /// `n += {map}`
    MergeProperties { variable: String, value: Expression },
    /// `n = {map}`
    ReplaceProperties { variable: String, value: Expression },
    /// `n:Kind`
    Kinds { variable: String, kinds: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub detach: bool,
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Remove {
    pub items: Vec<RemoveItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Property(Expression),
    Kinds { variable: String, kinds: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    pub name: String,
    /// `None` for an implicit invocation without parentheses.
    pub arguments: Option<Vec<Expression>>,
    pub yields: Vec<YieldItem>,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YieldItem {
    pub field: String,
    pub alias: Option<String>,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSearch {
    Walk,
    ShortestPath,
    AllShortestPaths,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternPart {
    pub variable: Option<String>,
    pub search: PathSearch,
    pub start: NodePattern,
    pub chain: Vec<PatternStep>,
}

/// One hop of a pattern: a relationship and the node it leads to.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStep {
    pub relationship: RelationshipPattern,
    pub node: NodePattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub kinds: Vec<String>,
    /// A map literal or parameter.
    pub properties: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    pub kinds: Vec<String>,
    pub direction: Direction,
    pub range: Option<PatternRange>,
    pub properties: Option<Expression>,
}

/// Variable-length bounds. `None` on either side means open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl PatternRange {
    pub fn is_unbounded(&self) -> bool {
        self.end.is_none()
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    RegexMatch,
    StartsWith,
    EndsWith,
    Contains,
    In,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::NotEquals => "<>",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqual => "<=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqual => ">=",
            ComparisonOperator::RegexMatch => "=~",
            ComparisonOperator::StartsWith => "starts with",
            ComparisonOperator::EndsWith => "ends with",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::In => "in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl ArithmeticOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
            ArithmeticOperator::Modulo => "%",
            ArithmeticOperator::Power => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialComparison {
    pub operator: ComparisonOperator,
    pub right: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialArithmetic {
    pub operator: ArithmeticOperator,
    pub right: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseAlternative {
    pub when: Expression,
    pub then: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Parameter(String),
    Variable(String),
    PropertyLookup {
        atom: Box<Expression>,
        key: String,
    },
    /// `n:Kind1:Kind2`
    KindMatcher {
        reference: Box<Expression>,
        kinds: Vec<String>,
    },
    FunctionInvocation {
        name: String,
        distinct: bool,
        arguments: Vec<Expression>,
    },
    CountStar,
    List(Vec<Expression>),
    Map(Vec<(String, Expression)>),
    Case {
        subject: Option<Box<Expression>>,
        alternatives: Vec<CaseAlternative>,
        default: Option<Box<Expression>>,
    },
    /// A relationship pattern used as a boolean predicate.
    PatternPredicate(Box<PatternPart>),
    Parenthetical(Box<Expression>),
    Negation(Box<Expression>),
    Negative(Box<Expression>),
    Conjunction(Vec<Expression>),
    Disjunction(Vec<Expression>),
    ExclusiveDisjunction(Vec<Expression>),
    Comparison {
        left: Box<Expression>,
        partials: Vec<PartialComparison>,
    },
    NullCheck {
        expression: Box<Expression>,
        negated: bool,
    },
    Arithmetic {
        left: Box<Expression>,
        partials: Vec<PartialArithmetic>,
    },
}
