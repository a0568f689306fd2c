//! Query tree representation consumed by the pushdown analysis.
//!
//! The host planner hands over its view of the query as a [`QueryTree`]: an
//! arena of [`QueryLevel`]s, one per query level the planner has seen
//! (the top-level query, every subquery in FROM, every set-operation branch).
//! Levels reference each other through [`LevelId`]s stored in
//! [`RangeEntry::Subquery`].
//!
//! Levels are stored children-before-parents: a subquery entry in level `i`
//! may only point at a level `j < i`. [`QueryTree::new`] and deserialization
//! enforce this, so every walk over subquery references strictly descends.
//!
//! The tree is read-only input. Nothing in this crate mutates a level once it
//! has been pushed.

use serde::{Deserialize, Serialize};

use crate::error::ColocationError;

/// 1-based column position. `0` denotes a whole-row reference.
pub type AttrNumber = i16;

/// Attribute number of a whole-row reference (`t.*` passed as a value).
pub const WHOLE_ROW_ATTRIBUTE: AttrNumber = 0;

/// 1-based index of an entry in one level's range table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotIndex(pub u32);

/// Index of a level in the [`QueryTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelId(pub usize);

/// Catalog id of a base relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub u32);

/// Identity assigned once per appearance of a base relation anywhere in the
/// query tree. Stable across levels, unlike [`SlotIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationIdentity(pub i32);

/// Catalog id of a comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(pub u32);

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for LevelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RelationIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Expressions ─────────────────────────────────────────────────────────

/// A column as used inside one query level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Which range entry of the level the column belongs to.
    pub slot: SlotIndex,
    /// Column position within that entry; `0` for a whole-row reference.
    pub attribute: AttrNumber,
    /// How many query levels up the referenced entry lives (0 = this level).
    #[serde(default)]
    pub levels_up: u32,
}

impl ColumnRef {
    pub fn new(slot: SlotIndex, attribute: AttrNumber) -> Self {
        Self {
            slot,
            attribute,
            levels_up: 0,
        }
    }

    pub fn is_whole_row(&self) -> bool {
        self.attribute == WHOLE_ROW_ATTRIBUTE
    }
}

/// Parameter kinds the planner produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Supplied by an outer query level at execution time (lateral refs,
    /// correlated subqueries).
    Exec,
    /// Supplied by the client (`$1`).
    External,
}

/// A parameter reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub kind: ParamKind,
    pub id: i32,
}

/// An expression, reduced to the shapes the analysis distinguishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A plain column reference.
    Column(ColumnRef),
    /// A parameter reference.
    Param(Param),
    /// A type coercion around `arg`.
    Coercion { implicit: bool, arg: Box<Expr> },
    /// An operator application, e.g. `a = b`.
    Operator { operator: OperatorId, args: Vec<Expr> },
    /// A constant, kept as its SQL text.
    Const(String),
    /// A function call.
    Function { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Column reference at this level.
    pub fn column(slot: SlotIndex, attribute: AttrNumber) -> Expr {
        Expr::Column(ColumnRef::new(slot, attribute))
    }

    /// Execution-time parameter reference.
    pub fn exec_param(id: i32) -> Expr {
        Expr::Param(Param {
            kind: ParamKind::Exec,
            id,
        })
    }

    /// Implicit coercion of `arg`, as inserted by the parser for
    /// cross-type comparisons.
    pub fn implicit_cast(arg: Expr) -> Expr {
        Expr::Coercion {
            implicit: true,
            arg: Box::new(arg),
        }
    }

    /// Binary operator application.
    pub fn binary(operator: OperatorId, left: Expr, right: Expr) -> Expr {
        Expr::Operator {
            operator,
            args: vec![left, right],
        }
    }

    /// Peel off implicit coercions. Explicit casts are kept: they change
    /// the value domain the user asked for.
    pub fn strip_implicit_coercions(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Coercion {
            implicit: true,
            arg,
        } = expr
        {
            expr = arg;
        }
        expr
    }

    /// The column this expression is, if it is exactly a column.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(column) => Some(column),
            _ => None,
        }
    }
}

// ── Range entries and target lists ──────────────────────────────────────

/// One entry of a level's range table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RangeEntry {
    /// A base relation scan.
    Relation {
        relation_id: RelationId,
        identity: RelationIdentity,
        #[serde(default)]
        alias: String,
    },
    /// A subquery in FROM, or a set-operation branch.
    Subquery {
        alias: String,
        /// The planned level for this subquery; `None` while it has not been
        /// planned yet.
        query: Option<LevelId>,
        /// Set when the entry is the parent of an append-relation expansion
        /// (pulled-up UNION ALL or inheritance parent).
        #[serde(default)]
        expanded: bool,
    },
    /// Anything else: join entries, functions, VALUES, CTE scans.
    Other { description: String },
}

impl RangeEntry {
    /// Alias used in diagnostics.
    pub fn alias(&self) -> &str {
        match self {
            RangeEntry::Relation { alias, .. } => alias,
            RangeEntry::Subquery { alias, .. } => alias,
            RangeEntry::Other { description } => description,
        }
    }
}

/// One output column of a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// 1-based output position.
    pub position: AttrNumber,
    pub expr: Expr,
    #[serde(default)]
    pub name: Option<String>,
    /// Helper column the planner added for sorting/grouping; not visible to
    /// the level's consumers.
    #[serde(default)]
    pub junk: bool,
}

/// Set-operation tree of a level whose body is `... UNION/INTERSECT/EXCEPT ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperationTree {
    /// A branch, naming the subquery entry in the level's range table.
    Branch(SlotIndex),
    /// Two inputs combined by a set operator.
    Combine {
        op: SetOperator,
        #[serde(default)]
        all: bool,
        left: Box<SetOperationTree>,
        right: Box<SetOperationTree>,
    },
}

impl SetOperationTree {
    /// The operator at the root, `None` for a bare branch.
    pub fn root_operator(&self) -> Option<SetOperator> {
        match self {
            SetOperationTree::Branch(_) => None,
            SetOperationTree::Combine { op, .. } => Some(*op),
        }
    }

    /// Combine two trees.
    pub fn combine(op: SetOperator, all: bool, left: Self, right: Self) -> Self {
        SetOperationTree::Combine {
            op,
            all,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Set operators. UNION and UNION ALL share `Union`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

/// One child of an append-relation expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendRelation {
    /// Slot of the expanded parent entry.
    pub parent_slot: SlotIndex,
    /// Slot of the child entry in the same level.
    pub child_slot: SlotIndex,
    /// Parent table for inheritance/partition expansions; `None` for a
    /// pulled-up UNION ALL.
    #[serde(default)]
    pub parent_relation: Option<RelationId>,
    /// Parent columns expressed in terms of the child, in parent column order.
    #[serde(default)]
    pub translated_columns: Vec<Expr>,
}

/// A value this level makes available to a lower level as a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanParam {
    pub id: i32,
    pub item: Expr,
}

/// One planner-derived equivalence fact: all member expressions are equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerEquivalence {
    pub members: Vec<Expr>,
}

// ── Query levels ────────────────────────────────────────────────────────

/// One query level as seen by the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryLevel {
    #[serde(default)]
    pub range_table: Vec<RangeEntry>,
    #[serde(default)]
    pub target_list: Vec<TargetEntry>,
    #[serde(default)]
    pub set_operations: Option<SetOperationTree>,
    #[serde(default)]
    pub append_relations: Vec<AppendRelation>,
    #[serde(default)]
    pub equivalences: Vec<PlannerEquivalence>,
    #[serde(default)]
    pub plan_params: Vec<PlanParam>,
}

impl QueryLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Range entry at `slot`, if any.
    pub fn entry(&self, slot: SlotIndex) -> Option<&RangeEntry> {
        let index = usize::try_from(slot.0).ok()?.checked_sub(1)?;
        self.range_table.get(index)
    }

    /// Target entry whose output position is `position`, if any.
    pub fn target_entry(&self, position: AttrNumber) -> Option<&TargetEntry> {
        self.target_list.iter().find(|te| te.position == position)
    }

    /// Plan parameter with the given id, if any.
    pub fn plan_param(&self, id: i32) -> Option<&PlanParam> {
        self.plan_params.iter().find(|p| p.id == id)
    }

    fn push_entry(&mut self, entry: RangeEntry) -> SlotIndex {
        self.range_table.push(entry);
        SlotIndex(self.range_table.len() as u32)
    }

    /// Append a base relation entry and return its slot.
    pub fn add_relation(
        &mut self,
        relation_id: RelationId,
        identity: RelationIdentity,
        alias: &str,
    ) -> SlotIndex {
        self.push_entry(RangeEntry::Relation {
            relation_id,
            identity,
            alias: alias.to_string(),
        })
    }

    /// Append a planned subquery entry and return its slot.
    pub fn add_subquery(&mut self, alias: &str, query: LevelId) -> SlotIndex {
        self.push_entry(RangeEntry::Subquery {
            alias: alias.to_string(),
            query: Some(query),
            expanded: false,
        })
    }

    /// Append a subquery entry that has not been planned yet.
    pub fn add_unplanned_subquery(&mut self, alias: &str) -> SlotIndex {
        self.push_entry(RangeEntry::Subquery {
            alias: alias.to_string(),
            query: None,
            expanded: false,
        })
    }

    /// Append the parent entry of an append-relation expansion.
    pub fn add_expanded_subquery(&mut self, alias: &str, query: LevelId) -> SlotIndex {
        self.push_entry(RangeEntry::Subquery {
            alias: alias.to_string(),
            query: Some(query),
            expanded: true,
        })
    }

    /// Append an entry the analysis does not look into.
    pub fn add_other(&mut self, description: &str) -> SlotIndex {
        self.push_entry(RangeEntry::Other {
            description: description.to_string(),
        })
    }

    /// Append an output column and return its position.
    pub fn add_target(&mut self, expr: Expr, name: &str) -> AttrNumber {
        self.push_target(expr, name, false)
    }

    /// Append a junk output column and return its position.
    pub fn add_junk_target(&mut self, expr: Expr, name: &str) -> AttrNumber {
        self.push_target(expr, name, true)
    }

    fn push_target(&mut self, expr: Expr, name: &str, junk: bool) -> AttrNumber {
        let position = (self.target_list.len() + 1) as AttrNumber;
        self.target_list.push(TargetEntry {
            position,
            expr,
            name: Some(name.to_string()),
            junk,
        });
        position
    }

    pub fn add_equivalence(&mut self, members: Vec<Expr>) {
        self.equivalences.push(PlannerEquivalence { members });
    }

    pub fn add_plan_param(&mut self, id: i32, item: Expr) {
        self.plan_params.push(PlanParam { id, item });
    }

    pub fn add_append_relation(&mut self, relation: AppendRelation) {
        self.append_relations.push(relation);
    }

    pub fn set_operations(&mut self, tree: SetOperationTree) {
        self.set_operations = Some(tree);
    }
}

// ── Query tree arena ────────────────────────────────────────────────────

/// Arena of query levels, children stored before parents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QueryLevel>", into = "Vec<QueryLevel>")]
pub struct QueryTree {
    levels: Vec<QueryLevel>,
}

impl QueryTree {
    /// Build a tree from levels, validating the ordering invariant.
    pub fn new(levels: Vec<QueryLevel>) -> Result<Self, ColocationError> {
        for (index, level) in levels.iter().enumerate() {
            check_level_references(index, level)?;
        }
        Ok(Self { levels })
    }

    /// Append a level. It may only reference levels already in the tree.
    pub fn push_level(&mut self, level: QueryLevel) -> Result<LevelId, ColocationError> {
        let index = self.levels.len();
        check_level_references(index, &level)?;
        self.levels.push(level);
        Ok(LevelId(index))
    }

    /// Look up a level. A dangling id means the tree is malformed.
    pub fn level(&self, id: LevelId) -> Result<&QueryLevel, ColocationError> {
        self.levels.get(id.0).ok_or_else(|| {
            ColocationError::InternalError(format!("query level {id} does not exist"))
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl TryFrom<Vec<QueryLevel>> for QueryTree {
    type Error = ColocationError;

    fn try_from(levels: Vec<QueryLevel>) -> Result<Self, Self::Error> {
        QueryTree::new(levels)
    }
}

impl From<QueryTree> for Vec<QueryLevel> {
    fn from(tree: QueryTree) -> Self {
        tree.levels
    }
}

/// Subquery entries of level `index` must point at earlier levels, and
/// append-relation children must come after their parent in the range table.
fn check_level_references(index: usize, level: &QueryLevel) -> Result<(), ColocationError> {
    for append in &level.append_relations {
        if append.child_slot <= append.parent_slot {
            return Err(ColocationError::InvalidQueryTree(format!(
                "append relation child slot {} in level {index} does not follow parent slot {}",
                append.child_slot, append.parent_slot
            )));
        }
    }
    for entry in &level.range_table {
        if let RangeEntry::Subquery {
            alias,
            query: Some(child),
            ..
        } = entry
            && child.0 >= index
        {
            return Err(ColocationError::InvalidQueryTree(format!(
                "subquery \"{alias}\" in level {index} references level {child}, \
                 which is not stored before it"
            )));
        }
    }
    Ok(())
}
