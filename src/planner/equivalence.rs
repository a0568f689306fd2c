//! Equivalence classes over partition-key columns.
//!
//! An [`EquivalenceClass`] is a set of base-relation columns proven equal by
//! some chain of equality facts. Members are identified by the relation
//! *appearance* ([`RelationIdentity`]) and attribute, so the same table
//! scanned twice contributes two distinct members.
//!
//! [`EquivalenceBuilder`] turns two sources of facts into a pool of classes:
//!
//! - the planner's own per-level equivalence facts, read once per relation
//!   restriction, and
//! - `a = b` join clauses recorded in the join restrictions.
//!
//! Only classes with at least two members are pooled. The pool is merged by
//! [`crate::planner::merge`] and the result checked with
//! [`missing_partition_key`].

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::catalog::DistributionMetadata;
use crate::error::ColocationError;
use crate::planner::query::{AttrNumber, ColumnRef, Expr, RelationId, RelationIdentity};
use crate::planner::resolver::{ColumnResolver, MemberSet};
use crate::planner::restriction::{JoinRestrictionContext, RelationRestriction};

/// A partition-key column of one relation appearance.
///
/// Equality, ordering and hashing look only at `(identity, attribute)`;
/// `relation_id` is carried for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquivalenceMember {
    pub identity: RelationIdentity,
    pub attribute: AttrNumber,
    pub relation_id: RelationId,
}

impl EquivalenceMember {
    fn key(&self) -> (RelationIdentity, AttrNumber) {
        (self.identity, self.attribute)
    }
}

impl PartialEq for EquivalenceMember {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EquivalenceMember {}

impl Hash for EquivalenceMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for EquivalenceMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EquivalenceMember {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for EquivalenceMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}.{}", self.identity, self.attribute)
    }
}

/// A set of columns proven equal. Members keep insertion order; inserting a
/// member already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceClass {
    pub id: u32,
    members: Vec<EquivalenceMember>,
}

impl EquivalenceClass {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    /// The class an empty pool merges to: id 0, no members.
    pub fn empty() -> Self {
        Self::new(0)
    }

    /// Insert `member`; returns whether it was new.
    pub fn insert(&mut self, member: EquivalenceMember) -> bool {
        if self.contains(&member) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn extend_members<I>(&mut self, members: I)
    where
        I: IntoIterator<Item = EquivalenceMember>,
    {
        for member in members {
            self.insert(member);
        }
    }

    /// Union `other`'s members into this class.
    pub fn absorb(&mut self, other: &EquivalenceClass) {
        self.extend_members(other.members.iter().copied());
    }

    pub fn contains(&self, member: &EquivalenceMember) -> bool {
        self.members.contains(member)
    }

    /// Whether the two classes have at least one member in common.
    pub fn shares_member(&self, other: &EquivalenceClass) -> bool {
        other.members.iter().any(|m| self.contains(m))
    }

    pub fn members(&self) -> &[EquivalenceMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A class says something only if it equates at least two columns.
    pub fn is_informative(&self) -> bool {
        self.members.len() >= 2
    }

    /// Relation appearances represented in the class.
    pub fn identities(&self) -> BTreeSet<RelationIdentity> {
        self.members.iter().map(|m| m.identity).collect()
    }

    /// Members as a sorted set, for order-insensitive comparison.
    pub fn member_set(&self) -> MemberSet {
        self.members.iter().copied().collect()
    }
}

/// Per-call analysis state. A fresh session starts numbering classes at 1,
/// so ids never leak between analyses.
#[derive(Debug)]
pub struct AnalysisSession {
    next_class_id: u32,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self { next_class_id: 1 }
    }

    /// A new empty class with the next id.
    pub fn new_class(&mut self) -> EquivalenceClass {
        let id = self.next_class_id;
        self.next_class_id = self.next_class_id.saturating_add(1);
        EquivalenceClass::new(id)
    }

    /// Number of classes handed out so far.
    pub fn classes_created(&self) -> u32 {
        self.next_class_id - 1
    }
}

/// Add `class` to `pool` if it is informative.
pub fn add_informative_class(pool: &mut Vec<EquivalenceClass>, class: EquivalenceClass) {
    if class.is_informative() {
        pool.push(class);
    } else {
        trace!(class_id = class.id, members = class.len(), "dropping uninformative class");
    }
}

/// Builds equivalence classes from restriction contexts.
pub struct EquivalenceBuilder<'a, M: ?Sized> {
    resolver: ColumnResolver<'a, M>,
    metadata: &'a M,
}

impl<'a, M> EquivalenceBuilder<'a, M>
where
    M: DistributionMetadata + ?Sized,
{
    pub fn new(resolver: ColumnResolver<'a, M>, metadata: &'a M) -> Self {
        Self { resolver, metadata }
    }

    /// One class per planner equivalence fact of each relation's level.
    ///
    /// A level holding several relations has its facts read once per
    /// relation; the duplicates collapse at merge time.
    pub fn relation_restriction_classes(
        &self,
        session: &mut AnalysisSession,
        relations: &[RelationRestriction],
    ) -> Result<Vec<EquivalenceClass>, ColocationError> {
        let mut pool = Vec::new();
        for restriction in relations {
            let level = self.resolver.tree().level(restriction.level)?;
            for fact in &level.equivalences {
                let mut class = session.new_class();
                for member in &fact.members {
                    let found = self.resolver.resolve_expr(
                        restriction.level,
                        restriction.parent_level,
                        member,
                    )?;
                    class.extend_members(found);
                }
                add_informative_class(&mut pool, class);
            }
        }
        Ok(pool)
    }

    /// One class per `column = column` join clause.
    pub fn join_restriction_classes(
        &self,
        session: &mut AnalysisSession,
        joins: &JoinRestrictionContext,
    ) -> Result<Vec<EquivalenceClass>, ColocationError> {
        let mut pool = Vec::new();
        for join in &joins.joins {
            for clause in &join.clauses {
                let Some((left, right)) = self.equality_columns(clause) else {
                    continue;
                };
                let mut class = session.new_class();
                class.extend_members(self.resolver.resolve(join.level, left)?);
                class.extend_members(self.resolver.resolve(join.level, right)?);
                add_informative_class(&mut pool, class);
            }
        }
        Ok(pool)
    }

    /// The two columns of an `a = b` clause, looking through implicit
    /// coercions on either side.
    pub fn equality_columns<'e>(&self, clause: &'e Expr) -> Option<(&'e ColumnRef, &'e ColumnRef)> {
        let Expr::Operator { operator, args } = clause else {
            return None;
        };
        let [left, right] = args.as_slice() else {
            return None;
        };
        if !self.metadata.operator_implements_equality(*operator) {
            return None;
        }
        let left = left.strip_implicit_coercions().as_column()?;
        let right = right.strip_implicit_coercions().as_column()?;
        Some((left, right))
    }
}

/// Number of relation appearances sharded by a key.
pub fn sharded_relation_count<M>(relations: &[RelationRestriction], metadata: &M) -> usize
where
    M: DistributionMetadata + ?Sized,
{
    relations
        .iter()
        .filter(|r| metadata.is_sharded(r.relation_id))
        .count()
}

/// First sharded relation appearance absent from `common`, or `None` when
/// every sharded relation is represented. Reference and unsharded relations
/// are exempt.
pub fn missing_partition_key<M>(
    common: &EquivalenceClass,
    relations: &[RelationRestriction],
    metadata: &M,
) -> Option<RelationIdentity>
where
    M: DistributionMetadata + ?Sized,
{
    let present = common.identities();
    relations
        .iter()
        .filter(|r| metadata.is_sharded(r.relation_id))
        .find(|r| !present.contains(&r.identity))
        .map(|r| r.identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::query::{LevelId, OperatorId, QueryLevel, QueryTree, SlotIndex};
    use crate::planner::test_helpers::*;

    const INT4EQ: OperatorId = OperatorId(96);
    const INT4LT: OperatorId = OperatorId(97);

    fn member(identity: i32, attribute: AttrNumber) -> EquivalenceMember {
        EquivalenceMember {
            identity: RelationIdentity(identity),
            attribute,
            relation_id: ORDERS,
        }
    }

    fn restriction(slot: SlotIndex, relation: RelationId, identity: i32) -> RelationRestriction {
        RelationRestriction {
            slot,
            relation_id: relation,
            identity: RelationIdentity(identity),
            level: LevelId(0),
            parent_level: None,
        }
    }

    /// orders (identity 1) and order_items (identity 2) in one level.
    fn two_table_level() -> (QueryLevel, SlotIndex, SlotIndex) {
        let mut level = QueryLevel::new();
        let o = level.add_relation(ORDERS, RelationIdentity(1), "orders");
        let i = level.add_relation(ORDER_ITEMS, RelationIdentity(2), "order_items");
        (level, o, i)
    }

    // ── Members and classes ─────────────────────────────────────────

    #[test]
    fn test_member_identity_ignores_relation_id() {
        let a = member(1, 1);
        let b = EquivalenceMember {
            relation_id: EVENTS,
            ..a
        };
        assert_eq!(a, b);
        assert_ne!(a, member(1, 2));
        assert_ne!(a, member(2, 1));
    }

    #[test]
    fn test_class_insert_is_set_semantics() {
        let mut class = EquivalenceClass::new(3);
        assert!(class.insert(member(1, 1)));
        assert!(!class.insert(member(1, 1)));
        assert!(class.insert(member(2, 1)));
        assert_eq!(class.len(), 2);
        assert_eq!(class.members()[0], member(1, 1));
    }

    #[test]
    fn test_class_shares_member_and_absorb() {
        let mut a = EquivalenceClass::new(1);
        a.extend_members([member(1, 1), member(2, 1)]);
        let mut b = EquivalenceClass::new(2);
        b.extend_members([member(2, 1), member(3, 1)]);
        let mut c = EquivalenceClass::new(3);
        c.extend_members([member(4, 1), member(5, 1)]);

        assert!(a.shares_member(&b));
        assert!(!a.shares_member(&c));
        a.absorb(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(
            a.identities(),
            BTreeSet::from([RelationIdentity(1), RelationIdentity(2), RelationIdentity(3)])
        );
    }

    #[test]
    fn test_empty_class() {
        let class = EquivalenceClass::empty();
        assert_eq!(class.id, 0);
        assert!(class.is_empty());
        assert!(!class.is_informative());
    }

    #[test]
    fn test_add_informative_class_filters_singletons() {
        let mut pool = Vec::new();
        let mut single = EquivalenceClass::new(1);
        single.insert(member(1, 1));
        add_informative_class(&mut pool, single);
        add_informative_class(&mut pool, EquivalenceClass::new(2));
        assert!(pool.is_empty());

        let mut pair = EquivalenceClass::new(3);
        pair.extend_members([member(1, 1), member(2, 1)]);
        add_informative_class(&mut pool, pair);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_session_numbers_from_one() {
        let mut session = AnalysisSession::new();
        assert_eq!(session.new_class().id, 1);
        assert_eq!(session.new_class().id, 2);
        assert_eq!(session.classes_created(), 2);
        assert_eq!(AnalysisSession::new().new_class().id, 1);
    }

    // ── Generators ──────────────────────────────────────────────────

    #[test]
    fn test_join_generator_equates_partition_keys() {
        let metadata = test_metadata();
        let (level, o, i) = two_table_level();
        let tree = QueryTree::new(vec![level]).unwrap();
        let builder = EquivalenceBuilder::new(ColumnResolver::new(&tree, &metadata), &metadata);

        let mut joins = JoinRestrictionContext::new();
        joins.add_join(
            LevelId(0),
            vec![Expr::binary(INT4EQ, Expr::column(o, 1), Expr::column(i, 2))],
        );
        let mut session = AnalysisSession::new();
        let pool = builder.join_restriction_classes(&mut session, &joins).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].member_set().len(), 2);
        assert_eq!(
            pool[0].identities(),
            BTreeSet::from([RelationIdentity(1), RelationIdentity(2)])
        );
    }

    #[test]
    fn test_join_generator_skips_non_key_and_non_equality() {
        let metadata = test_metadata();
        let (level, o, i) = two_table_level();
        let tree = QueryTree::new(vec![level]).unwrap();
        let builder = EquivalenceBuilder::new(ColumnResolver::new(&tree, &metadata), &metadata);

        let mut joins = JoinRestrictionContext::new();
        joins.add_join(
            LevelId(0),
            vec![
                // orders.id = order_items.item_id: one side is not a key
                Expr::binary(INT4EQ, Expr::column(o, 1), Expr::column(i, 3)),
                // orders.id < order_items.order_id
                Expr::binary(INT4LT, Expr::column(o, 1), Expr::column(i, 2)),
                // orders.id = 42
                Expr::binary(INT4EQ, Expr::column(o, 1), Expr::Const("42".into())),
            ],
        );
        let mut session = AnalysisSession::new();
        let pool = builder.join_restriction_classes(&mut session, &joins).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_join_generator_strips_implicit_casts() {
        let metadata = test_metadata();
        let (level, o, i) = two_table_level();
        let tree = QueryTree::new(vec![level]).unwrap();
        let builder = EquivalenceBuilder::new(ColumnResolver::new(&tree, &metadata), &metadata);

        let clause = Expr::binary(
            INT4EQ,
            Expr::implicit_cast(Expr::column(o, 1)),
            Expr::column(i, 2),
        );
        assert!(builder.equality_columns(&clause).is_some());

        let ternary = Expr::Operator {
            operator: INT4EQ,
            args: vec![Expr::column(o, 1); 3],
        };
        assert!(builder.equality_columns(&ternary).is_none());
    }

    #[test]
    fn test_relation_generator_reads_level_equivalences() {
        let metadata = test_metadata();
        let (mut level, o, i) = two_table_level();
        level.add_equivalence(vec![
            Expr::column(o, 1),
            Expr::implicit_cast(Expr::column(i, 2)),
            Expr::Const("7".into()),
        ]);
        // Only one key member: dropped.
        level.add_equivalence(vec![Expr::column(o, 1), Expr::column(i, 1)]);
        let tree = QueryTree::new(vec![level]).unwrap();
        let builder = EquivalenceBuilder::new(ColumnResolver::new(&tree, &metadata), &metadata);

        let relations = vec![restriction(o, ORDERS, 1), restriction(i, ORDER_ITEMS, 2)];
        let mut session = AnalysisSession::new();
        let pool = builder
            .relation_restriction_classes(&mut session, &relations)
            .unwrap();

        // The informative fact is read once per relation in the level.
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].member_set(), pool[1].member_set());
        assert_ne!(pool[0].id, pool[1].id);
    }

    #[test]
    fn test_relation_generator_resolves_lateral_param() {
        let metadata = test_metadata();
        let mut tree = QueryTree::default();
        let mut parent = QueryLevel::new();
        let o = parent.add_relation(ORDERS, RelationIdentity(1), "orders");
        parent.add_plan_param(5, Expr::column(o, 1));
        let parent = tree.push_level(parent).unwrap();

        let mut child = QueryLevel::new();
        let i = child.add_relation(ORDER_ITEMS, RelationIdentity(2), "order_items");
        child.add_equivalence(vec![Expr::column(i, 2), Expr::exec_param(5)]);
        let child = tree.push_level(child).unwrap();

        let builder = EquivalenceBuilder::new(ColumnResolver::new(&tree, &metadata), &metadata);
        let relations = vec![RelationRestriction {
            slot: i,
            relation_id: ORDER_ITEMS,
            identity: RelationIdentity(2),
            level: child,
            parent_level: Some(parent),
        }];
        let mut session = AnalysisSession::new();
        let pool = builder
            .relation_restriction_classes(&mut session, &relations)
            .unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool[0].identities(),
            BTreeSet::from([RelationIdentity(1), RelationIdentity(2)])
        );
    }

    // ── Checker ─────────────────────────────────────────────────────

    #[test]
    fn test_missing_partition_key_reports_first_absent() {
        let metadata = test_metadata();
        let relations = vec![
            restriction(SlotIndex(1), ORDERS, 1),
            restriction(SlotIndex(2), ORDER_ITEMS, 2),
            restriction(SlotIndex(3), EVENTS, 3),
            restriction(SlotIndex(4), COUNTRIES, 4),
        ];
        let mut common = EquivalenceClass::new(1);
        common.extend_members([member(1, 1), member(2, 2)]);
        assert_eq!(
            missing_partition_key(&common, &relations, &metadata),
            Some(RelationIdentity(3))
        );

        common.insert(member(3, 1));
        assert_eq!(missing_partition_key(&common, &relations, &metadata), None);
    }

    #[test]
    fn test_sharded_relation_count_skips_reference_tables() {
        let metadata = test_metadata();
        let relations = vec![
            restriction(SlotIndex(1), ORDERS, 1),
            restriction(SlotIndex(2), COUNTRIES, 2),
            restriction(SlotIndex(3), COUNTRIES, 3),
        ];
        assert_eq!(sharded_relation_count(&relations, &metadata), 1);
    }
}
