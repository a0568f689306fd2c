//! Shared builders for integration tests.
//!
//! A [`QueryBuilder`] assembles a query tree children-first together with the
//! relation restrictions the host planner would record for it.

use pg_colocation::MetadataCache;
use pg_colocation::planner::query::{
    AttrNumber, Expr, LevelId, OperatorId, QueryLevel, QueryTree, RangeEntry, RelationId,
    RelationIdentity, SlotIndex,
};
use pg_colocation::planner::restriction::{JoinRestrictionContext, RelationRestrictionContext};

/// `int4eq`.
pub const INT4EQ: OperatorId = OperatorId(96);

pub const ORDERS: RelationId = RelationId(100);
pub const ORDER_ITEMS: RelationId = RelationId(101);
pub const ORDERS_2020: RelationId = RelationId(110);
pub const ORDERS_2021: RelationId = RelationId(111);
pub const COUNTRIES: RelationId = RelationId(200);

/// orders(id, region, ...) by `id`; order_items(item_id, order_id, ...) by
/// `order_id`; orders_2020/2021(id, region) by `id`; countries is a
/// reference table.
#[allow(dead_code)]
pub fn shop_catalog() -> MetadataCache {
    let mut catalog = MetadataCache::new();
    catalog.add_sharded(ORDERS, "orders", 1);
    catalog.add_sharded(ORDER_ITEMS, "order_items", 2);
    catalog.add_sharded(ORDERS_2020, "orders_2020", 1);
    catalog.add_sharded(ORDERS_2021, "orders_2021", 1);
    catalog.add_reference(COUNTRIES, "countries");
    catalog
}

/// Equality between two columns of the same level.
#[allow(dead_code)]
pub fn eq(left: (SlotIndex, AttrNumber), right: (SlotIndex, AttrNumber)) -> Expr {
    Expr::binary(
        INT4EQ,
        Expr::column(left.0, left.1),
        Expr::column(right.0, right.1),
    )
}

/// Builds a query tree and its relation restrictions together.
#[derive(Default)]
pub struct QueryBuilder {
    tree: QueryTree,
    next_identity: i32,
    restrictions: Vec<(LevelId, SlotIndex, RelationId, RelationIdentity)>,
}

#[allow(dead_code)]
impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next relation identity.
    pub fn identity(&mut self) -> RelationIdentity {
        self.next_identity += 1;
        RelationIdentity(self.next_identity)
    }

    /// Add `relation` to `level` and record a restriction for it once the
    /// level is pushed.
    pub fn scan(&mut self, level: &mut QueryLevel, relation: RelationId) -> (SlotIndex, RelationIdentity) {
        let identity = self.identity();
        let slot = level.add_relation(relation, identity, "t");
        (slot, identity)
    }

    /// Push `level`, recording restrictions for the listed relation slots.
    pub fn push(&mut self, level: QueryLevel, relations: &[(SlotIndex, RelationIdentity)]) -> LevelId {
        let entries: Vec<_> = relations
            .iter()
            .map(|&(slot, identity)| match level.entry(slot) {
                Some(RangeEntry::Relation { relation_id, .. }) => {
                    (slot, *relation_id, identity)
                }
                other => panic!("slot {slot} is not a relation: {other:?}"),
            })
            .collect();
        let id = self.tree.push_level(level).expect("valid level");
        for (slot, relation, identity) in entries {
            self.restrictions.push((id, slot, relation, identity));
        }
        id
    }

    /// `SELECT <columns> FROM relation` as its own level.
    pub fn scan_level(&mut self, relation: RelationId, columns: &[AttrNumber]) -> LevelId {
        let mut level = QueryLevel::new();
        let scanned = self.scan(&mut level, relation);
        for &column in columns {
            level.add_target(Expr::column(scanned.0, column), "c");
        }
        self.push(level, &[scanned])
    }

    /// Finish with `parse_tree` as the top-level query.
    pub fn finish(self, parse_tree: LevelId) -> RelationRestrictionContext {
        let mut context = RelationRestrictionContext::new(self.tree, parse_tree);
        for (level, slot, relation, identity) in self.restrictions {
            context.add_relation(level, slot, relation, identity);
        }
        context
    }
}

/// Join restrictions with all `clauses` at `level`.
#[allow(dead_code)]
pub fn joins_at(level: LevelId, clauses: Vec<Expr>) -> JoinRestrictionContext {
    let mut joins = JoinRestrictionContext::new();
    joins.add_join(level, clauses);
    joins
}
