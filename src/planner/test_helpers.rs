//! Shared fixtures for planner unit tests.

use crate::catalog::MetadataCache;
use crate::planner::query::{
    AttrNumber, Expr, LevelId, QueryLevel, QueryTree, RelationId, RelationIdentity,
    SetOperationTree, SetOperator,
};

/// Sharded by column 1.
pub const ORDERS: RelationId = RelationId(100);
/// Sharded by column 2.
pub const ORDER_ITEMS: RelationId = RelationId(101);
/// Sharded by column 1.
pub const EVENTS: RelationId = RelationId(102);
/// Reference table.
pub const COUNTRIES: RelationId = RelationId(200);

pub fn test_metadata() -> MetadataCache {
    let mut metadata = MetadataCache::new();
    metadata.add_sharded(ORDERS, "orders", 1);
    metadata.add_sharded(ORDER_ITEMS, "order_items", 2);
    metadata.add_sharded(EVENTS, "events", 1);
    metadata.add_reference(COUNTRIES, "countries");
    metadata
}

/// `SELECT <columns> FROM relation`, the relation in slot 1.
pub fn scan_level(relation: RelationId, identity: i32, columns: &[AttrNumber]) -> QueryLevel {
    let mut level = QueryLevel::new();
    let slot = level.add_relation(relation, RelationIdentity(identity), "t");
    for &column in columns {
        level.add_target(Expr::column(slot, column), "c");
    }
    level
}

/// Push one single-column scan per `(relation, identity)` and a level that
/// combines them left-deep with `op`. Returns the set-operation level and the
/// branch levels.
pub fn union_of_scans(
    tree: &mut QueryTree,
    op: SetOperator,
    branches: &[(RelationId, i32)],
) -> (LevelId, Vec<LevelId>) {
    let branch_levels: Vec<LevelId> = branches
        .iter()
        .map(|&(relation, identity)| tree.push_level(scan_level(relation, identity, &[1])).unwrap())
        .collect();

    let mut level = QueryLevel::new();
    let slots: Vec<_> = branch_levels
        .iter()
        .enumerate()
        .map(|(i, &id)| level.add_subquery(&format!("b{i}"), id))
        .collect();
    level.add_target(Expr::column(slots[0], 1), "c");

    let mut set_tree = SetOperationTree::Branch(slots[0]);
    for &slot in &slots[1..] {
        set_tree = SetOperationTree::combine(op, false, set_tree, SetOperationTree::Branch(slot));
    }
    level.set_operations(set_tree);

    (tree.push_level(level).unwrap(), branch_levels)
}
