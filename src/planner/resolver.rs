//! Column resolution: trace a column reference back to the base relation
//! column it reads.
//!
//! A column used at some query level may name a base relation directly, or a
//! subquery whose output is itself a column of a deeper level, a branch of a
//! UNION, or a pulled-up UNION ALL expansion. [`ColumnResolver::resolve`]
//! follows plain column pass-through through all of these and returns the
//! set of [`EquivalenceMember`]s it ends up at.
//!
//! Only partition-key columns of sharded relations are ever returned; every
//! other column resolves to the empty set. The walk stops (contributing
//! nothing) at computed expressions, unplanned subqueries, non-UNION set
//! operations and whole-row references. Pointing past a subquery's target
//! list is the one fatal case.

use std::collections::BTreeSet;

use tracing::trace;

use crate::catalog::DistributionMetadata;
use crate::error::ColocationError;
use crate::planner::equivalence::EquivalenceMember;
use crate::planner::query::{
    ColumnRef, Expr, LevelId, Param, ParamKind, QueryLevel, QueryTree, RangeEntry,
    SetOperationTree, SetOperator, SlotIndex, TargetEntry,
};

/// Members discovered by one resolution.
pub type MemberSet = BTreeSet<EquivalenceMember>;

/// Resolves column references against one query tree.
pub struct ColumnResolver<'a, M: ?Sized> {
    tree: &'a QueryTree,
    metadata: &'a M,
}

impl<'a, M> ColumnResolver<'a, M>
where
    M: DistributionMetadata + ?Sized,
{
    pub fn new(tree: &'a QueryTree, metadata: &'a M) -> Self {
        Self { tree, metadata }
    }

    pub fn tree(&self) -> &'a QueryTree {
        self.tree
    }

    /// Resolve an equivalence-member expression found at `level`.
    ///
    /// Plain columns (under any implicit coercions) resolve at `level`.
    /// Execution parameters resolve through `parent_level`'s plan
    /// parameters to the column they were substituted for. Anything else
    /// contributes nothing.
    pub fn resolve_expr(
        &self,
        level: LevelId,
        parent_level: Option<LevelId>,
        expr: &Expr,
    ) -> Result<MemberSet, ColocationError> {
        match expr.strip_implicit_coercions() {
            Expr::Column(column) => self.resolve(level, column),
            Expr::Param(param) => match (parent_level, self.lateral_column(parent_level, param)?) {
                (Some(parent), Some(column)) => self.resolve(parent, &column),
                _ => {
                    trace!(param_id = param.id, "parameter has no backing column");
                    Ok(MemberSet::new())
                }
            },
            _ => Ok(MemberSet::new()),
        }
    }

    /// Map an execution parameter back to the column the parent level
    /// substituted it for. Entries whose item is not a plain column are
    /// skipped; a later entry with the same id may still match.
    pub fn lateral_column(
        &self,
        parent_level: Option<LevelId>,
        param: &Param,
    ) -> Result<Option<ColumnRef>, ColocationError> {
        if param.kind != ParamKind::Exec {
            return Ok(None);
        }
        let Some(parent) = parent_level else {
            return Ok(None);
        };
        let parent = self.tree.level(parent)?;
        Ok(parent
            .plan_params
            .iter()
            .filter(|p| p.id == param.id)
            .find_map(|p| p.item.as_column().copied()))
    }

    /// Resolve `column`, used at `level`, to base-relation members.
    pub fn resolve(&self, level_id: LevelId, column: &ColumnRef) -> Result<MemberSet, ColocationError> {
        if column.levels_up != 0 {
            return Ok(MemberSet::new());
        }
        let level = self.tree.level(level_id)?;
        let entry = level.entry(column.slot).ok_or_else(|| {
            ColocationError::InternalError(format!(
                "column references slot {} which level {level_id} does not have",
                column.slot
            ))
        })?;

        match entry {
            RangeEntry::Relation {
                relation_id,
                identity,
                ..
            } => {
                let mut members = MemberSet::new();
                if self.metadata.is_sharded(*relation_id)
                    && self.metadata.partition_key(*relation_id) == Some(column.attribute)
                {
                    members.insert(EquivalenceMember {
                        identity: *identity,
                        attribute: column.attribute,
                        relation_id: *relation_id,
                    });
                }
                Ok(members)
            }
            RangeEntry::Subquery {
                alias,
                query,
                expanded,
            } => {
                if column.is_whole_row() {
                    return Ok(MemberSet::new());
                }
                let Some(subquery_id) = query else {
                    trace!(alias = %alias, "subquery not planned yet");
                    return Ok(MemberSet::new());
                };
                let subquery = self.tree.level(*subquery_id)?;
                let target = visible_target(subquery, alias, column.attribute)?;
                let Some(inner) = target.expr.as_column() else {
                    trace!(alias = %alias, attribute = column.attribute, "subquery output is not a column");
                    return Ok(MemberSet::new());
                };

                if *expanded {
                    self.resolve_append_children(level_id, level, column.slot, inner)
                } else if let Some(set_operations) = &subquery.set_operations {
                    self.resolve_set_operation(*subquery_id, subquery, set_operations, inner)
                } else {
                    self.resolve(*subquery_id, inner)
                }
            }
            RangeEntry::Other { description } => {
                trace!(entry = %description, "column of an untracked range entry");
                Ok(MemberSet::new())
            }
        }
    }

    /// Follow every UNION ALL child of the expanded entry at `parent_slot`.
    /// Inheritance expansions are not followed.
    fn resolve_append_children(
        &self,
        level_id: LevelId,
        level: &QueryLevel,
        parent_slot: SlotIndex,
        inner: &ColumnRef,
    ) -> Result<MemberSet, ColocationError> {
        let mut members = MemberSet::new();
        for append in level
            .append_relations
            .iter()
            .filter(|a| a.parent_relation.is_none() && a.parent_slot == parent_slot)
        {
            let child = ColumnRef::new(append.child_slot, inner.attribute);
            members.extend(self.resolve(level_id, &child)?);
        }
        Ok(members)
    }

    /// Follow every branch of a UNION tree at the output position `inner`
    /// names. INTERSECT and EXCEPT subtrees are not traced.
    fn resolve_set_operation(
        &self,
        level_id: LevelId,
        level: &QueryLevel,
        tree: &SetOperationTree,
        inner: &ColumnRef,
    ) -> Result<MemberSet, ColocationError> {
        match tree {
            SetOperationTree::Branch(slot) => self.resolve_set_branch(level_id, level, *slot, inner),
            SetOperationTree::Combine { op, left, right, .. } => {
                if *op != SetOperator::Union {
                    trace!(op = ?op, "set operation is not a UNION");
                    return Ok(MemberSet::new());
                }
                let mut members = self.resolve_set_operation(level_id, level, left, inner)?;
                members.extend(self.resolve_set_operation(level_id, level, right, inner)?);
                Ok(members)
            }
        }
    }

    fn resolve_set_branch(
        &self,
        level_id: LevelId,
        level: &QueryLevel,
        slot: SlotIndex,
        inner: &ColumnRef,
    ) -> Result<MemberSet, ColocationError> {
        let entry = level.entry(slot).ok_or_else(|| {
            ColocationError::InternalError(format!(
                "set operation branch references slot {slot} which level {level_id} does not have"
            ))
        })?;
        let RangeEntry::Subquery {
            alias,
            query: Some(branch_id),
            ..
        } = entry
        else {
            return Ok(MemberSet::new());
        };

        let branch = self.tree.level(*branch_id)?;
        let target = visible_target(branch, alias, inner.attribute)?;
        match target.expr.as_column() {
            Some(column) => self.resolve(*branch_id, column),
            None => Ok(MemberSet::new()),
        }
    }
}

/// Non-junk target entry at `position`; its absence means the tree is
/// inconsistent.
fn visible_target<'q>(
    level: &'q QueryLevel,
    alias: &str,
    position: i16,
) -> Result<&'q TargetEntry, ColocationError> {
    level
        .target_entry(position)
        .filter(|te| !te.junk)
        .ok_or_else(|| ColocationError::missing_subquery_attribute(alias, position))
}
