//! Union pushdown analysis.
//!
//! A query whose top level is (a chain of single-subquery levels above) a
//! UNION can be pushed down when every branch exposes its relation's
//! partition key at the same output position: each shard then computes the
//! union of co-located rows only.
//!
//! The analysis walks the relation restrictions in order, locating each
//! relation's partition key in the target list of the level it is
//! planned in, or in the translated columns of a pulled-up UNION ALL. The
//! first branch fixes the required position; every later one must match.
//! A branch over a relation with no partition key (a reference table)
//! makes the union unsafe, since every shard would return all of its rows.

use tracing::{debug, trace};

use crate::catalog::{DistributionMetadata, is_partition_column};
use crate::error::ColocationError;
use crate::planner::equivalence::{AnalysisSession, EquivalenceClass};
use crate::planner::query::{
    AttrNumber, ColumnRef, LevelId, QueryLevel, QueryTree, RangeEntry, RelationIdentity,
    SetOperator, SlotIndex,
};
use crate::planner::resolver::ColumnResolver;
use crate::planner::restriction::RelationRestriction;

/// Result of scanning the union branches.
#[derive(Debug, Clone, PartialEq)]
pub enum UnionOutcome {
    /// Every branch exposes its key at `position`. `class` holds the
    /// resolved keys and still has to pass the membership check.
    /// `position` is 0 when there were no relations to scan.
    Aligned {
        position: AttrNumber,
        class: EquivalenceClass,
    },
    /// A branch exposes its key at a different position than the first.
    OrdinalMismatch {
        expected: AttrNumber,
        found: AttrNumber,
        identity: RelationIdentity,
    },
    /// A branch does not expose its key at all.
    MissingKey { identity: RelationIdentity },
}

/// Whether `level` is a UNION, possibly below a chain of levels that each
/// select from exactly one subquery.
///
/// A level with anything other than a single planned subquery in its range
/// table (a join, a base relation, a function scan) ends the walk with
/// `false`. The first subquery with a set operation decides: UNION (with or
/// without ALL) qualifies, INTERSECT and EXCEPT do not.
pub fn is_top_level_union(tree: &QueryTree, level: LevelId) -> Result<bool, ColocationError> {
    let mut current = tree.level(level)?;
    loop {
        let [entry] = current.range_table.as_slice() else {
            return Ok(false);
        };
        let RangeEntry::Subquery {
            query: Some(subquery),
            ..
        } = entry
        else {
            return Ok(false);
        };
        let subquery = tree.level(*subquery)?;
        if let Some(set_operations) = &subquery.set_operations {
            return Ok(set_operations.root_operator() == Some(SetOperator::Union));
        }
        current = subquery;
    }
}

/// Position (1-based, in parent column order) of the translated column that
/// is `key` of the relation at `slot`, searching the append relations whose
/// child is `slot`.
pub fn find_translated_column(
    level: &QueryLevel,
    slot: SlotIndex,
    key: AttrNumber,
) -> Option<(AttrNumber, &ColumnRef)> {
    level
        .append_relations
        .iter()
        .filter(|append| append.child_slot == slot)
        .find_map(|append| {
            append
                .translated_columns
                .iter()
                .enumerate()
                .find_map(|(idx, expr)| {
                    expr.as_column()
                        .filter(|c| c.slot == slot && c.attribute == key)
                        .map(|c| (ordinal(idx), c))
                })
        })
}

/// Ordinal (1-based) of the first visible target entry of `level` that is
/// the partition key of the relation at `slot`.
pub fn partition_key_position<'l, M>(
    level: &'l QueryLevel,
    slot: SlotIndex,
    metadata: &M,
) -> Option<(AttrNumber, &'l ColumnRef)>
where
    M: DistributionMetadata + ?Sized,
{
    level
        .target_list
        .iter()
        .enumerate()
        .filter(|(_, te)| !te.junk && is_partition_column(level, &te.expr, metadata))
        .find_map(|(idx, te)| {
            te.expr
                .as_column()
                .filter(|c| c.slot == slot)
                .map(|c| (ordinal(idx), c))
        })
}

fn ordinal(idx: usize) -> AttrNumber {
    AttrNumber::try_from(idx + 1).unwrap_or(AttrNumber::MAX)
}

/// Checks partition-key alignment across union branches.
pub struct UnionAnalyzer<'a, M: ?Sized> {
    resolver: ColumnResolver<'a, M>,
    metadata: &'a M,
}

impl<'a, M> UnionAnalyzer<'a, M>
where
    M: DistributionMetadata + ?Sized,
{
    pub fn new(resolver: ColumnResolver<'a, M>, metadata: &'a M) -> Self {
        Self { resolver, metadata }
    }

    /// Scan the restrictions of a top-level union. A relation without a
    /// partition key, such as a reference table, stops the scan with
    /// [`UnionOutcome::MissingKey`].
    pub fn analyze(
        &self,
        session: &mut AnalysisSession,
        relations: &[RelationRestriction],
    ) -> Result<UnionOutcome, ColocationError> {
        let mut class = session.new_class();
        let mut expected: Option<AttrNumber> = None;

        for restriction in relations {
            let Some(key) = self
                .metadata
                .is_sharded(restriction.relation_id)
                .then(|| self.metadata.partition_key(restriction.relation_id))
                .flatten()
            else {
                debug!(identity = %restriction.identity, "union branch relation has no partition key");
                return Ok(UnionOutcome::MissingKey {
                    identity: restriction.identity,
                });
            };
            let level = self.resolver.tree().level(restriction.level)?;

            let located = if level.append_relations.is_empty() {
                partition_key_position(level, restriction.slot, self.metadata)
            } else {
                find_translated_column(level, restriction.slot, key)
            };
            let Some((position, column)) = located else {
                debug!(identity = %restriction.identity, "union branch does not expose its partition key");
                return Ok(UnionOutcome::MissingKey {
                    identity: restriction.identity,
                });
            };

            match expected {
                None => expected = Some(position),
                Some(required) if required != position => {
                    debug!(
                        identity = %restriction.identity,
                        expected = required,
                        found = position,
                        "union branch exposes its partition key at another position"
                    );
                    return Ok(UnionOutcome::OrdinalMismatch {
                        expected: required,
                        found: position,
                        identity: restriction.identity,
                    });
                }
                Some(_) => {}
            }

            trace!(identity = %restriction.identity, position, "union branch aligned");
            class.extend_members(self.resolver.resolve(restriction.level, column)?);
        }

        Ok(UnionOutcome::Aligned {
            position: expected.unwrap_or(0),
            class,
        })
    }
}
