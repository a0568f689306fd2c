//! Colocated subquery pushdown analysis.
//!
//! Decides whether a query over sharded relations can run entirely inside
//! each shard, i.e. whether every sharded relation is tied to the others
//! through equalities on partition keys so that matching rows are always
//! co-located.
//!
//! # Approach
//!
//! 1. Equality facts from the planner's per-level equivalences and from
//!    `a = b` join clauses are turned into equivalence classes over
//!    partition-key columns ([`equivalence`]), tracing each column through
//!    subqueries, UNION branches and UNION ALL expansions ([`resolver`]).
//! 2. The classes are merged into one common class ([`merge`]).
//! 3. The query is safe when the common class contains a member of every
//!    sharded relation appearance.
//! 4. Otherwise, a top-level UNION is still safe when all of its branches
//!    expose their partition keys at the same output position ([`union`]).
//!
//! Queries touching at most one sharded relation are always safe. Shapes the
//! analysis cannot see through degrade to "not safe", never to an error.
//!
//! # Submodules
//! - `query`: query tree arena handed over by the host planner
//! - `restriction`: relation and join restriction contexts
//! - `resolver`: column resolution down to base relations
//! - `equivalence`: equivalence classes, generators and the membership check
//! - `merge`: transitive closure over the class pool
//! - `union`: partition-key alignment across UNION branches
//!
//! # Usage
//! ```ignore
//! use pg_colocation::planner::safe_to_push_down_subquery;
//!
//! let safe = safe_to_push_down_subquery(&catalog, &relations, &joins)?;
//! ```

pub mod equivalence;
pub mod merge;
pub mod query;
pub mod resolver;
pub mod restriction;
pub mod union;

#[cfg(test)]
mod test_helpers;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{DistributionMetadata, MetadataCache};
use crate::config::PushdownSettings;
use crate::error::ColocationError;

pub use equivalence::{
    AnalysisSession, EquivalenceBuilder, EquivalenceClass, EquivalenceMember,
    add_informative_class, missing_partition_key, sharded_relation_count,
};
pub use merge::{MergeStrategy, merge_classes};
pub use query::{LevelId, QueryLevel, QueryTree, RelationIdentity};
pub use resolver::ColumnResolver;
pub use restriction::{
    JoinRestriction, JoinRestrictionContext, RelationRestriction, RelationRestrictionContext,
};
pub use union::{UnionAnalyzer, UnionOutcome, is_top_level_union};

/// Why the analysis reached its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionReason {
    /// The analysis is switched off.
    Disabled,
    /// At most one sharded relation appearance; nothing to align.
    SingleShardedRelation,
    /// Every sharded relation is equated on its partition key.
    JoinedOnPartitionKey,
    /// Every UNION branch exposes its partition key at `position`.
    UnionPartitionKeysAligned { position: i16 },
    /// `identity` is not equated with the others on its partition key.
    MissingPartitionKey { identity: RelationIdentity },
    /// A UNION branch exposes its partition key at another position.
    UnionOrdinalMismatch {
        expected: i16,
        found: i16,
        identity: RelationIdentity,
    },
    /// A UNION branch does not expose its partition key.
    UnionMissingPartitionKey { identity: RelationIdentity },
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::Disabled => write!(f, "pushdown analysis is disabled"),
            DecisionReason::SingleShardedRelation => {
                write!(f, "query references at most one sharded relation")
            }
            DecisionReason::JoinedOnPartitionKey => {
                write!(f, "all sharded relations are joined on their partition keys")
            }
            DecisionReason::UnionPartitionKeysAligned { position } => write!(
                f,
                "all union branches return the partition key at position {position}"
            ),
            DecisionReason::MissingPartitionKey { identity } => write!(
                f,
                "relation {identity} is not joined on its partition key"
            ),
            DecisionReason::UnionOrdinalMismatch {
                expected,
                found,
                identity,
            } => write!(
                f,
                "relation {identity} returns its partition key at position {found}, \
                 other union branches at position {expected}"
            ),
            DecisionReason::UnionMissingPartitionKey { identity } => write!(
                f,
                "relation {identity} does not return its partition key in the union"
            ),
        }
    }
}

/// Verdict of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushdownDecision {
    pub safe: bool,
    pub reason: DecisionReason,
    /// The class the verdict was checked against, when one was built.
    pub common_class: Option<EquivalenceClass>,
}

impl PushdownDecision {
    fn new(safe: bool, reason: DecisionReason, common_class: Option<EquivalenceClass>) -> Self {
        Self {
            safe,
            reason,
            common_class,
        }
    }
}

/// Runs the pushdown analysis with fixed settings and metadata.
pub struct PushdownAnalyzer<'a, M: ?Sized> {
    settings: &'a PushdownSettings,
    metadata: &'a M,
}

impl<'a, M> PushdownAnalyzer<'a, M>
where
    M: DistributionMetadata + ?Sized,
{
    pub fn new(settings: &'a PushdownSettings, metadata: &'a M) -> Self {
        Self { settings, metadata }
    }

    /// Decide whether the query described by `relations` and `joins` can be
    /// pushed down. Errors only when the query tree is inconsistent.
    pub fn analyze(
        &self,
        relations: &RelationRestrictionContext,
        joins: &JoinRestrictionContext,
    ) -> Result<PushdownDecision, ColocationError> {
        if !self.settings.enabled() {
            debug!("pushdown analysis disabled");
            return Ok(PushdownDecision::new(false, DecisionReason::Disabled, None));
        }

        let sharded = sharded_relation_count(&relations.relations, self.metadata);
        if sharded <= 1 {
            debug!(sharded_relations = sharded, "single sharded relation, safe");
            return Ok(PushdownDecision::new(
                true,
                DecisionReason::SingleShardedRelation,
                None,
            ));
        }

        let tree = &relations.query;
        let mut session = AnalysisSession::new();
        let builder = EquivalenceBuilder::new(ColumnResolver::new(tree, self.metadata), self.metadata);

        let mut pool = builder.relation_restriction_classes(&mut session, &relations.relations)?;
        let relation_classes = pool.len();
        pool.extend(builder.join_restriction_classes(&mut session, joins)?);
        let common = merge_classes(self.settings.merge_strategy(), &pool);

        debug!(
            sharded_relations = sharded,
            relation_classes,
            join_classes = pool.len() - relation_classes,
            classes_created = session.classes_created(),
            strategy = %self.settings.merge_strategy(),
            members = common.len(),
            "merged equivalence classes"
        );
        if self.settings.log_equivalence_classes() {
            debug!(?common, "common equivalence class");
        }

        let Some(missing) = missing_partition_key(&common, &relations.relations, self.metadata)
        else {
            debug!(reason = "joined_on_partition_key", "safe to push down");
            return Ok(PushdownDecision::new(
                true,
                DecisionReason::JoinedOnPartitionKey,
                Some(common),
            ));
        };

        if self.settings.union_pushdown() && is_top_level_union(tree, relations.parse_tree)? {
            let analyzer = UnionAnalyzer::new(ColumnResolver::new(tree, self.metadata), self.metadata);
            let decision = match analyzer.analyze(&mut session, &relations.relations)? {
                UnionOutcome::Aligned { position, class } => {
                    match missing_partition_key(&class, &relations.relations, self.metadata) {
                        None => PushdownDecision::new(
                            true,
                            DecisionReason::UnionPartitionKeysAligned { position },
                            Some(class),
                        ),
                        Some(identity) => PushdownDecision::new(
                            false,
                            DecisionReason::UnionMissingPartitionKey { identity },
                            Some(class),
                        ),
                    }
                }
                UnionOutcome::OrdinalMismatch {
                    expected,
                    found,
                    identity,
                } => PushdownDecision::new(
                    false,
                    DecisionReason::UnionOrdinalMismatch {
                        expected,
                        found,
                        identity,
                    },
                    None,
                ),
                UnionOutcome::MissingKey { identity } => PushdownDecision::new(
                    false,
                    DecisionReason::UnionMissingPartitionKey { identity },
                    None,
                ),
            };
            debug!(safe = decision.safe, reason = %decision.reason, "union analysis");
            return Ok(decision);
        }

        debug!(identity = %missing, "relation not joined on its partition key");
        Ok(PushdownDecision::new(
            false,
            DecisionReason::MissingPartitionKey { identity: missing },
            Some(common),
        ))
    }
}

/// Whether the query can be pushed down, under default settings.
pub fn safe_to_push_down_subquery<M>(
    metadata: &M,
    relations: &RelationRestrictionContext,
    joins: &JoinRestrictionContext,
) -> Result<bool, ColocationError>
where
    M: DistributionMetadata + ?Sized,
{
    let settings = PushdownSettings::default();
    PushdownAnalyzer::new(&settings, metadata)
        .analyze(relations, joins)
        .map(|decision| decision.safe)
}

/// A self-contained analysis input: metadata plus both restriction
/// contexts. Captured from a planner run and replayed offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    #[serde(default)]
    pub catalog: MetadataCache,
    pub relations: RelationRestrictionContext,
    #[serde(default)]
    pub joins: JoinRestrictionContext,
}

impl AnalysisInput {
    /// Decode an input from JSON.
    pub fn from_json(text: &str) -> Result<Self, ColocationError> {
        serde_json::from_str(text).map_err(|e| ColocationError::InputError(e.to_string()))
    }

    pub fn analyze(&self, settings: &PushdownSettings) -> Result<PushdownDecision, ColocationError> {
        PushdownAnalyzer::new(settings, &self.catalog).analyze(&self.relations, &self.joins)
    }
}
