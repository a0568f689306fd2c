//! pg_colocation: colocated subquery pushdown analysis for sharded
//! PostgreSQL.
//!
//! Given the host planner's view of a query over sharded and reference
//! tables, decides whether the query can be executed entirely inside each
//! shard: every sharded relation must be equated with the others on its
//! partition key, directly or transitively, or, for a top-level UNION,
//! every branch must return its partition key at the same position.
//!
//! The crate does no catalog access and no planning of its own. The host
//! hands over a [`planner::RelationRestrictionContext`] (the query tree and
//! the relations it plans), a [`planner::JoinRestrictionContext`] (the join
//! clauses it considered) and a [`catalog::DistributionMetadata`]
//! implementation, and gets back a boolean or an explained
//! [`planner::PushdownDecision`].
//!
//! # Modules
//! - `planner`: the analysis itself
//! - `catalog`: distribution metadata lookups and an in-memory cache
//! - `config`: analysis settings loaded from TOML
//! - `error`: crate-wide error type

pub mod catalog;
pub mod config;
pub mod error;
pub mod planner;

pub use catalog::{DistributionMetadata, MetadataCache, PartitionMethod};
pub use config::PushdownSettings;
pub use error::{ColocationError, ColocationErrorKind};
pub use planner::{
    AnalysisInput, DecisionReason, PushdownAnalyzer, PushdownDecision, safe_to_push_down_subquery,
};
