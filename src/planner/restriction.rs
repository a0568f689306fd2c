//! Restriction contexts collected by the host planner.
//!
//! While planning a query the host planner records one
//! [`RelationRestriction`] per base-relation appearance it plans and one
//! [`JoinRestriction`] per join it considers. The two contexts are built once
//! per planning invocation and are read-only here.

use serde::{Deserialize, Serialize};

use crate::planner::query::{Expr, LevelId, QueryTree, RelationId, RelationIdentity, SlotIndex};

/// What the planner knows about one base-relation appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRestriction {
    /// Slot of the relation within its level.
    pub slot: SlotIndex,
    pub relation_id: RelationId,
    pub identity: RelationIdentity,
    /// Level the relation is planned in; its equivalence facts are the ones
    /// the per-relation generator reads.
    pub level: LevelId,
    /// Level that provides parameters to `level`, for lateral references.
    #[serde(default)]
    pub parent_level: Option<LevelId>,
}

/// All relation restrictions of one query, plus the tree they refer into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRestrictionContext {
    pub query: QueryTree,
    /// Top-level level of the original query, used for UNION detection.
    pub parse_tree: LevelId,
    #[serde(default)]
    pub relations: Vec<RelationRestriction>,
}

impl RelationRestrictionContext {
    pub fn new(query: QueryTree, parse_tree: LevelId) -> Self {
        Self {
            query,
            parse_tree,
            relations: Vec::new(),
        }
    }

    /// Record a relation appearance.
    pub fn add_relation(
        &mut self,
        level: LevelId,
        slot: SlotIndex,
        relation_id: RelationId,
        identity: RelationIdentity,
    ) -> &mut RelationRestriction {
        self.relations.push(RelationRestriction {
            slot,
            relation_id,
            identity,
            level,
            parent_level: None,
        });
        let last = self.relations.len() - 1;
        &mut self.relations[last]
    }
}

/// Join clauses the planner considered at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRestriction {
    pub level: LevelId,
    #[serde(default)]
    pub clauses: Vec<Expr>,
}

/// All join restrictions of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRestrictionContext {
    #[serde(default)]
    pub joins: Vec<JoinRestriction>,
}

impl JoinRestrictionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_join(&mut self, level: LevelId, clauses: Vec<Expr>) {
        self.joins.push(JoinRestriction { level, clauses });
    }
}
