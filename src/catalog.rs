//! Catalog layer: distribution metadata for relations and operators.
//!
//! The analysis never reads catalogs itself. It asks a
//! [`DistributionMetadata`] implementation three questions: how is a relation
//! distributed, which column is its partition key, and does an operator
//! implement equality. The host planner supplies its metadata cache;
//! [`MetadataCache`] is the in-memory implementation used by the CLI, tests
//! and replayed inputs.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ColocationError;
use crate::planner::query::{AttrNumber, Expr, OperatorId, QueryLevel, RangeEntry, RelationId};

/// How a relation's rows are placed across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
    /// Rows are sharded by the value of a partition-key column.
    KeyDistributed,
    /// A full copy lives on every node.
    Reference,
    /// Not distributed at all.
    None,
}

impl PartitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionMethod::KeyDistributed => "KEY_DISTRIBUTED",
            PartitionMethod::Reference => "REFERENCE",
            PartitionMethod::None => "NONE",
        }
    }

    /// Map a distribution-catalog method code: `h`ash, `r`ange and `a`ppend
    /// distribute by key; `n`one marks a reference table.
    pub fn from_code(code: char) -> Result<Self, ColocationError> {
        match code {
            'h' | 'r' | 'a' => Ok(PartitionMethod::KeyDistributed),
            'n' => Ok(PartitionMethod::Reference),
            other => Err(ColocationError::InvalidArgument(format!(
                "unknown partition method code: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for PartitionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookups the analysis needs from the host's metadata.
pub trait DistributionMetadata {
    /// Distribution method of `relation`.
    fn partition_method(&self, relation: RelationId) -> PartitionMethod;

    /// Partition-key attribute of `relation`; meaningful only for
    /// key-distributed relations.
    fn partition_key(&self, relation: RelationId) -> Option<AttrNumber>;

    /// Whether `operator` is an equality operator.
    fn operator_implements_equality(&self, operator: OperatorId) -> bool;

    /// Whether `relation` is sharded by a known key column.
    fn is_sharded(&self, relation: RelationId) -> bool {
        self.partition_method(relation) == PartitionMethod::KeyDistributed
            && self.partition_key(relation).is_some()
    }
}

/// Whether `expr` is exactly the partition-key column of a sharded relation
/// scanned directly in `level`.
pub fn is_partition_column<M>(level: &QueryLevel, expr: &Expr, metadata: &M) -> bool
where
    M: DistributionMetadata + ?Sized,
{
    let Some(column) = expr.as_column() else {
        return false;
    };
    if column.levels_up != 0 || column.is_whole_row() {
        return false;
    }
    match level.entry(column.slot) {
        Some(RangeEntry::Relation { relation_id, .. }) => {
            metadata.is_sharded(*relation_id)
                && metadata.partition_key(*relation_id) == Some(column.attribute)
        }
        _ => false,
    }
}

// ── In-memory metadata ──────────────────────────────────────────────────

/// Built-in btree equality operators: `int2eq`, `int4eq`, `int8eq`,
/// `int48eq`, `int84eq`, `int24eq`, `int42eq`, `texteq`, `bpchareq`,
/// `date_eq`, `numeric_eq`, `timestamp_eq`, `uuid_eq`.
pub const BUILTIN_EQUALITY_OPERATORS: &[u32] = &[
    94, 96, 410, 15, 416, 532, 533, 98, 1054, 1093, 1752, 2060, 2972,
];

/// Distribution metadata of one relation.
///
/// Deserializes from either a `method` name or a catalog `method_code`
/// (`h`, `r`, `a` or `n`). A key-distributed relation must name its
/// partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RelationDescriptorRepr")]
pub struct RelationDescriptor {
    pub name: String,
    pub method: PartitionMethod,
    pub partition_key: Option<AttrNumber>,
}

impl RelationDescriptor {
    /// Build a descriptor from a distribution-catalog row.
    pub fn from_catalog(
        name: &str,
        method_code: char,
        partition_key: Option<AttrNumber>,
    ) -> Result<Self, ColocationError> {
        Self::validated(name.to_string(), PartitionMethod::from_code(method_code)?, partition_key)
    }

    fn validated(
        name: String,
        method: PartitionMethod,
        partition_key: Option<AttrNumber>,
    ) -> Result<Self, ColocationError> {
        if method == PartitionMethod::KeyDistributed && partition_key.is_none() {
            return Err(ColocationError::InvalidArgument(format!(
                "key-distributed relation \"{name}\" has no partition key"
            )));
        }
        Ok(Self {
            name,
            method,
            partition_key,
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationDescriptorRepr {
    #[serde(default)]
    name: String,
    #[serde(default)]
    method: Option<PartitionMethod>,
    #[serde(default)]
    method_code: Option<char>,
    #[serde(default)]
    partition_key: Option<AttrNumber>,
}

impl TryFrom<RelationDescriptorRepr> for RelationDescriptor {
    type Error = ColocationError;

    fn try_from(repr: RelationDescriptorRepr) -> Result<Self, Self::Error> {
        let method = match (repr.method, repr.method_code) {
            (Some(method), None) => method,
            (None, Some(code)) => PartitionMethod::from_code(code)?,
            (Some(_), Some(_)) => {
                return Err(ColocationError::InvalidArgument(format!(
                    "relation \"{}\" has both method and method_code",
                    repr.name
                )));
            }
            (None, None) => {
                return Err(ColocationError::InvalidArgument(format!(
                    "relation \"{}\" has no distribution method",
                    repr.name
                )));
            }
        };
        Self::validated(repr.name, method, repr.partition_key)
    }
}

/// In-memory [`DistributionMetadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCache {
    #[serde(default)]
    relations: HashMap<RelationId, RelationDescriptor>,
    #[serde(default = "builtin_equality_operators")]
    equality_operators: BTreeSet<OperatorId>,
}

fn builtin_equality_operators() -> BTreeSet<OperatorId> {
    BUILTIN_EQUALITY_OPERATORS
        .iter()
        .map(|&oid| OperatorId(oid))
        .collect()
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    /// Empty cache that knows the built-in equality operators.
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            equality_operators: builtin_equality_operators(),
        }
    }

    /// Register a table sharded by `partition_key`.
    pub fn add_sharded(&mut self, relation: RelationId, name: &str, partition_key: AttrNumber) {
        self.relations.insert(
            relation,
            RelationDescriptor {
                name: name.to_string(),
                method: PartitionMethod::KeyDistributed,
                partition_key: Some(partition_key),
            },
        );
    }

    /// Register a reference table.
    pub fn add_reference(&mut self, relation: RelationId, name: &str) {
        self.relations.insert(
            relation,
            RelationDescriptor {
                name: name.to_string(),
                method: PartitionMethod::Reference,
                partition_key: None,
            },
        );
    }

    /// Register an additional equality operator.
    pub fn add_equality_operator(&mut self, operator: OperatorId) {
        self.equality_operators.insert(operator);
    }

    pub fn descriptor(&self, relation: RelationId) -> Option<&RelationDescriptor> {
        self.relations.get(&relation)
    }
}

impl DistributionMetadata for MetadataCache {
    fn partition_method(&self, relation: RelationId) -> PartitionMethod {
        self.relations
            .get(&relation)
            .map(|d| d.method)
            .unwrap_or(PartitionMethod::None)
    }

    fn partition_key(&self, relation: RelationId) -> Option<AttrNumber> {
        self.relations.get(&relation).and_then(|d| d.partition_key)
    }

    fn operator_implements_equality(&self, operator: OperatorId) -> bool {
        self.equality_operators.contains(&operator)
    }
}
