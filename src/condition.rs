use itertools::Itertools;
use serde::Serialize;

use crate::attribute_value::Attributes;
use crate::bucketing::BUCKET_COUNT;
use crate::config::Config;
use crate::dto::ConditionDto;
use crate::error::BuildError;
use crate::eval::EvaluationStack;
use crate::key::Key;
use crate::matcher::Matcher;
use crate::store::Store;

/// Whether a condition is subject to the flag's traffic allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    /// Explicit targeting, evaluated even for keys outside the allocated traffic.
    Whitelist,
    /// Percentage rollout. The traffic allocation gate sits in front of the first one.
    Rollout,
}

/// A treatment and the share of buckets it covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub treatment: String,
    pub size: u32,
}

impl Partition {
    pub fn new(treatment: impl Into<String>, size: u32) -> Self {
        Partition {
            treatment: treatment.into(),
            size,
        }
    }
}

/// An AND of matchers plus the weighted treatments handed out when they all pass.
#[derive(Clone, Debug)]
pub struct Condition {
    pub kind: ConditionKind,
    pub label: String,
    matchers: Vec<Matcher>,
    partitions: Vec<Partition>,
}

impl Condition {
    /// Create a rollout condition for the flag called `flag`, checking that the partition sizes
    /// cover exactly 100 buckets. `flag` only names the flag in errors.
    pub fn new(
        flag: &str,
        label: impl Into<String>,
        matchers: Vec<Matcher>,
        partitions: Vec<Partition>,
    ) -> Result<Condition, BuildError> {
        Condition::validated(flag, ConditionKind::Rollout, label.into(), matchers, partitions)
    }

    pub fn with_kind(mut self, kind: ConditionKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn build(flag: &str, dto: &ConditionDto) -> Result<Condition, BuildError> {
        match dto.matcher_group.combiner.as_deref() {
            None | Some("AND") => (),
            Some(other) => {
                return Err(BuildError::UnsupportedCombiner {
                    flag: flag.to_string(),
                    combiner: other.to_string(),
                })
            }
        }

        let kind = match dto.condition_type.as_deref() {
            Some("WHITELIST") => ConditionKind::Whitelist,
            _ => ConditionKind::Rollout,
        };

        let matchers = dto
            .matcher_group
            .matchers
            .iter()
            .map(|m| Matcher::build(flag, m))
            .collect::<Result<Vec<_>, _>>()?;

        let invalid_sizes = || BuildError::InvalidPartitionSizes {
            flag: flag.to_string(),
            label: dto.label.clone(),
            sizes: dto.partitions.iter().map(|p| p.size).join(", "),
        };
        let partitions = dto
            .partitions
            .iter()
            .map(|p| {
                u32::try_from(p.size)
                    .map(|size| Partition::new(p.treatment.clone(), size))
                    .map_err(|_| invalid_sizes())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Condition::validated(flag, kind, dto.label.clone(), matchers, partitions)
    }

    fn validated(
        flag: &str,
        kind: ConditionKind,
        label: String,
        matchers: Vec<Matcher>,
        partitions: Vec<Partition>,
    ) -> Result<Condition, BuildError> {
        if partitions.is_empty() {
            return Err(BuildError::EmptyPartitions {
                flag: flag.to_string(),
                label,
            });
        }
        let total: u64 = partitions.iter().map(|p| u64::from(p.size)).sum();
        if total != u64::from(BUCKET_COUNT) {
            return Err(BuildError::InvalidPartitionSizes {
                flag: flag.to_string(),
                sizes: partitions.iter().map(|p| p.size).join(", "),
                label,
            });
        }

        Ok(Condition {
            kind,
            label,
            matchers,
            partitions,
        })
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Conditions match if _all_ of their matchers do; an empty condition matches everyone.
    ///
    /// Matchers run in order and stop at the first failure. Dependencies are evaluated with the
    /// default [Config] limits.
    pub fn matches(&self, key: &Key, attributes: &Attributes, store: &dyn Store) -> bool {
        let mut stack = EvaluationStack::new(&Config::default());
        self.matches_within(key, attributes, store, &mut stack)
    }

    pub(crate) fn matches_within(
        &self,
        key: &Key,
        attributes: &Attributes,
        store: &dyn Store,
        stack: &mut EvaluationStack,
    ) -> bool {
        for matcher in &self.matchers {
            if !matcher.matches_within(key, attributes, store, stack) {
                return false;
            }
        }
        true
    }
}
