//! Wire shapes of the rule payloads delivered by the synchronization layer.
//!
//! These types only describe the JSON; nothing here is evaluable. [crate::Flag] and
//! [crate::Segment] are built from them, validating and normalizing as they go.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDto {
    pub name: String,
    #[serde(default)]
    pub traffic_type_name: Option<String>,
    #[serde(default)]
    pub killed: bool,
    pub default_treatment: String,
    #[serde(default)]
    pub seed: i64,
    #[serde(default = "full_traffic_allocation")]
    pub traffic_allocation: i64,
    #[serde(default)]
    pub traffic_allocation_seed: i64,
    #[serde(default)]
    pub algo: Option<i64>,
    #[serde(default)]
    pub change_number: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub conditions: Vec<ConditionDto>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub configurations: HashMap<String, String>,
}

fn full_traffic_allocation() -> i64 {
    100
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionDto {
    #[serde(default)]
    pub condition_type: Option<String>,
    pub matcher_group: MatcherGroupDto,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub partitions: Vec<PartitionDto>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub label: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherGroupDto {
    #[serde(default)]
    pub combiner: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub matchers: Vec<MatcherDto>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PartitionDto {
    pub treatment: String,
    pub size: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherDto {
    pub matcher_type: String,
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub key_selector: Option<KeySelectorDto>,
    #[serde(default)]
    pub user_defined_segment_matcher_data: Option<SegmentMatcherDataDto>,
    #[serde(default)]
    pub whitelist_matcher_data: Option<WhitelistMatcherDataDto>,
    #[serde(default)]
    pub unary_numeric_matcher_data: Option<UnaryNumericMatcherDataDto>,
    #[serde(default)]
    pub between_matcher_data: Option<BetweenMatcherDataDto>,
    #[serde(default)]
    pub between_string_matcher_data: Option<BetweenStringMatcherDataDto>,
    #[serde(default)]
    pub dependency_matcher_data: Option<DependencyMatcherDataDto>,
    #[serde(default)]
    pub boolean_matcher_data: Option<bool>,
    #[serde(default)]
    pub string_matcher_data: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySelectorDto {
    #[serde(default)]
    pub traffic_type: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMatcherDataDto {
    pub segment_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WhitelistMatcherDataDto {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub whitelist: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnaryNumericMatcherDataDto {
    #[serde(default)]
    pub data_type: Option<String>,
    pub value: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetweenMatcherDataDto {
    #[serde(default)]
    pub data_type: Option<String>,
    pub start: i64,
    pub end: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BetweenStringMatcherDataDto {
    pub start: String,
    pub end: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DependencyMatcherDataDto {
    pub split: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub treatments: Vec<String>,
}

/// A segment change payload. The segment's members are `added` minus `removed`.
#[derive(Clone, Debug, Deserialize)]
pub struct SegmentDto {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub added: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub removed: Vec<String>,
    #[serde(default)]
    pub till: i64,
}

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}
