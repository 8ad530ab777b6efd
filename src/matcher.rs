use std::collections::HashSet;

use log::debug;
use regex::Regex;

use crate::attribute_value::{parse_semver, start_of_day, AttributeValue, Attributes};
use crate::config::Config;
use crate::dto::MatcherDto;
use crate::error::BuildError;
use crate::eval::{self, EvaluationStack};
use crate::key::Key;
use crate::store::Store;

/// How numeric comparison literals and operands are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// Plain integers compared as they are.
    Number,
    /// Epoch timestamps compared at the granularity of a UTC day.
    Datetime,
}

impl DataType {
    fn parse(flag: &str, data_type: Option<&str>) -> Result<DataType, BuildError> {
        match data_type {
            None | Some("NUMBER") => Ok(DataType::Number),
            Some("DATETIME") => Ok(DataType::Datetime),
            Some(other) => Err(BuildError::UnknownDataType {
                flag: flag.to_string(),
                data_type: other.to_string(),
            }),
        }
    }

    /// Literals arrive as epoch milliseconds for datetimes; they are kept as day-truncated epoch
    /// seconds, the same shape operands are normalized to.
    fn normalize_literal(self, flag: &str, value: i64) -> Result<i64, BuildError> {
        match self {
            DataType::Number => Ok(value),
            DataType::Datetime => {
                start_of_day(value.div_euclid(1000)).ok_or_else(|| BuildError::InvalidTimestamp {
                    flag: flag.to_string(),
                    millis: value,
                })
            }
        }
    }

    fn normalize_operand(self, operand: Operand) -> Option<i64> {
        match self {
            DataType::Number => operand.as_value()?.to_i64(),
            DataType::Datetime => start_of_day(operand.as_value()?.to_epoch_seconds()?),
        }
    }
}

/// The comparison a [Matcher] performs. Literals are normalized when the matcher is built.
#[derive(Clone, Debug)]
pub enum MatcherKind {
    AllKeys,
    InSegment { segment: String },
    Whitelist { values: HashSet<String> },
    EqualTo { data_type: DataType, value: i64 },
    GreaterOrEqual { data_type: DataType, value: i64 },
    LessOrEqual { data_type: DataType, value: i64 },
    Between { data_type: DataType, start: i64, end: i64 },
    EqualToSet { values: HashSet<String> },
    PartOfSet { values: HashSet<String> },
    ContainsAllOfSet { values: HashSet<String> },
    ContainsAnyOfSet { values: HashSet<String> },
    StartsWith { values: Vec<String> },
    EndsWith { values: Vec<String> },
    ContainsString { values: Vec<String> },
    Regex { regex: Regex },
    Boolean { value: bool },
    Dependency { flag: String, treatments: HashSet<String> },
    EqualToSemver { version: semver::Version },
    GreaterOrEqualSemver { version: semver::Version },
    LessOrEqualSemver { version: semver::Version },
    BetweenSemver { start: semver::Version, end: semver::Version },
    InListSemver { versions: Vec<semver::Version> },
}

/// One atomic predicate of a [crate::Condition].
///
/// A matcher reads the attribute it selects, or the matching key when it selects none, coerces it
/// to the shape its comparison needs and compares. Anything that cannot be read or coerced counts
/// as no match, which `negate` then inverts like any other result.
#[derive(Clone, Debug)]
pub struct Matcher {
    negate: bool,
    attribute: Option<String>,
    kind: MatcherKind,
}

#[derive(Clone, Copy)]
enum Operand<'a> {
    Key(&'a str),
    Value(&'a AttributeValue),
}

impl<'a> Operand<'a> {
    fn as_str(self) -> Option<&'a str> {
        match self {
            Operand::Key(key) => Some(key),
            Operand::Value(value) => value.as_str(),
        }
    }

    fn as_value(self) -> Option<&'a AttributeValue> {
        match self {
            Operand::Key(_) => None,
            Operand::Value(value) => Some(value),
        }
    }

    fn as_bool(self) -> Option<bool> {
        match self {
            Operand::Key(key) => parse_bool(key),
            Operand::Value(value) => value.as_bool(),
        }
    }

    fn as_semver(self) -> Option<semver::Version> {
        parse_semver(self.as_str()?)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl Matcher {
    pub fn new(kind: MatcherKind) -> Self {
        Matcher {
            negate: false,
            attribute: None,
            kind,
        }
    }

    /// Target the named attribute instead of the matching key.
    pub fn on_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn kind(&self) -> &MatcherKind {
        &self.kind
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Builds a matcher from its wire shape. `flag` names the owning flag in errors.
    pub fn build(flag: &str, dto: &MatcherDto) -> Result<Matcher, BuildError> {
        let missing = |field: &'static str| BuildError::MissingMatcherData {
            flag: flag.to_string(),
            matcher_type: dto.matcher_type.clone(),
            field,
        };
        let whitelist = || {
            dto.whitelist_matcher_data
                .as_ref()
                .map(|data| data.whitelist.clone())
                .ok_or_else(|| missing("whitelistMatcherData"))
        };
        let unary = || {
            let data = dto
                .unary_numeric_matcher_data
                .as_ref()
                .ok_or_else(|| missing("unaryNumericMatcherData"))?;
            let data_type = DataType::parse(flag, data.data_type.as_deref())?;
            let value = data_type.normalize_literal(flag, data.value)?;
            Ok::<_, BuildError>((data_type, value))
        };
        let semver_literal = |version: &str| {
            parse_semver(version).ok_or_else(|| BuildError::InvalidSemver {
                flag: flag.to_string(),
                version: version.to_string(),
            })
        };
        let string_literal = || {
            dto.string_matcher_data
                .as_deref()
                .ok_or_else(|| missing("stringMatcherData"))
        };

        let kind = match dto.matcher_type.as_str() {
            "ALL_KEYS" => MatcherKind::AllKeys,
            "IN_SEGMENT" => MatcherKind::InSegment {
                segment: dto
                    .user_defined_segment_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("userDefinedSegmentMatcherData"))?
                    .segment_name
                    .clone(),
            },
            "WHITELIST" => MatcherKind::Whitelist {
                values: whitelist()?.into_iter().collect(),
            },
            "EQUAL_TO" => {
                let (data_type, value) = unary()?;
                MatcherKind::EqualTo { data_type, value }
            }
            "GREATER_THAN_OR_EQUAL_TO" => {
                let (data_type, value) = unary()?;
                MatcherKind::GreaterOrEqual { data_type, value }
            }
            "LESS_THAN_OR_EQUAL_TO" => {
                let (data_type, value) = unary()?;
                MatcherKind::LessOrEqual { data_type, value }
            }
            "BETWEEN" => {
                let data = dto
                    .between_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("betweenMatcherData"))?;
                let data_type = DataType::parse(flag, data.data_type.as_deref())?;
                MatcherKind::Between {
                    data_type,
                    start: data_type.normalize_literal(flag, data.start)?,
                    end: data_type.normalize_literal(flag, data.end)?,
                }
            }
            "EQUAL_TO_SET" => MatcherKind::EqualToSet {
                values: whitelist()?.into_iter().collect(),
            },
            "PART_OF_SET" => MatcherKind::PartOfSet {
                values: whitelist()?.into_iter().collect(),
            },
            "CONTAINS_ALL_OF_SET" => MatcherKind::ContainsAllOfSet {
                values: whitelist()?.into_iter().collect(),
            },
            "CONTAINS_ANY_OF_SET" => MatcherKind::ContainsAnyOfSet {
                values: whitelist()?.into_iter().collect(),
            },
            "STARTS_WITH" => MatcherKind::StartsWith {
                values: whitelist()?,
            },
            "ENDS_WITH" => MatcherKind::EndsWith {
                values: whitelist()?,
            },
            "CONTAINS_STRING" => MatcherKind::ContainsString {
                values: whitelist()?,
            },
            "MATCHES_STRING" => {
                let pattern = string_literal()?;
                let regex = Regex::new(pattern).map_err(|source| BuildError::InvalidRegex {
                    flag: flag.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?;
                MatcherKind::Regex { regex }
            }
            "EQUAL_TO_BOOLEAN" => MatcherKind::Boolean {
                value: dto
                    .boolean_matcher_data
                    .ok_or_else(|| missing("booleanMatcherData"))?,
            },
            "IN_SPLIT_TREATMENT" => {
                let data = dto
                    .dependency_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("dependencyMatcherData"))?;
                MatcherKind::Dependency {
                    flag: data.split.clone(),
                    treatments: data.treatments.iter().cloned().collect(),
                }
            }
            "EQUAL_TO_SEMVER" => MatcherKind::EqualToSemver {
                version: semver_literal(string_literal()?)?,
            },
            "GREATER_THAN_OR_EQUAL_TO_SEMVER" => MatcherKind::GreaterOrEqualSemver {
                version: semver_literal(string_literal()?)?,
            },
            "LESS_THAN_OR_EQUAL_TO_SEMVER" => MatcherKind::LessOrEqualSemver {
                version: semver_literal(string_literal()?)?,
            },
            "BETWEEN_SEMVER" => {
                let data = dto
                    .between_string_matcher_data
                    .as_ref()
                    .ok_or_else(|| missing("betweenStringMatcherData"))?;
                MatcherKind::BetweenSemver {
                    start: semver_literal(&data.start)?,
                    end: semver_literal(&data.end)?,
                }
            }
            "IN_LIST_SEMVER" => MatcherKind::InListSemver {
                versions: whitelist()?
                    .iter()
                    .map(|v| semver_literal(v.as_str()))
                    .collect::<Result<_, _>>()?,
            },
            other => {
                return Err(BuildError::UnknownMatcherType {
                    flag: flag.to_string(),
                    matcher_type: other.to_string(),
                })
            }
        };

        let attribute = dto
            .key_selector
            .as_ref()
            .and_then(|selector| selector.attribute.clone());

        Ok(Matcher {
            negate: dto.negate,
            attribute,
            kind,
        })
    }

    /// Test this matcher against `key` and `attributes` on its own.
    ///
    /// Dependency matchers evaluate the flags they name in `store` with the default
    /// [Config] limits; a dependency cycle makes the matcher fail rather than raising an error.
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
        let matched = self.compare(key, attributes, store, stack);
        matched != self.negate
    }

    fn operand<'a>(&self, key: &'a Key, attributes: &'a Attributes) -> Option<Operand<'a>> {
        match &self.attribute {
            None => Some(Operand::Key(key.matching_key())),
            Some(name) => match attributes.get(name) {
                Some(value) => Some(Operand::Value(value)),
                None => {
                    debug!("attribute {} not supplied", name);
                    None
                }
            },
        }
    }

    fn compare(
        &self,
        key: &Key,
        attributes: &Attributes,
        store: &dyn Store,
        stack: &mut EvaluationStack,
    ) -> bool {
        match &self.kind {
            MatcherKind::AllKeys => return true,
            MatcherKind::Dependency { flag, treatments } => {
                return eval::dependency_treatment(store, flag, key, attributes, stack)
                    .map(|treatment| treatments.contains(&treatment))
                    .unwrap_or(false);
            }
            _ => (),
        }

        let operand = match self.operand(key, attributes) {
            Some(operand) => operand,
            None => return false,
        };

        match &self.kind {
            // resolved before the operand lookup
            MatcherKind::AllKeys | MatcherKind::Dependency { .. } => true,
            MatcherKind::InSegment { segment } => operand
                .as_str()
                .and_then(|k| store.segment(segment).map(|s| s.contains(k)))
                .unwrap_or(false),
            MatcherKind::Whitelist { values } => string_op(operand, |s| values.contains(s)),

            MatcherKind::EqualTo { data_type, value } => {
                numeric_op(*data_type, operand, |v| v == *value)
            }
            MatcherKind::GreaterOrEqual { data_type, value } => {
                numeric_op(*data_type, operand, |v| v >= *value)
            }
            MatcherKind::LessOrEqual { data_type, value } => {
                numeric_op(*data_type, operand, |v| v <= *value)
            }
            MatcherKind::Between {
                data_type,
                start,
                end,
            } => numeric_op(*data_type, operand, |v| *start <= v && v <= *end),

            MatcherKind::EqualToSet { values } => {
                set_op(operand, |set| set.len() == values.len() && contains_all(&set, values))
            }
            MatcherKind::PartOfSet { values } => {
                set_op(operand, |set| !set.is_empty() && contains_all(&set, values))
            }
            MatcherKind::ContainsAllOfSet { values } => {
                set_op(operand, |set| !values.is_empty() && contains_all(&set, values))
            }
            MatcherKind::ContainsAnyOfSet { values } => {
                set_op(operand, |set| values.iter().any(|v| set.contains(v.as_str())))
            }

            MatcherKind::StartsWith { values } => {
                string_op(operand, |s| values.iter().any(|v| s.starts_with(v.as_str())))
            }
            MatcherKind::EndsWith { values } => {
                string_op(operand, |s| values.iter().any(|v| s.ends_with(v.as_str())))
            }
            MatcherKind::ContainsString { values } => {
                string_op(operand, |s| values.iter().any(|v| s.contains(v.as_str())))
            }
            MatcherKind::Regex { regex } => string_op(operand, |s| regex.is_match(s)),

            MatcherKind::Boolean { value } => operand.as_bool() == Some(*value),

            MatcherKind::EqualToSemver { version } => semver_op(operand, |v| v == *version),
            MatcherKind::GreaterOrEqualSemver { version } => semver_op(operand, |v| v >= *version),
            MatcherKind::LessOrEqualSemver { version } => semver_op(operand, |v| v <= *version),
            MatcherKind::BetweenSemver { start, end } => {
                semver_op(operand, |v| *start <= v && v <= *end)
            }
            MatcherKind::InListSemver { versions } => semver_op(operand, |v| versions.contains(&v)),
        }
    }
}

fn string_op<F: Fn(&str) -> bool>(operand: Operand, f: F) -> bool {
    operand.as_str().map(f).unwrap_or(false)
}

fn numeric_op<F: Fn(i64) -> bool>(data_type: DataType, operand: Operand, f: F) -> bool {
    data_type.normalize_operand(operand).map(f).unwrap_or(false)
}

fn set_op<F: Fn(HashSet<&str>) -> bool>(operand: Operand, f: F) -> bool {
    operand
        .as_value()
        .and_then(AttributeValue::as_set)
        .map(f)
        .unwrap_or(false)
}

fn semver_op<F: Fn(semver::Version) -> bool>(operand: Operand, f: F) -> bool {
    operand.as_semver().map(f).unwrap_or(false)
}

fn contains_all(set: &HashSet<&str>, values: &HashSet<String>) -> bool {
    values.iter().all(|v| set.contains(v.as_str()))
}
