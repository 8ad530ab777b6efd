use thiserror::Error;

/// Errors raised while turning wire payloads into an evaluable [crate::Snapshot].
///
/// None of these can occur during evaluation: a rule that fails to build is rejected before it is
/// ever published.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("flag {flag}: unknown matcher type {matcher_type}")]
    UnknownMatcherType { flag: String, matcher_type: String },

    #[error("flag {flag}: matcher {matcher_type} is missing its {field} data")]
    MissingMatcherData {
        flag: String,
        matcher_type: String,
        field: &'static str,
    },

    #[error("flag {flag}: invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        flag: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("flag {flag}: invalid semantic version {version:?}")]
    InvalidSemver { flag: String, version: String },

    #[error("flag {flag}: timestamp {millis} is out of range")]
    InvalidTimestamp { flag: String, millis: i64 },

    #[error("flag {flag}: unsupported data type {data_type}")]
    UnknownDataType { flag: String, data_type: String },

    #[error("flag {flag}: unsupported matcher combiner {combiner}")]
    UnsupportedCombiner { flag: String, combiner: String },

    #[error("flag {flag}: condition {label:?} has no partitions")]
    EmptyPartitions { flag: String, label: String },

    #[error("flag {flag}: condition {label:?} partition sizes [{sizes}] do not sum to 100")]
    InvalidPartitionSizes {
        flag: String,
        label: String,
        sizes: String,
    },

    #[error("flag {flag}: traffic allocation {allocation} is outside [0, 100]")]
    InvalidTrafficAllocation { flag: String, allocation: i64 },

    #[error("flag {flag}: unknown hash algorithm {algo}")]
    UnknownAlgorithm { flag: String, algo: i64 },

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when constructing a [crate::Key].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{0} must be a non-empty string")]
    Empty(&'static str),

    #[error("{name} is {length} characters long, the maximum is {max}")]
    TooLong {
        name: &'static str,
        length: usize,
        max: usize,
    },
}
