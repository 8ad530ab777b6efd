use serde::Deserialize;

const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 10;

/// Options that tune evaluation. Loading these is left to the caller; every field has a default so
/// a partial JSON document is enough.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Attach a [crate::Label] to every [crate::Decision]. When false, labels are left out.
    pub labels_enabled: bool,

    /// How many flags deep a chain of dependency matchers may go before it is cut off.
    pub max_dependency_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            labels_enabled: true,
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
        }
    }
}
