use std::collections::HashMap;

use crate::bucketing::{HashAlgorithm, BUCKET_COUNT};
use crate::condition::Condition;
use crate::dto::FlagDto;
use crate::error::BuildError;

/// A flag definition ready for evaluation.
///
/// Built once per rule payload and never mutated afterwards; evaluations only read it.
#[derive(Clone, Debug)]
pub struct Flag {
    pub name: String,
    pub traffic_type: Option<String>,
    pub change_number: i64,

    pub(crate) killed: bool,
    pub(crate) default_treatment: String,
    pub(crate) seed: i64,
    pub(crate) traffic_allocation: u32,
    pub(crate) traffic_allocation_seed: i64,
    pub(crate) algorithm: HashAlgorithm,
    pub(crate) conditions: Vec<Condition>,
    configurations: HashMap<String, String>,
}

impl Flag {
    /// Create a flag with no conditions that hands everyone `default_treatment`.
    ///
    /// Like a payload that leaves them out, it uses the [default](HashAlgorithm::default) hash
    /// algorithm with seed 0 and lets all traffic in.
    pub fn new(name: impl Into<String>, default_treatment: impl Into<String>) -> Self {
        Flag {
            name: name.into(),
            traffic_type: None,
            change_number: 0,
            killed: false,
            default_treatment: default_treatment.into(),
            seed: 0,
            traffic_allocation: BUCKET_COUNT,
            traffic_allocation_seed: 0,
            algorithm: HashAlgorithm::default(),
            conditions: vec![],
            configurations: HashMap::new(),
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_seed(mut self, algorithm: HashAlgorithm, seed: i64) -> Self {
        self.algorithm = algorithm;
        self.seed = seed;
        self
    }

    pub fn with_traffic_allocation(
        mut self,
        allocation: u32,
        seed: i64,
    ) -> Result<Self, BuildError> {
        self.traffic_allocation = checked_allocation(&self.name, i64::from(allocation))?;
        self.traffic_allocation_seed = seed;
        Ok(self)
    }

    pub fn with_configuration(
        mut self,
        treatment: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        self.configurations.insert(treatment.into(), config.into());
        self
    }

    pub fn kill(mut self) -> Self {
        self.killed = true;
        self
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn default_treatment(&self) -> &str {
        &self.default_treatment
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// The configuration payload attached to `treatment`, if any.
    pub fn config_for(&self, treatment: &str) -> Option<&str> {
        self.configurations.get(treatment).map(String::as_str)
    }

    /// Every treatment this flag can hand out, in first-seen order.
    pub fn treatments(&self) -> Vec<&str> {
        let mut treatments: Vec<&str> = vec![];
        let candidates = self
            .conditions
            .iter()
            .flat_map(|c| c.partitions().iter().map(|p| p.treatment.as_str()))
            .chain(std::iter::once(self.default_treatment.as_str()));
        for treatment in candidates {
            if !treatments.contains(&treatment) {
                treatments.push(treatment);
            }
        }
        treatments
    }
}

fn checked_allocation(flag: &str, allocation: i64) -> Result<u32, BuildError> {
    u32::try_from(allocation)
        .ok()
        .filter(|a| *a <= BUCKET_COUNT)
        .ok_or_else(|| BuildError::InvalidTrafficAllocation {
            flag: flag.to_string(),
            allocation,
        })
}

impl TryFrom<FlagDto> for Flag {
    type Error = BuildError;

    fn try_from(dto: FlagDto) -> Result<Self, Self::Error> {
        let algorithm =
            HashAlgorithm::from_code(dto.algo).ok_or_else(|| BuildError::UnknownAlgorithm {
                flag: dto.name.clone(),
                algo: dto.algo.unwrap_or_default(),
            })?;
        let traffic_allocation = checked_allocation(&dto.name, dto.traffic_allocation)?;
        let conditions = dto
            .conditions
            .iter()
            .map(|c| Condition::build(&dto.name, c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Flag {
            name: dto.name,
            traffic_type: dto.traffic_type_name,
            change_number: dto.change_number,
            killed: dto.killed,
            default_treatment: dto.default_treatment,
            seed: dto.seed,
            traffic_allocation,
            traffic_allocation_seed: dto.traffic_allocation_seed,
            algorithm,
            conditions,
            configurations: dto.configurations,
        })
    }
}
