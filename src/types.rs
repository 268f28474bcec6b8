use std::fmt;

use crate::engine::Engine;
use crate::ffi::RawParameter;

/// Engine library version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Queries the version of the library behind `engine`
pub fn version(engine: &dyn Engine) -> Version {
    let mut version = Version {
        major: 0,
        minor: 0,
        revision: 0,
    };
    engine.get_version(&mut version.major, &mut version.minor, &mut version.revision);
    version
}

/// Numeric configuration value for environment and database creation.
///
/// `name` is one of the `PARAM_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: u32,
    pub value: u64,
}

impl Parameter {
    pub fn new(name: u32, value: u64) -> Self {
        Parameter { name, value }
    }
}

/// Wire form of a parameter list, terminated by a zero name
pub(crate) fn raw_parameters(params: &[Parameter]) -> Vec<RawParameter> {
    params
        .iter()
        .map(|param| RawParameter {
            name: param.name,
            value: param.value,
        })
        .chain(std::iter::once(RawParameter::TERMINATOR))
        .collect()
}
