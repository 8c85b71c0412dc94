use core::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::ParseIntError,
    str::FromStr,
};
use std::collections::BTreeSet;

use derive_more::{Deref, From, IntoIterator};

use crate::primitives::ValidatorIndex;

/// Validators whose duties and statuses are tracked.
///
/// Indices are kept sorted so that requests built from the set are deterministic.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deref, From, IntoIterator)]
pub struct ValidatorSet(#[into_iterator(owned, ref)] BTreeSet<ValidatorIndex>);

impl FromIterator<ValidatorIndex> for ValidatorSet {
    fn from_iter<I: IntoIterator<Item = ValidatorIndex>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for ValidatorSet {
    type Err = ParseIntError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        string
            .split(',')
            .map(str::trim)
            .filter(|index| !index.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl Display for ValidatorSet {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        let mut first = true;

        for index in &self.0 {
            if !first {
                formatter.write_str(",")?;
            }

            write!(formatter, "{index}")?;
            first = false;
        }

        Ok(())
    }
}

impl ValidatorSet {
    /// Indices in the string form the Beacon Node API expects in request bodies.
    #[must_use]
    pub fn to_request_body(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}
