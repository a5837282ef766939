use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Installation tiers, lowest first. A package may only depend on packages of
/// strictly lower tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Genesis: the trusted bootstrap set, installed without the capability layer.
    G0,
    T0,
    T1,
    T2,
    T3,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::G0, Tier::T0, Tier::T1, Tier::T2, Tier::T3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::G0 => "G0",
            Tier::T0 => "T0",
            Tier::T1 => "T1",
            Tier::T2 => "T2",
            Tier::T3 => "T3",
        }
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self, Tier::G0)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tier: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_genesis_first() {
        let mut shuffled = vec![Tier::T2, Tier::G0, Tier::T3, Tier::T0, Tier::T1];
        shuffled.sort();
        assert_eq!(shuffled, Tier::ALL.to_vec());
    }

    #[test]
    fn tier_names_round_trip() {
        assert_eq!("t1".parse::<Tier>().unwrap(), Tier::T1);
        assert_eq!(serde_json::to_string(&Tier::G0).unwrap(), "\"G0\"");
        assert!("T9".parse::<Tier>().is_err());
    }
}
