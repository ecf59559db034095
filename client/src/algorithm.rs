use std::fmt;

use serde::{Deserialize, Serialize};

/// The federated algorithm of an experiment, selected once for every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    FedAvg,
    FedProx,
    FedOpt,
    Scaffold,
    FedRs,
}

impl Algorithm {
    /// Returns whether clients and server exchange control variates.
    pub fn uses_control_variates(self) -> bool {
        self == Algorithm::Scaffold
    }

    /// Returns whether the server applies its own optimizer to the mean update.
    pub fn uses_server_optimizer(self) -> bool {
        self == Algorithm::FedOpt
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::FedAvg => "fed_avg",
            Algorithm::FedProx => "fed_prox",
            Algorithm::FedOpt => "fed_opt",
            Algorithm::Scaffold => "scaffold",
            Algorithm::FedRs => "fed_rs",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
