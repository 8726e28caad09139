use super::SimError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Defines the family of hydraulic functions (retention curve and conductivity)
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum HydraulicFamily {
    /// Empirical rational functions of Haverkamp et al. (1977)
    Haverkamp,

    /// Closed-form functions of van Genuchten (1980)
    VanGenuchten,
}

/// Defines the relative permeability model accounting for pore clogging by biomass
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum RelativePermeability {
    /// Saturation-based power law (Soleimani et al. 2009)
    Soleimani,

    /// Porosity-reduction power law with exponent 3 (Clement et al. 1996)
    Clement,

    /// Porosity-reduction power law with exponent 2 (Okubo and Matsumoto 1983)
    OkuboAndMatsumoto,

    /// Exponential blend between a power law and a biofilm plug (Vandevivere 1995)
    Vandevivere,
}

/// Defines the form of the Richards equation
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum FlowEquation {
    /// Pressure-head form with the specific moisture capacity in the mass term
    Head,

    /// Mixed form with the explicit moisture-content time derivative
    Mixed,
}

/// Defines the boundary through which nutrients enter the domain
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntryPoint {
    Top,
    Bottom,
}

/// Defines the state from which a simulation starts
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum InitialState {
    /// Homogeneous initial conditions; starts drying
    Default,

    /// Dry checkpoint; starts saturating
    Dry,

    /// Saturated checkpoint; starts transporting
    Saturated,

    /// Homogeneous initial conditions; skips the drying period
    NoDrying,

    /// Final checkpoint of a previous run; starts drying
    Final,
}

/// Defines the reaction (sink) term of the transport equation
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum SinkTerm {
    /// No reaction
    Off,

    /// Homogeneous first-order decay with the rate `first_order_decay_factor`
    FirstOrder,

    /// Substrate consumption by biomass with Monod kinetics
    Monod,
}

/// Defines the physical regime of the simulation
///
/// The regimes are visited in order: drying → saturation → transport
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub enum Phase {
    Drying,
    Saturation,
    Transport,
}

impl HydraulicFamily {
    pub fn name(&self) -> &'static str {
        match self {
            HydraulicFamily::Haverkamp => "haverkamp_et_al_1977",
            HydraulicFamily::VanGenuchten => "van_genuchten_1980",
        }
    }
}

impl RelativePermeability {
    pub fn name(&self) -> &'static str {
        match self {
            RelativePermeability::Soleimani => "soleimani",
            RelativePermeability::Clement => "clement",
            RelativePermeability::OkuboAndMatsumoto => "okubo_and_matsumoto",
            RelativePermeability::Vandevivere => "vandevivere",
        }
    }
}

impl FlowEquation {
    pub fn name(&self) -> &'static str {
        match self {
            FlowEquation::Head => "head",
            FlowEquation::Mixed => "mixed",
        }
    }
}

impl EntryPoint {
    pub fn name(&self) -> &'static str {
        match self {
            EntryPoint::Top => "top",
            EntryPoint::Bottom => "bottom",
        }
    }
}

impl InitialState {
    pub fn name(&self) -> &'static str {
        match self {
            InitialState::Default => "default",
            InitialState::Dry => "dry",
            InitialState::Saturated => "saturated",
            InitialState::NoDrying => "no_drying",
            InitialState::Final => "final",
        }
    }

    /// Returns the regime in which a simulation starting from this state begins
    pub fn starting_phase(&self) -> Phase {
        match self {
            InitialState::Default | InitialState::Final => Phase::Drying,
            InitialState::Dry | InitialState::NoDrying => Phase::Saturation,
            InitialState::Saturated => Phase::Transport,
        }
    }

    /// Returns true if the initial fields are homogeneous (no checkpoint needed)
    pub fn is_homogeneous(&self) -> bool {
        matches!(self, InitialState::Default | InitialState::NoDrying)
    }
}

impl SinkTerm {
    pub fn name(&self) -> &'static str {
        match self {
            SinkTerm::Off => "off",
            SinkTerm::FirstOrder => "first_order",
            SinkTerm::Monod => "monod",
        }
    }
}

impl Phase {
    /// Returns the label used in file names and reports
    pub fn period(&self) -> &'static str {
        match self {
            Phase::Drying => "drying",
            Phase::Saturation => "saturating",
            Phase::Transport => "transporting",
        }
    }

    /// Returns the name of the checkpoint written when this regime is left
    pub fn checkpoint_on_exit(&self) -> Option<InitialState> {
        match self {
            Phase::Drying => Some(InitialState::Dry),
            Phase::Saturation => Some(InitialState::Saturated),
            Phase::Transport => None,
        }
    }
}

impl FromStr for HydraulicFamily {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "haverkamp_et_al_1977" => Ok(HydraulicFamily::Haverkamp),
            "van_genuchten_1980" => Ok(HydraulicFamily::VanGenuchten),
            _ => Err(SimError::UnsupportedModel(s.to_string())),
        }
    }
}

impl FromStr for RelativePermeability {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soleimani" => Ok(RelativePermeability::Soleimani),
            "clement" => Ok(RelativePermeability::Clement),
            "okubo_and_matsumoto" => Ok(RelativePermeability::OkuboAndMatsumoto),
            "vandevivere" => Ok(RelativePermeability::Vandevivere),
            _ => Err(SimError::UnsupportedPermeabilityModel(s.to_string())),
        }
    }
}

impl FromStr for FlowEquation {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => Ok(FlowEquation::Head),
            "mixed" => Ok(FlowEquation::Mixed),
            _ => Err(SimError::Configuration(format!(
                "moisture transport equation \"{}\" is not implemented",
                s
            ))),
        }
    }
}

impl FromStr for EntryPoint {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top" => Ok(EntryPoint::Top),
            "bottom" => Ok(EntryPoint::Bottom),
            _ => Err(SimError::Configuration(format!(
                "transport mass entry point \"{}\" must be \"top\" or \"bottom\"",
                s
            ))),
        }
    }
}

impl FromStr for InitialState {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(InitialState::Default),
            "dry" => Ok(InitialState::Dry),
            "saturated" => Ok(InitialState::Saturated),
            "no_drying" => Ok(InitialState::NoDrying),
            "final" => Ok(InitialState::Final),
            _ => Err(SimError::Configuration(format!("\"{}\" is not a valid initial state", s))),
        }
    }
}

impl FromStr for SinkTerm {
    type Err = SimError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(SinkTerm::Off),
            "first_order" => Ok(SinkTerm::FirstOrder),
            "monod" => Ok(SinkTerm::Monod),
            _ => Err(SimError::Configuration(format!("sink term \"{}\" is not implemented", s))),
        }
    }
}

// serde adapters: parse through FromStr so that unknown names report the proper error kind
macro_rules! impl_named {
    ($($t:ty),*) => {
        $(
            impl TryFrom<String> for $t {
                type Error = SimError;
                fn try_from(s: String) -> Result<Self, Self::Error> {
                    s.parse()
                }
            }

            impl From<$t> for String {
                fn from(v: $t) -> Self {
                    v.name().to_string()
                }
            }

            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.name())
                }
            }
        )*
    };
}

impl_named!(
    HydraulicFamily,
    RelativePermeability,
    FlowEquation,
    EntryPoint,
    InitialState,
    SinkTerm
);

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Drying => write!(f, "drying"),
            Phase::Saturation => write!(f, "saturation"),
            Phase::Transport => write!(f, "transport"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
