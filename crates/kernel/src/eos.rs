//! Gas equations of state.
//!
//! All quantities are in code units. The energy-equation EOS is the default
//! for adiabatic runs; isothermal and barotropic variants derive pressure
//! from density alone and keep the internal energy frozen.

/// Closed set of gas equations of state.
#[derive(Debug, Clone, Copy)]
pub enum Eos {
    /// Ideal gamma-law gas evolving the specific internal energy:
    ///
    /// ```text
    /// P = (gamma - 1) rho u,     c = sqrt(gamma P / rho)
    /// ```
    EnergyEqn {
        /// Ratio of specific heats.
        gamma: f64,
    },
    /// Isothermal gas with fixed sound speed:
    ///
    /// ```text
    /// P = c0^2 rho
    /// ```
    Isothermal {
        /// Constant sound speed.
        sound0: f64,
    },
    /// Barotropic gas stiffening above a critical density:
    ///
    /// ```text
    /// P = c0^2 rho (1 + (rho / rho_bary)^(gamma - 1))
    /// ```
    Barotropic {
        /// Sound speed in the isothermal regime.
        sound0: f64,
        /// Adiabatic exponent of the stiff regime.
        gamma: f64,
        /// Density at which the gas turns adiabatic.
        rho_bary: f64,
    },
}

impl Eos {
    /// Pressure from density and specific internal energy.
    pub fn pressure(&self, rho: f64, u: f64) -> f64 {
        match *self {
            Eos::EnergyEqn { gamma } => (gamma - 1.0) * rho * u,
            Eos::Isothermal { sound0 } => sound0 * sound0 * rho,
            Eos::Barotropic { sound0, gamma, rho_bary } => {
                sound0 * sound0 * rho * (1.0 + (rho / rho_bary).powf(gamma - 1.0))
            }
        }
    }

    /// Adiabatic sound speed.
    pub fn sound_speed(&self, rho: f64, u: f64) -> f64 {
        match *self {
            Eos::EnergyEqn { gamma } => (gamma * (gamma - 1.0) * u).sqrt(),
            Eos::Isothermal { sound0 } => sound0,
            Eos::Barotropic { .. } => {
                if rho > 0.0 {
                    (self.pressure(rho, u) / rho).sqrt()
                } else {
                    0.0
                }
            }
        }
    }

    /// Does this EOS integrate du/dt?
    pub fn evolves_energy(&self) -> bool {
        matches!(self, Eos::EnergyEqn { .. })
    }

    /// Adiabatic exponent seen by the Riemann solver.
    pub fn gamma(&self) -> f64 {
        match *self {
            Eos::EnergyEqn { gamma } => gamma,
            // Isothermal flows behave like gamma -> 1; keep the solver away
            // from the degenerate limit.
            Eos::Isothermal { .. } => 1.0001,
            Eos::Barotropic { gamma, .. } => gamma,
        }
    }

    /// Internal energy matching a target pressure (IC helper).
    pub fn u_from_press(&self, rho: f64, press: f64) -> f64 {
        match *self {
            Eos::EnergyEqn { gamma } => press / ((gamma - 1.0) * rho),
            // u is inert for the density-only equations of state; return a
            // consistent nominal value.
            Eos::Isothermal { .. } | Eos::Barotropic { .. } => {
                if rho > 0.0 {
                    press / rho
                } else {
                    0.0
                }
            }
        }
    }
}
