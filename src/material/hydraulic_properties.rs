use crate::base::{HydraulicFamily, Parameters, RelativePermeability, SimError};
use crate::base::{CLEMENT_EXPONENT, HAVERKAMP_A, HAVERKAMP_ALPHA, HAVERKAMP_BETA, HAVERKAMP_GAMMA};
use crate::base::{VANDEVIVERE_CRITICAL_FRACTION, VANDEVIVERE_PLUG_PERMEABILITY, VAN_GENUCHTEN_SATURATED_HEAD};

/// Implements the hydraulic properties of a soil partially filled with biomass
///
/// The retention curve and the conductivity follow either the empirical functions of
/// Haverkamp et al. (1977) or van Genuchten (1980). In the latter case, the conductivity
/// is reduced by one of the biofouling (relative permeability) models.
///
/// # Reference
///
/// * Soleimani S, Van Geel PJ, Isgor OB, Mostafa MB (2009) Modeling of biological clogging
///   in unsaturated porous media. Journal of Contaminant Hydrology, 106(1-2), 39-50
#[derive(Clone, Debug)]
pub struct HydraulicProperties {
    family: HydraulicFamily,
    theta_s: f64, // saturated moisture content
    theta_r: f64, // residual moisture content
    ks: f64,      // saturated hydraulic conductivity
    alpha: f64,   // van Genuchten α
    n: f64,       // van Genuchten n
    m: f64,       // van Genuchten m = 1 - 1/n
}

impl HydraulicProperties {
    /// Allocates a new instance
    ///
    /// # Input
    ///
    /// * `family` -- the family of retention and conductivity functions
    /// * `theta_s` -- saturated moisture content θs
    /// * `theta_r` -- residual moisture content θr (< θs)
    /// * `ks` -- saturated hydraulic conductivity
    /// * `alpha` -- van Genuchten α
    /// * `n` -- van Genuchten n (> 1)
    pub fn new(
        family: HydraulicFamily,
        theta_s: f64,
        theta_r: f64,
        ks: f64,
        alpha: f64,
        n: f64,
    ) -> Result<Self, SimError> {
        if theta_r < 0.0 || theta_s <= theta_r {
            return Err(SimError::Configuration(
                "moisture contents must satisfy 0 ≤ θr < θs".to_string(),
            ));
        }
        if family == HydraulicFamily::VanGenuchten && (n <= 1.0 || alpha <= 0.0) {
            return Err(SimError::Configuration(
                "van Genuchten parameters must satisfy α > 0 and n > 1".to_string(),
            ));
        }
        Ok(HydraulicProperties {
            family,
            theta_s,
            theta_r,
            ks,
            alpha,
            n,
            m: 1.0 - 1.0 / n,
        })
    }

    /// Allocates a new instance from the simulation parameters
    pub fn from_parameters(params: &Parameters) -> Result<Self, SimError> {
        HydraulicProperties::new(
            params.hydraulic_properties,
            params.moisture_content_saturation,
            params.moisture_content_residual,
            params.saturated_hydraulic_conductivity,
            params.van_genuchten_alpha,
            params.van_genuchten_n,
        )
    }

    /// Returns the family of functions
    pub fn family(&self) -> HydraulicFamily {
        self.family
    }

    /// Returns the van Genuchten n parameter
    pub fn n(&self) -> f64 {
        self.n
    }

    /// Returns the van Genuchten m = 1 - 1/n parameter
    pub fn m(&self) -> f64 {
        self.m
    }

    /// Calculates the specific moisture capacity C = dθ/dh
    pub fn specific_moisture_capacity(&self, pressure_head: f64) -> Result<f64, SimError> {
        let (theta_s, theta_r) = (self.theta_s, self.theta_r);
        match self.family {
            HydraulicFamily::Haverkamp => {
                let h = pressure_head;
                let abs_h = f64::abs(h);
                let den = HAVERKAMP_ALPHA + f64::powf(abs_h, HAVERKAMP_BETA);
                Ok(-HAVERKAMP_ALPHA * (theta_s - theta_r) * HAVERKAMP_BETA * h * f64::powf(abs_h, HAVERKAMP_BETA - 2.0)
                    / (den * den))
            }
            HydraulicFamily::VanGenuchten => {
                let h = if pressure_head >= 0.0 {
                    VAN_GENUCHTEN_SATURATED_HEAD
                } else {
                    pressure_head
                };
                let ah = self.alpha * f64::abs(h);
                let (m, n) = (self.m, self.n);
                Ok(-self.alpha * m * n * (theta_s - theta_r)
                    * f64::powf(ah, n - 1.0)
                    * f64::powf(1.0 + f64::powf(ah, n), -m - 1.0)
                    * f64::signum(h))
            }
        }
    }

    /// Calculates the effective total saturation Se ∈ [0, 1]
    pub fn effective_total_saturation(&self, pressure_head: f64) -> Result<f64, SimError> {
        match self.family {
            HydraulicFamily::VanGenuchten => {
                if pressure_head >= 0.0 {
                    Ok(1.0)
                } else {
                    let ah = self.alpha * f64::abs(pressure_head);
                    Ok(1.0 / f64::powf(1.0 + f64::powf(ah, self.n), self.m))
                }
            }
            HydraulicFamily::Haverkamp => Err(SimError::UnsupportedModel(self.family.name().to_string())),
        }
    }

    /// Calculates the actual total saturation (fraction of the pore space filled with water and biomass)
    pub fn actual_total_saturation(&self, pressure_head: f64) -> Result<f64, SimError> {
        let ratio = self.theta_r / self.theta_s;
        Ok(ratio + (1.0 - ratio) * self.effective_total_saturation(pressure_head)?)
    }

    /// Calculates the total moisture content θ = (θs - θr) Se + θr
    pub fn moisture_content_total(&self, pressure_head: f64) -> Result<f64, SimError> {
        Ok((self.theta_s - self.theta_r) * self.effective_total_saturation(pressure_head)? + self.theta_r)
    }

    /// Calculates the effective biomass saturation Seb ∈ [0, 1]
    pub fn effective_biomass_saturation(&self, biomass_concentration: f64, biomass_dry_density: f64) -> f64 {
        let actual = biomass_concentration / biomass_dry_density;
        let effective = actual / (1.0 - self.theta_r / self.theta_s);
        f64::min(effective, 1.0)
    }

    /// Calculates the actual biomass saturation
    pub fn actual_biomass_saturation(&self, biomass_concentration: f64, biomass_dry_density: f64) -> f64 {
        self.effective_biomass_saturation(biomass_concentration, biomass_dry_density)
            * (1.0 - self.theta_r / self.theta_s)
    }

    /// Calculates the effective free-water saturation Sef = max(Se - Seb, 0)
    pub fn effective_free_saturation(
        &self,
        pressure_head: f64,
        biomass_concentration: f64,
        biomass_dry_density: f64,
    ) -> Result<f64, SimError> {
        let se = self.effective_total_saturation(pressure_head)?;
        let seb = self.effective_biomass_saturation(biomass_concentration, biomass_dry_density);
        Ok(f64::max(se - seb, 0.0))
    }

    /// Calculates the free moisture content θf = (θs - θr) Sef + θr
    pub fn moisture_content_free(
        &self,
        pressure_head: f64,
        biomass_concentration: f64,
        biomass_dry_density: f64,
    ) -> Result<f64, SimError> {
        let sef = self.effective_free_saturation(pressure_head, biomass_concentration, biomass_dry_density)?;
        Ok((self.theta_s - self.theta_r) * sef + self.theta_r)
    }

    /// Calculates the hydraulic conductivity
    ///
    /// # Input
    ///
    /// * `pressure_head` -- the pressure head h
    /// * `biomass_concentration` -- the biomass concentration B
    /// * `biomass_dry_density` -- the biomass dry density ρ
    /// * `model` -- the relative permeability model (ignored by the Haverkamp family)
    pub fn hydraulic_conductivity(
        &self,
        pressure_head: f64,
        biomass_concentration: f64,
        biomass_dry_density: f64,
        model: RelativePermeability,
    ) -> Result<f64, SimError> {
        match self.family {
            HydraulicFamily::Haverkamp => {
                let a = HAVERKAMP_A;
                Ok(self.ks * a / (a + f64::powf(f64::abs(pressure_head), HAVERKAMP_GAMMA)))
            }
            HydraulicFamily::VanGenuchten => {
                let seb = self.effective_biomass_saturation(biomass_concentration, biomass_dry_density);
                // biomass cannot exceed the pore space it occupies
                let se = f64::max(self.effective_total_saturation(pressure_head)?, seb);
                let fraction = biomass_concentration / biomass_dry_density;
                let kr = match model {
                    RelativePermeability::Soleimani => {
                        let m = self.m;
                        let a = f64::powf(1.0 - f64::powf(seb, 1.0 / m), m);
                        let b = f64::powf(1.0 - f64::powf(se, 1.0 / m), m);
                        f64::sqrt(se) * (a - b) * (a - b)
                    }
                    RelativePermeability::Clement => {
                        if fraction < 1.0 {
                            f64::powf(1.0 - fraction, CLEMENT_EXPONENT)
                        } else {
                            0.0
                        }
                    }
                    RelativePermeability::OkuboAndMatsumoto => {
                        if fraction < 1.0 {
                            (1.0 - fraction) * (1.0 - fraction)
                        } else {
                            0.0
                        }
                    }
                    RelativePermeability::Vandevivere => {
                        if fraction < 1.0 {
                            let plug = VANDEVIVERE_PLUG_PERMEABILITY;
                            let x = fraction / VANDEVIVERE_CRITICAL_FRACTION;
                            let phi = f64::exp(-0.5 * x * x);
                            phi * (1.0 - fraction) * (1.0 - fraction)
                                + (1.0 - phi) * plug / (plug + fraction * (1.0 - plug))
                        } else {
                            0.0
                        }
                    }
                };
                Ok(self.ks * kr)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::HydraulicProperties;
    use crate::base::{HydraulicFamily, RelativePermeability, SimError};
    use approx::assert_relative_eq;

    fn sand() -> HydraulicProperties {
        HydraulicProperties::new(HydraulicFamily::VanGenuchten, 0.368, 0.102, 9.22e-3, 0.0335, 2.0).unwrap()
    }

    #[test]
    fn new_captures_errors() {
        assert!(HydraulicProperties::new(HydraulicFamily::VanGenuchten, 0.1, 0.2, 1.0, 0.03, 2.0).is_err());
        assert!(HydraulicProperties::new(HydraulicFamily::VanGenuchten, 0.4, 0.1, 1.0, 0.03, 1.0).is_err());
        assert!(HydraulicProperties::new(HydraulicFamily::Haverkamp, 0.4, 0.1, 1.0, 0.0, 0.0).is_ok());
    }

    #[test]
    fn m_is_derived_from_n() {
        for n in [1.05, 1.5, 2.0, 2.68, 7.0] {
            let hp = HydraulicProperties::new(HydraulicFamily::VanGenuchten, 0.4, 0.05, 1.0, 0.1, n).unwrap();
            assert_eq!(hp.n(), n);
            assert_eq!(hp.m(), 1.0 - 1.0 / n);
        }
    }

    #[test]
    fn effective_saturation_is_one_for_nonnegative_heads() {
        let hp = sand();
        for h in [0.0, 1e-12, 0.5, 10.0, 1e6] {
            assert_eq!(hp.effective_total_saturation(h).unwrap(), 1.0);
        }
        let se = hp.effective_total_saturation(-50.0).unwrap();
        assert!(se > 0.0 && se < 1.0);
        // closed form with n = 2, m = 1/2
        let ah = 0.0335 * 50.0;
        assert_relative_eq!(se, 1.0 / f64::sqrt(1.0 + ah * ah), epsilon = 1e-15);
    }

    #[test]
    fn actual_and_effective_coincide_without_residual_moisture() {
        let hp = HydraulicProperties::new(HydraulicFamily::VanGenuchten, 0.4, 0.0, 1.0, 0.02, 1.8).unwrap();
        for h in [-500.0, -100.0, -10.0, -1.0, 0.0, 3.0] {
            assert_eq!(
                hp.actual_total_saturation(h).unwrap(),
                hp.effective_total_saturation(h).unwrap()
            );
        }
    }

    #[test]
    fn biomass_saturation_is_clamped() {
        let hp = sand();
        let rho = 100.0;
        for b in [100.0, 150.0, 1e4] {
            assert_eq!(hp.effective_biomass_saturation(b, rho), 1.0);
            for h in [-100.0, -1.0, 0.0, 5.0] {
                assert_eq!(hp.effective_free_saturation(h, b, rho).unwrap(), 0.0);
                assert_eq!(hp.moisture_content_free(h, b, rho).unwrap(), 0.102);
            }
        }
        let seb = hp.effective_biomass_saturation(10.0, rho);
        assert_relative_eq!(seb, 0.1 / (1.0 - 0.102 / 0.368), epsilon = 1e-15);
        assert_relative_eq!(hp.actual_biomass_saturation(10.0, rho), 0.1, epsilon = 1e-15);
    }

    #[test]
    fn moisture_content_works() {
        let hp = sand();
        assert_relative_eq!(hp.moisture_content_total(0.0).unwrap(), 0.368, epsilon = 1e-15);
        assert_relative_eq!(hp.moisture_content_total(-1e9).unwrap(), 0.102, epsilon = 1e-6);
        assert_relative_eq!(hp.moisture_content_free(2.0, 0.0, 100.0).unwrap(), 0.368, epsilon = 1e-15);
    }

    #[test]
    fn capacity_matches_numerical_derivative() {
        let hp = sand();
        let h = -37.0;
        let delta = 1e-5;
        let num = (hp.moisture_content_total(h + delta).unwrap() - hp.moisture_content_total(h - delta).unwrap())
            / (2.0 * delta);
        assert_relative_eq!(hp.specific_moisture_capacity(h).unwrap(), num, max_relative = 1e-7);
        // saturated heads are clamped
        assert_eq!(
            hp.specific_moisture_capacity(0.0).unwrap(),
            hp.specific_moisture_capacity(5.0).unwrap()
        );
        assert_eq!(
            hp.specific_moisture_capacity(0.0).unwrap(),
            hp.specific_moisture_capacity(-0.01).unwrap()
        );
    }

    #[test]
    fn haverkamp_works() {
        let ks = 9.44e-3;
        let hp = HydraulicProperties::new(HydraulicFamily::Haverkamp, 0.287, 0.075, ks, 0.0, 0.0).unwrap();
        let k = hp
            .hydraulic_conductivity(-100.0, 0.0, 1.0, RelativePermeability::Soleimani)
            .unwrap();
        let a = 1.175e6;
        assert_relative_eq!(k, ks * a / (a + f64::powf(100.0, 4.74)), epsilon = 1e-17);
        let c = hp.specific_moisture_capacity(-40.0).unwrap();
        let den = 1.611e6 + f64::powf(40.0, 3.96);
        assert_relative_eq!(c, 1.611e6 * 0.212 * 3.96 * f64::powf(40.0, 2.96) / (den * den), max_relative = 1e-13);
        assert_eq!(
            hp.effective_total_saturation(-1.0).err(),
            Some(SimError::UnsupportedModel("haverkamp_et_al_1977".to_string()))
        );
        assert!(hp.moisture_content_total(-1.0).is_err());
    }

    #[test]
    fn relative_permeability_models_work() {
        let hp = sand();
        let rho = 100.0;

        // clean and saturated soil conducts at Ks for every model
        for model in [
            RelativePermeability::Soleimani,
            RelativePermeability::Clement,
            RelativePermeability::OkuboAndMatsumoto,
            RelativePermeability::Vandevivere,
        ] {
            assert_relative_eq!(hp.hydraulic_conductivity(0.0, 0.0, rho, model).unwrap(), 9.22e-3, epsilon = 1e-15);
            assert_eq!(hp.hydraulic_conductivity(0.0, rho, rho, model).unwrap(), 0.0);
        }

        // porosity-reduction laws
        let b = 20.0; // fraction = 0.2
        let k = hp
            .hydraulic_conductivity(0.0, b, rho, RelativePermeability::OkuboAndMatsumoto)
            .unwrap();
        assert_relative_eq!(k, 9.22e-3 * 0.64, epsilon = 1e-15);
        let k = hp.hydraulic_conductivity(0.0, b, rho, RelativePermeability::Clement).unwrap();
        assert_relative_eq!(k, 9.22e-3 * 0.512, epsilon = 1e-15);

        // Vandevivere blend
        let phi = f64::exp(-0.5 * 4.0);
        let plug = 0.00025;
        let kr = phi * 0.64 + (1.0 - phi) * plug / (plug + 0.2 * (1.0 - plug));
        let k = hp.hydraulic_conductivity(-3.0, b, rho, RelativePermeability::Vandevivere).unwrap();
        assert_relative_eq!(k, 9.22e-3 * kr, epsilon = 1e-15);

        // Mualem form without biomass; biomass reduces the conductivity
        let se = hp.effective_total_saturation(-30.0).unwrap();
        let m = hp.m();
        let mualem = f64::sqrt(se) * f64::powf(1.0 - f64::powf(1.0 - f64::powf(se, 1.0 / m), m), 2.0);
        let k0 = hp.hydraulic_conductivity(-30.0, 0.0, rho, RelativePermeability::Soleimani).unwrap();
        assert_relative_eq!(k0, 9.22e-3 * mualem, epsilon = 1e-15);
        let k1 = hp.hydraulic_conductivity(-30.0, 5.0, rho, RelativePermeability::Soleimani).unwrap();
        assert!(k1 < k0);
    }

    #[test]
    fn biomass_raises_total_saturation() {
        // with Seb > Se, the total saturation is raised to Seb before applying the formula
        let hp = sand();
        let rho = 100.0;
        let b = 60.0;
        let seb = hp.effective_biomass_saturation(b, rho);
        let se = hp.effective_total_saturation(-200.0).unwrap();
        assert!(seb > se);
        let k = hp.hydraulic_conductivity(-200.0, b, rho, RelativePermeability::Soleimani).unwrap();
        assert_eq!(k, 0.0);
    }
}
