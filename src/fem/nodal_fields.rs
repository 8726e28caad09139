use crate::base::{HydraulicFamily, Phase, RelativePermeability, SimError};
use crate::material::{BiomassKinetics, HydraulicProperties};
use nalgebra::DVector;

/// Holds one time level of all nodal fields
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSet {
    /// Pressure head h
    pub pressure: DVector<f64>,

    /// Substrate concentration c
    pub substrate: DVector<f64>,

    /// Biomass concentration B
    pub biomass: DVector<f64>,

    /// Biomass volume fraction B/ρ
    pub biomass_fraction: DVector<f64>,

    /// Total moisture content θ
    pub moisture_total: DVector<f64>,

    /// Free moisture content θf
    pub moisture_free: DVector<f64>,

    /// Hydraulic conductivity K
    pub conductivity: DVector<f64>,

    /// Specific moisture capacity C
    pub capacity: DVector<f64>,
}

/// Number of vectors in a FieldSet
pub const N_FIELDS: usize = 8;

impl FieldSet {
    /// Allocates zeroed fields
    pub fn new(n_nodes: usize) -> Self {
        FieldSet {
            pressure: DVector::zeros(n_nodes),
            substrate: DVector::zeros(n_nodes),
            biomass: DVector::zeros(n_nodes),
            biomass_fraction: DVector::zeros(n_nodes),
            moisture_total: DVector::zeros(n_nodes),
            moisture_free: DVector::zeros(n_nodes),
            conductivity: DVector::zeros(n_nodes),
            capacity: DVector::zeros(n_nodes),
        }
    }

    /// Returns the number of nodes
    pub fn n_nodes(&self) -> usize {
        self.pressure.len()
    }

    /// Returns all vectors in a fixed order
    pub fn vectors(&self) -> [&DVector<f64>; N_FIELDS] {
        [
            &self.pressure,
            &self.substrate,
            &self.biomass,
            &self.biomass_fraction,
            &self.moisture_total,
            &self.moisture_free,
            &self.conductivity,
            &self.capacity,
        ]
    }

    /// Returns all vectors (mutable) in the same order as `vectors`
    pub fn vectors_mut(&mut self) -> [&mut DVector<f64>; N_FIELDS] {
        [
            &mut self.pressure,
            &mut self.substrate,
            &mut self.biomass,
            &mut self.biomass_fraction,
            &mut self.moisture_total,
            &mut self.moisture_free,
            &mut self.conductivity,
            &mut self.capacity,
        ]
    }
}

/// Holds the nodal field state as two slots: the start of the time step (old) and the current iterate (new)
///
/// The old slot stays frozen during the Picard loop; `commit` copies new into old.
#[derive(Clone, Debug, PartialEq)]
pub struct NodalFields {
    pub old: FieldSet,
    pub new: FieldSet,
}

impl NodalFields {
    /// Allocates zeroed fields
    pub fn new(n_nodes: usize) -> Self {
        NodalFields {
            old: FieldSet::new(n_nodes),
            new: FieldSet::new(n_nodes),
        }
    }

    /// Returns the number of nodes
    pub fn n_nodes(&self) -> usize {
        self.new.n_nodes()
    }

    /// Commits the time step (old ← new)
    pub fn commit(&mut self) {
        self.old.clone_from(&self.new);
    }

    /// Recomputes the constitutive fields and advances the biomass
    ///
    /// Biomass uses the old pressure, substrate and biomass (it is not updated while drying);
    /// all other fields use the current pressure iterate and the new biomass.
    pub fn update_constitutive(
        &mut self,
        hydraulics: &HydraulicProperties,
        kinetics: &BiomassKinetics,
        model: RelativePermeability,
        phase: Phase,
        dt: f64,
    ) -> Result<(), SimError> {
        let rho = kinetics.dry_density;
        let with_saturation = hydraulics.family() == HydraulicFamily::VanGenuchten;
        for i in 0..self.n_nodes() {
            let b = match phase {
                Phase::Drying => self.old.biomass[i],
                Phase::Saturation | Phase::Transport => {
                    let b_old = self.old.biomass[i];
                    let sef = hydraulics.effective_free_saturation(self.old.pressure[i], b_old, rho)?;
                    kinetics.advance(b_old, sef, self.old.substrate[i], dt)
                }
            };
            let h = self.new.pressure[i];
            self.new.biomass[i] = b;
            self.new.biomass_fraction[i] = kinetics.volume_fraction(b);
            self.new.conductivity[i] = hydraulics.hydraulic_conductivity(h, b, rho, model)?;
            self.new.capacity[i] = hydraulics.specific_moisture_capacity(h)?;
            if with_saturation {
                self.new.moisture_total[i] = hydraulics.moisture_content_total(h)?;
                self.new.moisture_free[i] = hydraulics.moisture_content_free(h, b, rho)?;
            }
        }
        Ok(())
    }

    /// Returns the harmonic mean of the nodal hydraulic conductivity
    pub fn effective_conductivity(&self) -> f64 {
        let n = self.n_nodes() as f64;
        let sum: f64 = self.new.conductivity.iter().map(|k| 1.0 / (k * n)).sum();
        1.0 / sum
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{FieldSet, NodalFields};
    use crate::base::{Parameters, Phase, RelativePermeability};
    use crate::material::{BiomassKinetics, HydraulicProperties};
    use approx::assert_relative_eq;

    #[test]
    fn commit_copies_new_into_old() {
        let mut fields = NodalFields::new(3);
        fields.new.pressure.fill(-5.0);
        fields.new.substrate[1] = 0.05;
        fields.commit();
        assert_eq!(fields.old, fields.new);
        fields.new.pressure[0] = 1.0;
        assert_eq!(fields.old.pressure[0], -5.0);
    }

    #[test]
    fn vectors_are_consistent() {
        let mut set = FieldSet::new(2);
        set.vectors_mut()[2][1] = 7.0;
        assert_eq!(set.biomass[1], 7.0);
        assert_eq!(set.vectors()[2][1], 7.0);
    }

    #[test]
    fn update_constitutive_works() {
        let params = Parameters::sample();
        let hp = HydraulicProperties::from_parameters(&params).unwrap();
        let kin = BiomassKinetics::from_parameters(&params);
        let model = RelativePermeability::Soleimani;
        let mut fields = NodalFields::new(2);
        fields.old.pressure.fill(-20.0);
        fields.new.pressure.fill(-10.0);
        fields.old.biomass.fill(10.0);
        fields.old.substrate.fill(0.05);

        // drying: biomass frozen
        fields.update_constitutive(&hp, &kin, model, Phase::Drying, 1.0).unwrap();
        assert_eq!(fields.new.biomass[0], 10.0);
        assert_relative_eq!(
            fields.new.moisture_total[0],
            hp.moisture_content_total(-10.0).unwrap(),
            epsilon = 1e-15
        );
        assert_relative_eq!(
            fields.new.conductivity[1],
            hp.hydraulic_conductivity(-10.0, 10.0, params.biomass_dry_density, model).unwrap(),
            epsilon = 1e-15
        );

        // transport: biomass advanced with the old values
        fields.update_constitutive(&hp, &kin, model, Phase::Transport, 2.0).unwrap();
        let sef = hp.effective_free_saturation(-20.0, 10.0, params.biomass_dry_density).unwrap();
        assert_relative_eq!(fields.new.biomass[0], kin.advance(10.0, sef, 0.05, 2.0), epsilon = 1e-12);
        assert_relative_eq!(
            fields.new.biomass_fraction[0],
            fields.new.biomass[0] / params.biomass_dry_density,
            epsilon = 1e-15
        );

        // zero time step keeps the biomass
        fields.update_constitutive(&hp, &kin, model, Phase::Saturation, 0.0).unwrap();
        assert_relative_eq!(fields.new.biomass[1], 10.0, epsilon = 1e-15);
    }

    #[test]
    fn effective_conductivity_is_the_harmonic_mean() {
        let mut fields = NodalFields::new(2);
        fields.new.conductivity[0] = 1.0;
        fields.new.conductivity[1] = 3.0;
        assert_relative_eq!(fields.effective_conductivity(), 1.5, epsilon = 1e-15);
    }
}
