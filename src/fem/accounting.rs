/// Holds the running totals of the nutrient balance
///
/// The totals are updated once per committed time step and never rolled back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Accounting {
    /// Cumulative outward nutrient mass through the top boundary (mg)
    pub cumulative_flow_at_top: f64,

    /// Cumulative outward nutrient mass through the bottom boundary (mg)
    pub cumulative_flow_at_bottom: f64,

    /// Nutrient mass in the domain at the last committed step (mg)
    pub nutrients_in_domain: f64,

    /// Nutrient mass in the domain at the step before (mg)
    pub nutrients_in_domain_previous: f64,

    /// Outward nutrient mass through both boundaries during the last committed step (mg)
    pub outflow_last_step: f64,
}

impl Accounting {
    /// Allocates a new instance
    pub fn new() -> Self {
        Accounting::default()
    }

    /// Accumulates the boundary flows (mg/s) of a committed step of size dt
    pub fn commit(
        &mut self,
        nutrient_flow_at_top: f64,
        nutrient_flow_at_bottom: f64,
        nutrients_in_domain: f64,
        dt: f64,
    ) {
        self.cumulative_flow_at_top += nutrient_flow_at_top * dt;
        self.cumulative_flow_at_bottom += nutrient_flow_at_bottom * dt;
        self.outflow_last_step = (nutrient_flow_at_top + nutrient_flow_at_bottom) * dt;
        self.nutrients_in_domain_previous = self.nutrients_in_domain;
        self.nutrients_in_domain = nutrients_in_domain;
    }

    /// Returns the change of the nutrient mass in the domain during the last step
    pub fn storage_change(&self) -> f64 {
        self.nutrients_in_domain - self.nutrients_in_domain_previous
    }

    /// Returns the mass balance error of the last step
    ///
    /// For a conservative scheme the storage change equals the net inflow.
    pub fn balance_error(&self) -> f64 {
        self.storage_change() + self.outflow_last_step
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::Accounting;
    use approx::assert_relative_eq;

    #[test]
    fn commit_accumulates() {
        let mut acc = Accounting::new();
        acc.commit(-2.0, 0.5, 3.0, 2.0);
        acc.commit(-1.0, 0.5, 4.5, 1.0);
        assert_eq!(acc.cumulative_flow_at_top, -5.0);
        assert_eq!(acc.cumulative_flow_at_bottom, 1.5);
        assert_eq!(acc.nutrients_in_domain, 4.5);
        assert_eq!(acc.storage_change(), 1.5);
        // 1.5 stored while 0.5 net entered
        assert_relative_eq!(acc.balance_error(), 1.0, epsilon = 1e-15);

        // balanced step: 2 mg enter through the top during 4 s and stay
        acc.commit(-0.5, 0.0, 6.5, 4.0);
        assert_relative_eq!(acc.balance_error(), 0.0, epsilon = 1e-15);
    }
}
