use bioclog::base::{Config, Phase};
use bioclog::fem::{ControlTime, Indicators, PhaseMachine};

#[test]
fn test_phase_trace() {
    // allow the step to grow while drying
    let mut config = Config::new();
    config.set_dt_bounds(1.0, 8.0, 1.0, 60.0);
    let mut control = ControlTime::new(&config, 1.0);
    let mut machine = PhaseMachine::new(&config, Phase::Drying, true, -20.0);

    // synthetic top pressure approaching the equilibrium: |1 - p/p_eq| = 0.5^(k+1)
    // crosses the drying tolerance (3.1e-4) at k = 11
    let mut transition_step = None;
    let mut dt_before = 0.0;
    for k in 1..20 {
        let top_pressure = -20.0 + 10.0 * f64::powi(0.5, k);
        control.advance();
        let ind = Indicators {
            top_pressure,
            ..Default::default()
        };
        let transition = machine.update(control.t, &ind);
        if let Some(tr) = transition {
            assert_eq!(tr.from, Phase::Drying);
            assert_eq!(tr.to, Phase::Saturation);
            assert_eq!(tr.time, control.t);
            transition_step = Some(k);
            dt_before = control.dt;
        }
        control.adapt(machine.phase(), 3, transition.is_some());
        if transition.is_some() {
            break;
        }
    }
    assert_eq!(transition_step, Some(11));
    assert_eq!(dt_before, 8.0);
    assert_eq!(control.dt, 1.0);
    assert_eq!(machine.phase(), Phase::Saturation);
    assert_eq!(machine.milestone_time, control.t);
    assert_eq!(machine.time_for_dry, control.t);
    assert_eq!(machine.figure_count, 0);

    // the saturation regime keeps Δt at its ceiling
    control.adapt(machine.phase(), 3, false);
    assert_eq!(control.dt, 1.0);
}
