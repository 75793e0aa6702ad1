use tracing::trace;

use crate::config::DualPi2Config;

/// The coupled PI² controller (RFC 9332 `dualpi2_update`).
///
/// Once per `Tupdate` the base probability `pp` is nudged by the integral
/// gain on the distance to the sojourn target and the proportional gain on
/// the change since the previous tick. The Classic side acts on `pp²`, the
/// L4S side on the coupled component `pp · k`.
#[derive(Debug)]
pub struct PiController {
    target_ms: f64,
    alpha: f64,
    beta: f64,
    coupling: f64,
    p_cmax: f64,
    p_lmax: f64,
    l4s_drop_on_overload: bool,
    relaxed_pp_clamp: bool,

    pp: f64,
    p_c: f64,
    p_cl: f64,
    // Sojourn times observed on the previous tick
    l4s_qdelay_ms: u64,
    classic_qdelay_ms: u64,
}

impl PiController {
    pub fn new(config: &DualPi2Config) -> Self {
        Self {
            target_ms: config.target.as_secs_f64() * 1e3,
            alpha: config.alpha,
            beta: config.beta,
            coupling: config.coupling,
            p_cmax: config.p_cmax(),
            p_lmax: 1.0,
            l4s_drop_on_overload: config.l4s_drop_on_overload,
            relaxed_pp_clamp: config.relaxed_pp_clamp,
            pp: 0.0,
            p_c: 0.0,
            p_cl: 0.0,
            l4s_qdelay_ms: 0,
            classic_qdelay_ms: 0,
        }
    }

    /// Update gains and caps without losing the integrator state.
    pub fn reconfigure(&mut self, config: &DualPi2Config) {
        self.target_ms = config.target.as_secs_f64() * 1e3;
        self.alpha = config.alpha;
        self.beta = config.beta;
        self.coupling = config.coupling;
        self.p_cmax = config.p_cmax();
        self.l4s_drop_on_overload = config.l4s_drop_on_overload;
        self.relaxed_pp_clamp = config.relaxed_pp_clamp;
        self.derive();
    }

    /// One controller tick with the sub-queue sojourn times just measured.
    pub fn update(&mut self, l4s_qdelay_ms: u64, classic_qdelay_ms: u64) {
        let qdelay_old = self.l4s_qdelay_ms.max(self.classic_qdelay_ms) as f64;

        self.l4s_qdelay_ms = l4s_qdelay_ms;
        self.classic_qdelay_ms = classic_qdelay_ms;
        let qdelay = l4s_qdelay_ms.max(classic_qdelay_ms) as f64;

        let pp = self.pp
            + self.alpha * (qdelay - self.target_ms)
            + self.beta * (qdelay - qdelay_old);
        self.pp = pp.clamp(0.0, self.pp_cap());
        self.derive();
        trace!(
            pp = self.pp,
            p_c = self.p_c,
            p_cl = self.p_cl,
            qdelay,
            qdelay_old,
            "Updated coupled probabilities"
        );
    }

    // RFC 9332 caps the base probability at p_Cmax while drop-on-overload
    // is in force; the relaxed clamp keeps the full [0, 1] excursion.
    fn pp_cap(&self) -> f64 {
        if self.l4s_drop_on_overload && !self.relaxed_pp_clamp {
            self.p_cmax
        } else {
            1.0
        }
    }

    fn derive(&mut self) {
        self.p_c = self.pp * self.pp;
        self.p_cl = self.pp * self.coupling;
    }

    pub fn base_prob(&self) -> f64 {
        self.pp
    }

    /// Classic drop/mark probability `pp²`.
    pub fn classic_prob(&self) -> f64 {
        self.p_c
    }

    /// Coupled L4S component `pp · k`.
    pub fn coupled_prob(&self) -> f64 {
        self.p_cl
    }

    /// L4S marking probability: the stronger of the native ramp and the
    /// coupled component, never above `p_Lmax`.
    pub fn l4s_prob(&self, native_prob: f64) -> f64 {
        native_prob.max(self.p_cl).min(self.p_lmax)
    }

    pub fn classic_is_overloaded(&self) -> bool {
        self.pp >= self.p_cmax
    }

    pub fn l4s_is_overloaded(&self) -> bool {
        self.classic_is_overloaded() && self.l4s_drop_on_overload
    }

    #[cfg(test)]
    pub(crate) fn force_base_prob(&mut self, pp: f64) {
        self.pp = pp;
        self.derive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DualPi2Config;

    const EPSILON: f64 = 1e-12;

    #[test_log::test]
    fn step_response_matches_the_gains() {
        let mut controller = PiController::new(&DualPi2Config::default());
        // A sustained 30 ms sojourn against the 15 ms target, first tick:
        // pp = 0.00016 * 15 + 0.0032 * 30
        controller.update(30, 0);
        assert!((controller.base_prob() - 0.0984).abs() < EPSILON);
        assert!((controller.classic_prob() - 0.0984 * 0.0984).abs() < EPSILON);
        assert!((controller.coupled_prob() - 0.1968).abs() < EPSILON);
        assert!(!controller.classic_is_overloaded());
    }

    #[test_log::test]
    fn proportional_term_uses_previous_tick() {
        let mut controller = PiController::new(&DualPi2Config::default());
        controller.update(30, 0);
        let pp_first = controller.base_prob();
        // Steady sojourn: only the integral term moves pp on this tick.
        controller.update(30, 0);
        let expected = pp_first + 0.00016 * (30.0 - 15.0);
        assert!((controller.base_prob() - expected).abs() < EPSILON);
    }

    #[test_log::test]
    fn qdelay_is_the_max_of_both_queues() {
        let mut controller = PiController::new(&DualPi2Config::default());
        controller.update(5, 40);
        let expected = 0.00016 * (40.0 - 15.0) + 0.0032 * 40.0;
        assert!((controller.base_prob() - expected).abs() < EPSILON);
    }

    #[test_log::test]
    fn pp_clamps_at_p_cmax_by_default() {
        let mut controller = PiController::new(&DualPi2Config::default());
        for _ in 0..100 {
            controller.update(500, 500);
        }
        assert_eq!(controller.base_prob(), 0.25);
        assert!(controller.classic_is_overloaded());
        assert!(controller.l4s_is_overloaded());
    }

    #[test_log::test]
    fn relaxed_clamp_allows_the_full_excursion() {
        let config = DualPi2Config {
            relaxed_pp_clamp: true,
            ..Default::default()
        };
        let mut controller = PiController::new(&config);
        for _ in 0..2000 {
            controller.update(500, 500);
        }
        assert_eq!(controller.base_prob(), 1.0);
        assert!(controller.classic_is_overloaded());
    }

    #[test_log::test]
    fn pp_never_goes_negative() {
        let mut controller = PiController::new(&DualPi2Config::default());
        controller.update(0, 0);
        assert_eq!(controller.base_prob(), 0.0);
        assert_eq!(controller.classic_prob(), 0.0);
        assert_eq!(controller.coupled_prob(), 0.0);
    }

    #[test_log::test]
    fn overload_tracks_drop_on_overload_flag() {
        let config = DualPi2Config {
            l4s_drop_on_overload: false,
            ..Default::default()
        };
        let mut controller = PiController::new(&config);
        controller.force_base_prob(0.5);
        assert!(controller.classic_is_overloaded());
        assert!(!controller.l4s_is_overloaded());
    }

    #[test_log::test]
    fn l4s_prob_couples_and_caps() {
        let mut controller = PiController::new(&DualPi2Config::default());
        controller.force_base_prob(0.2);
        assert!((controller.l4s_prob(0.1) - 0.4).abs() < EPSILON);
        assert!((controller.l4s_prob(0.7) - 0.7).abs() < EPSILON);
        assert_eq!(controller.l4s_prob(3.0), 1.0);
    }
}
