// HPRO REGIME CLASSIFIER
// THRESHOLD CANDIDATE + N-TICK DWELL BEFORE COMMIT.
//
// A SINGLE NOISY TICK CAN NEVER FLIP THE REGIME. A CANDIDATE THAT FALLS BACK
// TO THE CURRENT REGIME BEFORE THE DWELL IS MET RESETS THE COUNTER. A NEW,
// DIFFERENT CANDIDATE RESTARTS THE COUNT AT ONE.

use crate::tuning::{ControllerConfig, Regime, detect_candidate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HysteresisState {
    pub current_regime: Regime,
    pub candidate_regime: Option<Regime>,
    pub ticks_in_candidate: u32,
}

impl Default for HysteresisState {
    // STANDARD UNTIL PROVEN OTHERWISE
    fn default() -> Self {
        Self {
            current_regime: Regime::Standard,
            candidate_regime: None,
            ticks_in_candidate: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegimeTransition {
    pub tick_index: u64,
    pub from: Regime,
    pub to: Regime,
}

pub struct RegimeClassifier {
    low_threshold: f64,
    high_threshold: f64,
    dwell: u32,
    state: HysteresisState,
}

impl RegimeClassifier {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            dwell: config.hysteresis_dwell.max(1),
            state: HysteresisState::default(),
        }
    }

    pub fn regime(&self) -> Regime {
        self.state.current_regime
    }

    pub fn state(&self) -> HysteresisState {
        self.state
    }

    // FEED ONE SPI SAMPLE. RETURNS THE TRANSITION IF THIS TICK COMMITTED ONE.
    pub fn observe(&mut self, tick_index: u64, spi: f64) -> Option<RegimeTransition> {
        let candidate = detect_candidate(spi, self.low_threshold, self.high_threshold);
        let st = &mut self.state;

        if candidate == st.current_regime {
            st.candidate_regime = None;
            st.ticks_in_candidate = 0;
            return None;
        }

        if st.candidate_regime == Some(candidate) {
            st.ticks_in_candidate += 1;
        } else {
            st.candidate_regime = Some(candidate);
            st.ticks_in_candidate = 1;
        }

        if st.ticks_in_candidate < self.dwell {
            return None;
        }

        let from = st.current_regime;
        st.current_regime = candidate;
        st.candidate_regime = None;
        st.ticks_in_candidate = 0;
        Some(RegimeTransition { tick_index, from, to: candidate })
    }
}
