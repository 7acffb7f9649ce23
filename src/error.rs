// HPRO CONTROLLER ERRORS
// ONLY ConfigInvalid IS FATAL. EVERYTHING ELSE IS A PER-TICK ANOMALY THAT
// THE CONTROL LOOP DEGRADES AROUND WITHOUT MISSING ITS CADENCE.

// FAILURE MODES ACROSS THE SAMPLER, MONITOR, CONFIG AND ACTUATION SEAMS
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    // RAW PRESSURE SCALAR OUTSIDE [0, 1] OR NOT FINITE
    #[error("raw pressure from {source_tag} out of range: {value} (expected [0, 1])")]
    InputOutOfRange { source_tag: String, value: f64 },

    // NO USABLE PRESSURE INPUT BEFORE THE TICK DEADLINE
    #[error("no weighted pressure input this tick")]
    NoPressureInput,

    // TOO FEW FOREGROUND OPS THIS TICK FOR A STABLE P99
    #[error("insufficient latency samples: {observed} observed, {required} required")]
    InsufficientLatencySamples { observed: usize, required: usize },

    // CONSTRUCTION-TIME CONFIG REJECTED. THE CONTROLLER REFUSES TO START.
    #[error("invalid controller config: {0}")]
    ConfigInvalid(String),

    // THE TRANSFER ENGINE REFUSED A RATE UPDATE
    #[error("transfer engine rejected rate update: {0}")]
    Engine(String),
}

impl ControllerError {
    // ONLY CONFIG ERRORS MAY STOP A CONTROLLER FROM RUNNING
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_))
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(ControllerError::ConfigInvalid("dwell".into()).is_fatal());
        assert!(!ControllerError::NoPressureInput.is_fatal());
        assert!(!ControllerError::Engine("offline".into()).is_fatal());
        assert!(!ControllerError::InsufficientLatencySamples { observed: 1, required: 8 }.is_fatal());
    }

    #[test]
    fn messages_carry_the_offending_values() {
        let e = ControllerError::InputOutOfRange { source_tag: "dirty_rate".into(), value: 1.5 };
        let msg = e.to_string();
        assert!(msg.contains("dirty_rate"));
        assert!(msg.contains("1.5"));
        assert_eq!(
            ControllerError::InsufficientLatencySamples { observed: 3, required: 8 }.to_string(),
            "insufficient latency samples: 3 observed, 8 required",
        );
    }
}
