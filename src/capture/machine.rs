use crate::platform::{AeState, AfState, FrameMetadata};
use std::fmt;
use tracing::{debug, trace};

/// Position in the still-capture sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// Preview is running; AF changes are reported to the focus listener
    Previewing,
    /// Focus lock requested, waiting for AF to settle
    WaitingFocusLock,
    /// Pre-capture metering requested, waiting for AE to start it
    WaitingPrecapture,
    /// Waiting for AE to leave the pre-capture state
    WaitingNonPrecapture,
    /// Still capture issued; terminal until preview is re-armed
    Taken,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Previewing => "previewing",
            CaptureState::WaitingFocusLock => "waiting_focus_lock",
            CaptureState::WaitingPrecapture => "waiting_precapture",
            CaptureState::WaitingNonPrecapture => "waiting_non_precapture",
            CaptureState::Taken => "taken",
        };
        f.write_str(name)
    }
}

/// Side effect requested by a transition. The caller carries it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    NotifyFocus(AfState),
    TriggerPrecapture,
    CaptureStill,
}

/// Result of feeding one frame to [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: CaptureState,
    pub last_af: Option<AfState>,
    pub command: Option<CaptureCommand>,
}

impl Step {
    fn stay(state: CaptureState, last_af: Option<AfState>) -> Self {
        Self {
            state,
            last_af,
            command: None,
        }
    }

    fn to(state: CaptureState, last_af: Option<AfState>, command: CaptureCommand) -> Self {
        Self {
            state,
            last_af,
            command: Some(command),
        }
    }
}

fn is_focus_settled(af: AfState) -> bool {
    matches!(
        af,
        AfState::Inactive | AfState::FocusedLocked | AfState::NotFocusedLocked
    )
}

/// Pure transition over one frame of metadata.
pub fn transition(state: CaptureState, last_af: Option<AfState>, frame: &FrameMetadata) -> Step {
    match state {
        CaptureState::Previewing => match frame.af_state {
            Some(af) if Some(af) != last_af => {
                Step::to(CaptureState::Previewing, Some(af), CaptureCommand::NotifyFocus(af))
            }
            _ => Step::stay(state, last_af),
        },

        CaptureState::WaitingFocusLock => match frame.af_state {
            // AF not reporting yet
            None => Step::to(
                CaptureState::WaitingPrecapture,
                last_af,
                CaptureCommand::TriggerPrecapture,
            ),
            Some(af) if is_focus_settled(af) => match frame.ae_state {
                // AE state is missing on some devices
                None | Some(AeState::Converged) => {
                    Step::to(CaptureState::Taken, last_af, CaptureCommand::CaptureStill)
                }
                Some(_) => Step::to(
                    CaptureState::WaitingPrecapture,
                    last_af,
                    CaptureCommand::TriggerPrecapture,
                ),
            },
            // Scanning states fall through to capture as if locked.
            Some(_) => Step::to(CaptureState::Taken, last_af, CaptureCommand::CaptureStill),
        },

        CaptureState::WaitingPrecapture => match frame.ae_state {
            None
            | Some(AeState::Precapture)
            | Some(AeState::FlashRequired)
            | Some(AeState::Converged) => Step::stay(CaptureState::WaitingNonPrecapture, last_af),
            Some(_) => Step::stay(state, last_af),
        },

        CaptureState::WaitingNonPrecapture => match frame.ae_state {
            Some(AeState::Precapture) => Step::stay(state, last_af),
            _ => Step::to(CaptureState::Taken, last_af, CaptureCommand::CaptureStill),
        },

        CaptureState::Taken => Step::stay(state, last_af),
    }
}

/// Current position in the capture sequence plus the last AF state seen
/// while previewing.
#[derive(Debug, Clone)]
pub struct CaptureStateMachine {
    state: CaptureState,
    last_af: Option<AfState>,
}

impl CaptureStateMachine {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Previewing,
            last_af: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn last_af_state(&self) -> Option<AfState> {
        self.last_af
    }

    /// Apply one frame and return the command the caller must carry out.
    pub fn on_frame(&mut self, frame: &FrameMetadata) -> Option<CaptureCommand> {
        let step = transition(self.state, self.last_af, frame);
        if step.state != self.state {
            debug!(
                "Capture state {} -> {} (frame {}, af {:?}, ae {:?})",
                self.state, step.state, frame.frame_number, frame.af_state, frame.ae_state
            );
        } else {
            trace!("Capture state {} unchanged (frame {})", self.state, frame.frame_number);
        }

        self.state = step.state;
        self.last_af = step.last_af;
        step.command
    }

    /// Enter [`CaptureState::WaitingFocusLock`]. Only a previewing machine can
    /// start a new shot; otherwise the current state is returned.
    pub fn lock_focus(&mut self) -> Result<(), CaptureState> {
        if self.state != CaptureState::Previewing {
            return Err(self.state);
        }
        debug!("Capture state {} -> {}", self.state, CaptureState::WaitingFocusLock);
        self.state = CaptureState::WaitingFocusLock;
        Ok(())
    }

    /// Return to [`CaptureState::Previewing`]. Called only once a repeating
    /// preview request is armed again.
    pub fn reset(&mut self) {
        if self.state != CaptureState::Previewing {
            debug!("Capture state {} -> {} (preview armed)", self.state, CaptureState::Previewing);
        }
        self.state = CaptureState::Previewing;
    }
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
