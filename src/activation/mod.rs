//! Hands-free activation
//!
//! The phase machine and the controller that coordinates keyword spotting
//! with capture sessions.

pub mod controller;
pub mod state;

pub use controller::{
    ActivationStatus, CaptureEnvironment, ControlRole, CpalEnvironment, VoiceActivationController,
};
pub use state::{ActivationEvent, ActivationMachine, ActivationPhase, Transition, TransitionReason};
