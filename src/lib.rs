pub mod capture;
pub mod config;
pub mod controller;
pub mod delivery;
pub mod device;
pub mod error;
pub mod executor;
pub mod gate;
pub mod platform;
pub mod selector;
pub mod session;
pub mod stats;

pub use capture::{transition, CaptureCommand, CaptureState, CaptureStateMachine, RequestPolicy, Step};
pub use config::{CameraConfig, StillcamConfig, SystemConfig, TimingConfig};
pub use controller::{CameraController, FocusListener};
pub use delivery::{ImageDeliveryChannel, ImageHandler, ImageJob};
pub use device::{lifecycle_effects, DeviceLifecycleManager, LifecycleEffect, Liveness};
pub use error::{PlatformError, PlatformResult, Result, StillcamError};
pub use executor::{BackgroundContext, Executor};
pub use gate::{GatePermit, ResourceGate};
pub use platform::PendingImage;
pub use selector::{DeviceSelector, FacingPolicy, SelectedDevice};
pub use session::{SessionCoordinator, SessionStatus, SessionTargets};
pub use stats::{CaptureStats, CaptureStatsSnapshot};
