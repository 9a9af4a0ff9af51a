use crate::error::{Result, StillcamError};
use crate::platform::{CameraCharacteristics, CameraProvider, LensFacing};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Rule for choosing a camera among the devices the platform reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingPolicy {
    /// First device that is not back-facing (unknown facing qualifies)
    #[default]
    NotBack,
    Front,
    Back,
    External,
    /// First device reported
    Any,
}

impl FacingPolicy {
    pub fn accepts(&self, facing: Option<LensFacing>) -> bool {
        match self {
            FacingPolicy::NotBack => facing != Some(LensFacing::Back),
            FacingPolicy::Front => facing == Some(LensFacing::Front),
            FacingPolicy::Back => facing == Some(LensFacing::Back),
            FacingPolicy::External => facing == Some(LensFacing::External),
            FacingPolicy::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacingPolicy::NotBack => "not_back",
            FacingPolicy::Front => "front",
            FacingPolicy::Back => "back",
            FacingPolicy::External => "external",
            FacingPolicy::Any => "any",
        }
    }
}

impl fmt::Display for FacingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device chosen by [`DeviceSelector`] along with its static description.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub id: String,
    pub characteristics: CameraCharacteristics,
}

pub struct DeviceSelector {
    policy: FacingPolicy,
}

impl DeviceSelector {
    pub fn new(policy: FacingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FacingPolicy {
        self.policy
    }

    /// Return the first device, in platform order, accepted by the policy.
    ///
    /// Devices whose characteristics cannot be read are skipped. Finding no
    /// device is fatal for the controller and reported as
    /// [`StillcamError::DeviceUnavailable`].
    pub fn select(&self, provider: &dyn CameraProvider) -> Result<SelectedDevice> {
        let ids = provider.camera_ids()?;
        debug!("Selecting camera among {} device(s) with policy '{}'", ids.len(), self.policy);

        for id in ids {
            let characteristics = match provider.characteristics(&id) {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    warn!("Skipping camera {}: characteristics unavailable: {}", id, e);
                    continue;
                }
            };

            if !self.policy.accepts(characteristics.lens_facing) {
                debug!(
                    "Camera {} rejected (facing {:?})",
                    id, characteristics.lens_facing
                );
                continue;
            }

            info!(
                "Selected camera {} (facing {:?})",
                id, characteristics.lens_facing
            );
            return Ok(SelectedDevice {
                id,
                characteristics,
            });
        }

        Err(StillcamError::DeviceUnavailable {
            policy: self.policy.to_string(),
        })
    }
}
