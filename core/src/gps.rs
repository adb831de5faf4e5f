/// GPS availability state machine and the platform provider boundary
pub use crate::location::Fix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Result of querying the platform permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user suppressed the prompt ("don't ask again"); recoverable only
    /// via external settings navigation, never retried automatically.
    PermanentlyDenied,
}

/// Events delivered by the platform location provider. Fix updates are
/// rate-limited on the provider side (displacement/elapsed-time thresholds);
/// the engine only assumes monotonically non-decreasing `observed_at`.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    FixUpdate(Fix),
    ProviderEnabled,
    ProviderDisabled,
    /// Outcome of a permission prompt, or an external permission change.
    PermissionChanged(PermissionState),
}

/// Platform location source, implemented outside the engine.
pub trait LocationProvider: Send + Sync {
    fn current_permission_state(&self) -> PermissionState;

    /// Triggers the OS permission prompt. The outcome arrives later as a
    /// `ProviderEvent::PermissionChanged` on the event channel, never as a
    /// synchronous return.
    fn request_permission(&self);

    /// Whether the device has location hardware at all.
    fn hardware_present(&self) -> bool;
}

/// Device-location availability. Exactly one value holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsStatus {
    /// No location hardware on this device; terminal for the session
    Nonexistent,
    /// Hardware present but disabled by the user
    Disabled,
    NoPermission,
    PermissionPermanentlyDenied,
    /// Provider enabled, no fix received yet
    Searching,
    LowAccuracy,
    HighAccuracy,
}

/// Derives `GpsStatus` from permission state, hardware presence,
/// provider-enabled state and the accuracy of the most recent fix.
/// Re-evaluating to the same status is a no-op, so each transition maps to
/// exactly one notification.
pub struct GpsStatusStateMachine {
    permission: PermissionState,
    hardware_present: bool,
    provider_enabled: bool,
    last_fix_accuracy: Option<f64>,
    accuracy_threshold: f64,
    current: GpsStatus,
}

impl GpsStatusStateMachine {
    pub fn new(accuracy_threshold: f64) -> Self {
        Self {
            permission: PermissionState::Denied,
            hardware_present: true,
            provider_enabled: false,
            last_fix_accuracy: None,
            accuracy_threshold,
            current: GpsStatus::NoPermission,
        }
    }

    pub fn status(&self) -> GpsStatus {
        self.current
    }

    /// Feed one provider event; returns the new status if it changed.
    pub fn apply(&mut self, event: &ProviderEvent) -> Option<GpsStatus> {
        match event {
            ProviderEvent::FixUpdate(fix) => self.last_fix_accuracy = Some(fix.accuracy_meters),
            ProviderEvent::ProviderEnabled => self.provider_enabled = true,
            ProviderEvent::ProviderDisabled => self.provider_enabled = false,
            ProviderEvent::PermissionChanged(state) => self.permission = *state,
        }
        self.reevaluate()
    }

    pub fn set_hardware_present(&mut self, present: bool) -> Option<GpsStatus> {
        self.hardware_present = present;
        self.reevaluate()
    }

    fn reevaluate(&mut self) -> Option<GpsStatus> {
        // Missing hardware is terminal: report once, never leave.
        if self.current == GpsStatus::Nonexistent {
            return None;
        }
        let next = self.derive();
        if next == self.current {
            return None;
        }
        debug!("GPS status {:?} -> {:?}", self.current, next);
        self.current = next;
        Some(next)
    }

    fn derive(&self) -> GpsStatus {
        match self.permission {
            PermissionState::Denied => return GpsStatus::NoPermission,
            PermissionState::PermanentlyDenied => return GpsStatus::PermissionPermanentlyDenied,
            PermissionState::Granted => {}
        }
        if !self.hardware_present {
            return GpsStatus::Nonexistent;
        }
        if !self.provider_enabled {
            return GpsStatus::Disabled;
        }
        match self.last_fix_accuracy {
            None => GpsStatus::Searching,
            Some(accuracy) if accuracy <= self.accuracy_threshold => GpsStatus::HighAccuracy,
            Some(_) => GpsStatus::LowAccuracy,
        }
    }
}
