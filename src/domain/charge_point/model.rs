//! Charge point session status

use rust_ocpp::v1_6::types::{ChargePointErrorCode, ChargePointStatus as ConnectorStatus};
use serde::Serialize;

/// Operational status of a charge point as tracked by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargePointStatus {
    /// Connected and talking, no more specific status reported
    Online,
    /// Silent for longer than the heartbeat timeout, or disconnected
    Offline,
    Available,
    Unavailable,
    Faulted,
    /// Whole station (connector 0) taken out of service
    Maintenance,
    /// A connector reported an error code without faulting
    Error,
}

impl Default for ChargePointStatus {
    fn default() -> Self {
        Self::Online
    }
}

impl ChargePointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Faulted => "FAULTED",
            Self::Maintenance => "MAINTENANCE",
            Self::Error => "ERROR",
        }
    }

    /// Map a StatusNotification onto the station status.
    ///
    /// Busy connector states (Preparing, Charging, ...) keep the station
    /// ONLINE. Connector 0 going Unavailable means the whole station is in
    /// maintenance.
    pub fn from_notification(
        connector_id: u32,
        status: &ConnectorStatus,
        error_code: &ChargePointErrorCode,
    ) -> Self {
        match status {
            ConnectorStatus::Faulted => Self::Faulted,
            _ if *error_code != ChargePointErrorCode::NoError => Self::Error,
            ConnectorStatus::Available => Self::Available,
            ConnectorStatus::Unavailable if connector_id == 0 => Self::Maintenance,
            ConnectorStatus::Unavailable => Self::Unavailable,
            ConnectorStatus::Preparing
            | ConnectorStatus::Charging
            | ConnectorStatus::SuspendedEV
            | ConnectorStatus::SuspendedEVSE
            | ConnectorStatus::Finishing
            | ConnectorStatus::Reserved => Self::Online,
        }
    }
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
