//! Balance lookup against the portal device endpoint
//!
//! One POST with the session token in a cookie, returning the bound device
//! list. The electricity meter is the device with `DeviceType == 1`; other
//! device types (water, gas) are ignored. No retry here — retry policy
//! belongs to the monitoring cycle.

use serde::{Deserialize, Serialize};

use crate::classify::looks_like_auth_expired;
use crate::error::{Error, Result};
use crate::login::TOKEN_COOKIE;

/// Device type identifying the electricity meter in the portal's list.
const ELECTRICITY_METER_TYPE: i64 = 1;

/// One parsed observation of the electricity meter.
///
/// `update_time` is the portal's own reading timestamp, an opaque display
/// string carried through to notifications unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReading {
    /// Remaining credit in currency units
    pub balance: f64,
    /// Room the meter is bound to
    pub room_name: String,
    pub device_name: Option<String>,
    /// Price per kWh, if the portal reports one
    pub price: Option<f64>,
    pub update_time: Option<String>,
    pub is_online: bool,
    pub switch_on: bool,
}

/// Portal response envelope. `Tag == 1` means success; any other value
/// carries an error in `Message`.
#[derive(Debug, Deserialize)]
struct PortalResponse {
    #[serde(rename = "Tag")]
    tag: i64,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "Data", default)]
    data: Option<DeviceData>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceData {
    #[serde(rename = "RoomName", default)]
    room_name: Option<String>,
    #[serde(rename = "DevicesList", default)]
    devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct Device {
    #[serde(rename = "DeviceType", default)]
    device_type: i64,
    #[serde(rename = "DeviceName", default)]
    device_name: Option<String>,
    #[serde(rename = "DeviceBalance", default)]
    balance: Option<f64>,
    #[serde(rename = "DevicePrice", default)]
    price: Option<f64>,
    #[serde(rename = "UpdateTime", default)]
    update_time: Option<String>,
    #[serde(rename = "IsOnline", default)]
    is_online: i64,
    #[serde(rename = "SwitchStatus", default)]
    switch_status: i64,
}

/// Perform one balance lookup with the given session token.
///
/// Returns `Error::AuthExpired` when the portal rejects the token (401/403,
/// or a `Tag != 1` payload whose message matches the auth-expiry patterns)
/// so the caller can decide whether to refresh. All other failures are
/// `Http`/`Portal`/`Parse` and must not trigger a refresh.
pub async fn fetch_balance(
    client: &reqwest::Client,
    balance_url: &str,
    token: &str,
) -> Result<BalanceReading> {
    let response = client
        .post(balance_url)
        .header(
            reqwest::header::COOKIE,
            format!("{TOKEN_COOKIE}={token}"),
        )
        .header("x-requested-with", "XMLHttpRequest")
        .send()
        .await
        .map_err(|e| Error::Http(format!("balance request failed: {e}")))?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(Error::AuthExpired);
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Portal(format!(
            "balance endpoint returned {status}: {body}"
        )));
    }

    let payload: PortalResponse = response
        .json()
        .await
        .map_err(|e| Error::Parse(format!("invalid balance response: {e}")))?;

    parse_reading(payload)
}

/// Extract the electricity meter reading from a portal response.
fn parse_reading(payload: PortalResponse) -> Result<BalanceReading> {
    if payload.tag != 1 {
        let message = payload
            .message
            .unwrap_or_else(|| String::from("unknown portal error"));
        if looks_like_auth_expired(&message) {
            return Err(Error::AuthExpired);
        }
        return Err(Error::Portal(message));
    }

    let data = payload.data.unwrap_or_default();
    let room_name = data
        .room_name
        .unwrap_or_else(|| String::from("unknown"));

    let device = data
        .devices
        .into_iter()
        .find(|d| d.device_type == ELECTRICITY_METER_TYPE)
        .ok_or_else(|| Error::Parse("no electricity meter in device list".into()))?;

    let balance = device
        .balance
        .ok_or_else(|| Error::Parse("meter device has no balance".into()))?;

    Ok(BalanceReading {
        balance,
        room_name,
        device_name: device.device_name,
        price: device.price,
        update_time: device.update_time,
        is_online: device.is_online == 1,
        switch_on: device.switch_status == 1,
    })
}
