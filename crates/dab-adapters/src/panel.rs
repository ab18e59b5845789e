//! Simulated panel adapter.
//!
//! Accepts any device address and keeps all state in memory: a settings
//! document, an application table, and canned device info. Serves as the
//! declared-order fallback behind the real adapters and as the workhorse of
//! the integration tests. Voice operations are deliberately absent so the
//! unsupported path stays reachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dab_core::{
    ops, required_int, required_str, DabError, DeviceDriver, DeviceInstance, InstanceBuilder,
};
use dab_json::JsonValue;
use serde_json::json;
use tokio::sync::RwLock;

use crate::bind;

// 1x1 transparent PNG
const SCREENSHOT_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x60,
    0x00, 0x02, 0x00, 0x00, 0x05, 0x00, 0x01, 0xE2, 0x26, 0x05, 0x9B, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const PANEL_KEYS: &[&str] = &[
    "KEY_POWER",
    "KEY_HOME",
    "KEY_VOLUME_UP",
    "KEY_VOLUME_DOWN",
    "KEY_MUTE",
    "KEY_UP",
    "KEY_DOWN",
    "KEY_LEFT",
    "KEY_RIGHT",
    "KEY_ENTER",
    "KEY_BACK",
];

const PANEL_APPS: &[&str] = &["netflix", "youtube", "primevideo", "settings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppState {
    Stopped,
    Background,
    Foreground,
}

impl AppState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Background => "BACKGROUND",
            Self::Foreground => "FOREGROUND",
        }
    }
}

fn default_settings() -> JsonValue {
    JsonValue::from(json!({
        "language": "en-US",
        "outputResolution": {"width": 3840, "height": 2160, "frequency": 60},
        "memc": false,
        "cec": true,
        "lowLatencyMode": true,
        "matchContentFrameRate": "EnabledSeamlessOnly",
        "hdrOutputMode": "AlwaysHdr",
        "pictureMode": "Other",
        "audioOutputMode": "Auto",
        "audioOutputSource": "HDMI",
        "videoInputSource": "Other",
        "audioVolume": 20,
        "mute": false,
        "textToSpeech": true,
    }))
}

/// Always-compatible fallback driver.
#[derive(Debug, Default)]
pub struct PanelDriver;

#[async_trait]
impl DeviceDriver for PanelDriver {
    fn kind(&self) -> &'static str {
        "panel"
    }

    async fn is_compatible(&self, _device_address: &str) -> bool {
        true
    }

    async fn connect(
        &self,
        device_id: &str,
        device_address: &str,
    ) -> Result<DeviceInstance, DabError> {
        Ok(SimPanel::build(device_id, device_address))
    }
}

struct SimPanel {
    device_id: String,
    address: String,
    started: Instant,
    settings: RwLock<JsonValue>,
    apps: RwLock<HashMap<String, AppState>>,
}

impl SimPanel {
    fn build(device_id: &str, device_address: &str) -> DeviceInstance {
        let apps = PANEL_APPS
            .iter()
            .map(|app| (app.to_string(), AppState::Stopped))
            .collect();
        let panel = Arc::new(Self {
            device_id: device_id.to_owned(),
            address: device_address.to_owned(),
            started: Instant::now(),
            settings: RwLock::new(default_settings()),
            apps: RwLock::new(apps),
        });

        InstanceBuilder::new(device_id)
            .operation(
                ops::DEVICE_INFO,
                bind(&panel, |panel, _cx, _payload| async move {
                    Ok(JsonValue::from(json!({
                        "deviceId": panel.device_id,
                        "manufacturer": "DAB",
                        "model": "sim-panel",
                        "serialNumber": "SIM-0001",
                        "firmwareVersion": "1.4.2",
                        "networkInterfaces": [{"connected": true, "ipAddress": panel.address}],
                    })))
                }),
            )
            .operation(
                ops::DISCOVERY,
                bind(&panel, |panel, _cx, _payload| async move {
                    let mut reply = JsonValue::new_object();
                    *reply.entry("ip") = panel.address.as_str().into();
                    *reply.entry("deviceId") = panel.device_id.as_str().into();
                    Ok(reply)
                }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_LIST,
                bind(&panel, |panel, _cx, _payload| async move {
                    Ok(panel.settings.read().await.clone())
                }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_GET,
                bind(&panel, |panel, _cx, _payload| async move {
                    Ok(panel.settings.read().await.clone())
                }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_SET,
                bind(&panel, |panel, _cx, payload| async move {
                    panel.settings_set(&payload).await
                }),
            )
            .operation(
                ops::APPLICATION_LIST,
                bind(&panel, |panel, _cx, _payload| async move {
                    let apps = panel.apps.read().await;
                    let mut names: Vec<&str> = apps.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    let mut reply = JsonValue::new_object();
                    let list = reply.entry("applications");
                    *list = JsonValue::new_array();
                    for name in names {
                        list.push(JsonValue::member("appId", name));
                    }
                    Ok(reply)
                }),
            )
            .operation(
                ops::APPLICATION_LAUNCH,
                bind(&panel, |panel, _cx, payload| async move {
                    let app_id = required_str(&payload, "appId")?.to_owned();
                    panel.set_app_state(&app_id, AppState::Foreground).await?;
                    Ok(JsonValue::new_object())
                }),
            )
            .operation(
                ops::APPLICATION_LAUNCH_WITH_CONTENT,
                bind(&panel, |panel, _cx, payload| async move {
                    let app_id = required_str(&payload, "appId")?.to_owned();
                    required_str(&payload, "contentId")?;
                    panel.set_app_state(&app_id, AppState::Foreground).await?;
                    Ok(JsonValue::member("state", "launched"))
                }),
            )
            .operation(
                ops::APPLICATION_GET_STATE,
                bind(&panel, |panel, _cx, payload| async move {
                    let app_id = required_str(&payload, "appId")?;
                    let apps = panel.apps.read().await;
                    let state = apps
                        .get(app_id)
                        .copied()
                        .ok_or_else(|| unknown_app(app_id))?;
                    Ok(JsonValue::member("state", state.as_str()))
                }),
            )
            .operation(
                ops::APPLICATION_EXIT,
                bind(&panel, |panel, _cx, payload| async move {
                    let app_id = required_str(&payload, "appId")?.to_owned();
                    let force = payload
                        .get("force")
                        .map(|f| f.boolean())
                        .transpose()
                        .map_err(|_| {
                            DabError::bad_request("parameter \"force\" must be a boolean")
                        })?
                        .unwrap_or(false);
                    let state = if force {
                        AppState::Stopped
                    } else {
                        AppState::Background
                    };
                    panel.set_app_state(&app_id, state).await?;
                    Ok(JsonValue::member("state", state.as_str()))
                }),
            )
            .operation(
                ops::INPUT_KEY_LIST,
                bind(&panel, |_panel, _cx, _payload| async move {
                    let mut reply = JsonValue::new_object();
                    let list = reply.entry("keyCodes");
                    for key in PANEL_KEYS {
                        list.push(*key);
                    }
                    Ok(reply)
                }),
            )
            .operation(
                ops::INPUT_KEY_PRESS,
                bind(&panel, |_panel, _cx, payload| async move {
                    let key_code = required_str(&payload, "keyCode")?;
                    check_key(key_code)?;
                    Ok(JsonValue::new_object())
                }),
            )
            .operation(
                ops::INPUT_KEY_LONG_PRESS,
                bind(&panel, |_panel, _cx, payload| async move {
                    let key_code = required_str(&payload, "keyCode")?;
                    check_key(key_code)?;
                    let duration_ms = required_int(&payload, "durationMs")?;
                    if duration_ms <= 0 {
                        return Err(DabError::bad_request("durationMs must be positive"));
                    }
                    Ok(JsonValue::new_object())
                }),
            )
            .operation(
                ops::OUTPUT_IMAGE,
                bind(&panel, |_panel, _cx, _payload| async move {
                    Ok(JsonValue::member(
                        "outputImage",
                        format!("data:image/png;base64,{}", BASE64.encode(SCREENSHOT_PNG)),
                    ))
                }),
            )
            .operation(
                ops::HEALTH_CHECK_GET,
                bind(&panel, |_panel, _cx, _payload| async move {
                    Ok(JsonValue::member("healthy", true))
                }),
            )
            .operation(
                ops::SYSTEM_RESTART,
                bind(&panel, |panel, _cx, _payload| async move {
                    let mut apps = panel.apps.write().await;
                    for state in apps.values_mut() {
                        *state = AppState::Stopped;
                    }
                    Ok(JsonValue::new_object())
                }),
            )
            .device_metrics({
                let panel = panel.clone();
                move || {
                    let panel = panel.clone();
                    async move {
                        let mut sample = JsonValue::new_object();
                        *sample.entry("cpu") = JsonValue::Int(7);
                        *sample.entry("memory") = JsonValue::Int(512);
                        *sample.entry("uptime") =
                            JsonValue::Int(panel.started.elapsed().as_secs() as i64);
                        Ok(sample)
                    }
                }
            })
            .app_metrics({
                let panel = panel.clone();
                move |app_id| {
                    let panel = panel.clone();
                    async move {
                        let apps = panel.apps.read().await;
                        let state = apps
                            .get(&app_id)
                            .copied()
                            .ok_or_else(|| unknown_app(&app_id))?;
                        let mut sample = JsonValue::new_object();
                        *sample.entry("appId") = app_id.as_str().into();
                        *sample.entry("state") = state.as_str().into();
                        Ok(sample)
                    }
                }
            })
            .build()
    }

    async fn settings_set(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let requested = payload
            .get("settings")
            .ok_or_else(|| DabError::missing_parameter("settings"))?;
        let members = requested
            .members()
            .map_err(|_| DabError::bad_request("parameter \"settings\" must be an object"))?;

        let mut settings = self.settings.write().await;
        for (name, value) in members {
            if settings.get(name).is_none() {
                return Err(DabError::bad_request(format!("unknown setting \"{name}\"")));
            }
            *settings.entry(name) = value.clone();
        }
        Ok(settings.clone())
    }

    async fn set_app_state(&self, app_id: &str, state: AppState) -> Result<(), DabError> {
        let mut apps = self.apps.write().await;
        match apps.get_mut(app_id) {
            Some(current) => {
                *current = state;
                Ok(())
            }
            None => Err(unknown_app(app_id)),
        }
    }
}

fn unknown_app(app_id: &str) -> DabError {
    DabError::bad_request(format!("unknown application \"{app_id}\""))
}

fn check_key(key_code: &str) -> Result<(), DabError> {
    if PANEL_KEYS.contains(&key_code) {
        Ok(())
    } else {
        Err(DabError::bad_request(format!(
            "key code {key_code} not found"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn panel() -> DeviceInstance {
        SimPanel::build("d1", "10.0.0.5")
    }

    fn payload(text: &str) -> JsonValue {
        dab_json::parse(text).expect("payload")
    }

    #[tokio::test]
    async fn test_device_info() {
        let instance = panel().await;
        let reply = instance
            .dispatch(ops::DEVICE_INFO, JsonValue::new_object())
            .await
            .expect("device info");
        assert_eq!(
            reply.get("model").and_then(|m| m.string().ok()),
            Some("sim-panel")
        );
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let instance = panel().await;
        let updated = instance
            .dispatch(
                ops::SYSTEM_SETTINGS_SET,
                payload("{\"settings\":{\"audioVolume\":55,\"mute\":true}}"),
            )
            .await
            .expect("set");
        assert_eq!(updated.get("audioVolume"), Some(&JsonValue::Int(55)));

        let current = instance
            .dispatch(ops::SYSTEM_SETTINGS_GET, JsonValue::new_object())
            .await
            .expect("get");
        assert_eq!(current.get("audioVolume"), Some(&JsonValue::Int(55)));
        assert_eq!(current.get("mute"), Some(&JsonValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_settings_set_rejects_unknown_names() {
        let instance = panel().await;
        let err = instance
            .dispatch(
                ops::SYSTEM_SETTINGS_SET,
                payload("{\"settings\":{\"brightness\":10}}"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[tokio::test]
    async fn test_app_lifecycle() {
        let instance = panel().await;

        instance
            .dispatch(ops::APPLICATION_LAUNCH, payload("{\"appId\":\"netflix\"}"))
            .await
            .expect("launch");
        let state = instance
            .dispatch(
                ops::APPLICATION_GET_STATE,
                payload("{\"appId\":\"netflix\"}"),
            )
            .await
            .expect("state");
        assert_eq!(
            state.get("state").and_then(|s| s.string().ok()),
            Some("FOREGROUND")
        );

        let exited = instance
            .dispatch(ops::APPLICATION_EXIT, payload("{\"appId\":\"netflix\"}"))
            .await
            .expect("exit");
        assert_eq!(
            exited.get("state").and_then(|s| s.string().ok()),
            Some("BACKGROUND")
        );

        let forced = instance
            .dispatch(
                ops::APPLICATION_EXIT,
                payload("{\"appId\":\"netflix\",\"force\":true}"),
            )
            .await
            .expect("forced exit");
        assert_eq!(
            forced.get("state").and_then(|s| s.string().ok()),
            Some("STOPPED")
        );
    }

    #[tokio::test]
    async fn test_unknown_app_is_400() {
        let instance = panel().await;
        let err = instance
            .dispatch(ops::APPLICATION_LAUNCH, payload("{\"appId\":\"nosuch\"}"))
            .await
            .unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[tokio::test]
    async fn test_key_press_validates_key() {
        let instance = panel().await;
        instance
            .dispatch(ops::INPUT_KEY_PRESS, payload("{\"keyCode\":\"KEY_ENTER\"}"))
            .await
            .expect("press");
        let err = instance
            .dispatch(ops::INPUT_KEY_PRESS, payload("{\"keyCode\":\"KEY_NOPE\"}"))
            .await
            .unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[tokio::test]
    async fn test_voice_is_unsupported() {
        let instance = panel().await;
        let err = instance
            .dispatch(ops::VOICE_LIST, JsonValue::new_object())
            .await
            .unwrap_err();
        assert_eq!(err, DabError::unsupported());
        assert!(!instance.supports(ops::VOICE_SEND_AUDIO));
    }

    #[tokio::test]
    async fn test_output_image_is_a_data_uri() {
        let instance = panel().await;
        let reply = instance
            .dispatch(ops::OUTPUT_IMAGE, JsonValue::new_object())
            .await
            .expect("image");
        let uri = reply
            .get("outputImage")
            .and_then(|i| i.string().ok())
            .expect("outputImage");
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
