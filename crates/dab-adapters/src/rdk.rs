//! Adapter for RDK-style settop devices.
//!
//! Maps the DAB catalog onto the device's Thunder JSON-RPC services
//! (`org.rdk.RDKShell`, `org.rdk.System`, `DeviceInfo`, ...). The
//! compatibility probe is a short `Controller.1.status` call; a device that
//! does not answer it is left to the next driver in line.
//!
//! Screen capture is a push flow: the adapter opens a one-shot HTTP listener,
//! asks `org.rdk.ScreenCapture` to upload to it, and base64-encodes whatever
//! PNG the device POSTs back.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dab_core::{
    ops, optional_str, required_int, required_str, DabError, DeviceDriver, DeviceInstance,
    InstanceBuilder,
};
use dab_json::JsonValue;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bind;
use crate::rpc::{RpcClient, RPC_PORT};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

const UPLOAD_PORT: u16 = 7878;
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);
const UPLOAD_MAX_HEAD: usize = 64 * 1024;

// Wait at most 2 seconds for an application to change state.
const APP_STATE_RETRIES: u32 = 20;
const APP_STATE_POLL: Duration = Duration::from_millis(100);

// RDKShell takes W3C key codes
fn keymap() -> &'static BTreeMap<&'static str, i64> {
    static KEYMAP: OnceLock<BTreeMap<&'static str, i64>> = OnceLock::new();
    KEYMAP.get_or_init(|| {
        BTreeMap::from([
            ("KEY_POWER", 112),
            ("KEY_HOME", 36),
            ("KEY_VOLUME_UP", 175),
            ("KEY_VOLUME_DOWN", 174),
            ("KEY_MUTE", 173),
            ("KEY_CHANNEL_UP", 33),
            ("KEY_CHANNEL_DOWN", 34),
            ("KEY_MENU", 93),
            ("KEY_EXIT", 27),
            ("KEY_INFO", 73),
            ("KEY_GUIDE", 71),
            ("KEY_UP", 38),
            ("KEY_DOWN", 40),
            ("KEY_LEFT", 37),
            ("KEY_RIGHT", 39),
            ("KEY_ENTER", 13),
            ("KEY_BACK", 8),
            ("KEY_PLAY", 179),
            ("KEY_PAUSE", 19),
            ("KEY_PLAY_PAUSE", 179),
            ("KEY_STOP", 178),
            ("KEY_REWIND", 227),
            ("KEY_FAST_FORWARD", 228),
            ("KEY_0", 48),
            ("KEY_1", 49),
            ("KEY_2", 50),
            ("KEY_3", 51),
            ("KEY_4", 52),
            ("KEY_5", 53),
            ("KEY_6", 54),
            ("KEY_7", 55),
            ("KEY_8", 56),
            ("KEY_9", 57),
        ])
    })
}

/// Cached document for the settings with no live device source; the
/// live-backed members (`language`, `outputResolution`, `audioVolume`,
/// `mute`, `cec`) are refreshed from the device on every read.
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

fn settings_catalog() -> JsonValue {
    JsonValue::from(json!({
        "language": ["en-US", "en-GB", "de-DE", "fr-FR"],
        "outputResolution": [
            {"width": 1920, "height": 1080, "frequency": 60},
            {"width": 3840, "height": 2160, "frequency": 60},
        ],
        "memc": true,
        "cec": true,
        "lowLatencyMode": true,
        "matchContentFrameRate": ["EnabledAlways", "EnabledSeamlessOnly", "Disabled"],
        "hdrOutputMode": ["AlwaysHdr", "HdrOnPlayback", "DisableHdr"],
        "pictureMode": ["Standard", "Vivid", "Sports", "Movie", "Game", "Other"],
        "audioOutputMode": ["Stereo", "MultichannelPcm", "PassThrough", "Auto"],
        "audioOutputSource": ["NativeSpeaker", "Arc", "EArc", "Optical", "Aux", "Bluetooth", "Auto", "HDMI"],
        "videoInputSource": ["Tuner", "HDMI1", "HDMI2", "HDMI3", "Composite", "Component", "Home", "Cast", "Other"],
        "audioVolume": {"min": 0, "max": 100},
        "mute": true,
        "textToSpeech": true,
    }))
}

/// `"3840x2160x60"` (optionally bracket-terminated) into a resolution object.
fn parse_display_framerate(framerate: &str) -> Option<JsonValue> {
    let framerate = framerate.strip_suffix(']').unwrap_or(framerate);
    let mut fields = framerate.split('x');
    let width: i64 = fields.next()?.parse().ok()?;
    let height: i64 = fields.next()?.parse().ok()?;
    let frequency: i64 = fields.next()?.parse().ok()?;
    Some(JsonValue::from(json!({
        "width": width,
        "height": height,
        "frequency": frequency,
    })))
}

/// `"1080p60"`-style device resolution into a resolution object; entries
/// with no frame rate default to 60.
fn parse_rdk_resolution(text: &str) -> Option<JsonValue> {
    let scan = text.find(['p', 'i'])?;
    let height: i64 = text[..scan].parse().ok()?;
    let frequency: i64 = text[scan + 1..].parse().unwrap_or(60);
    let width = resolution_width(height)?;
    Some(JsonValue::from(json!({
        "width": width,
        "height": height,
        "frequency": frequency,
    })))
}

fn resolution_width(height: i64) -> Option<i64> {
    match height {
        480 => Some(640),
        576 => Some(720),
        720 => Some(1280),
        1080 => Some(1920),
        2160 => Some(3840),
        4320 => Some(7680),
        _ => None,
    }
}

/// Selects RDK devices by probing their JSON-RPC controller.
pub struct RdkDriver {
    probe_timeout: Duration,
}

impl RdkDriver {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

impl Default for RdkDriver {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl DeviceDriver for RdkDriver {
    fn kind(&self) -> &'static str {
        "rdk"
    }

    async fn is_compatible(&self, device_address: &str) -> bool {
        let compatible = RpcClient::probe(device_address, self.probe_timeout).await;
        debug!("rdk probe of {}: {}", device_address, compatible);
        compatible
    }

    async fn connect(
        &self,
        device_id: &str,
        device_address: &str,
    ) -> Result<DeviceInstance, DabError> {
        Ok(RdkDevice::build(device_id, device_address))
    }
}

/// One-shot HTTP listener the device uploads the screen capture to.
struct UploadServer {
    listener: TcpListener,
    target_path: String,
}

struct UploadHead {
    method: String,
    target: String,
    content_type: String,
    content_length: usize,
}

impl UploadServer {
    async fn bind(
        local_address: IpAddr,
        port: u16,
        target_path: String,
    ) -> Result<Self, DabError> {
        let listener = TcpListener::bind((local_address, port))
            .await
            .map_err(|e| DabError::new(500, format!("cannot bind capture listener: {e}")))?;
        Ok(Self {
            listener,
            target_path,
        })
    }

    fn url(&self) -> Result<String, DabError> {
        let local = self
            .listener
            .local_addr()
            .map_err(|e| DabError::new(500, format!("capture listener has no address: {e}")))?;
        Ok(format!(
            "http://{}:{}/{}",
            local.ip(),
            local.port(),
            self.target_path
        ))
    }

    /// Accept the device's single POST of the capture and return its body.
    async fn receive(self) -> Result<Vec<u8>, DabError> {
        let failed =
            |stage: &str| DabError::new(500, format!("screen capture upload failed: {stage}"));

        let (mut socket, _) = self
            .listener
            .accept()
            .await
            .map_err(|_| failed("accept"))?;

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let body_start = loop {
            let read = socket.read(&mut chunk).await.map_err(|_| failed("read"))?;
            if read == 0 {
                return Err(failed("connection closed before headers"));
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(pos) = find_body_start(&buffer) {
                break pos;
            }
            if buffer.len() > UPLOAD_MAX_HEAD {
                return Err(failed("oversized request head"));
            }
        };

        let head = String::from_utf8_lossy(&buffer[..body_start - 4]).into_owned();
        let expected_target = format!("/{}", self.target_path);
        let request = parse_upload_head(&head).filter(|request| {
            request.method == "POST"
                && request.target == expected_target
                && request.content_type == "image/png"
                && request.content_length > 0
        });
        let Some(request) = request else {
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            return Err(DabError::bad_request("Invalid request received"));
        };

        let mut body = buffer.split_off(body_start);
        while body.len() < request.content_length {
            let read = socket
                .read(&mut chunk)
                .await
                .map_err(|_| failed("read body"))?;
            if read == 0 {
                return Err(failed("connection closed mid body"));
            }
            body.extend_from_slice(&chunk[..read]);
        }
        body.truncate(request.content_length);

        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        Ok(body)
    }
}

fn find_body_start(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_upload_head(head: &str) -> Option<UploadHead> {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_owned();
    let target = request_line.next()?.to_owned();

    let mut content_type = String::new();
    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-type") {
            content_type = value.to_owned();
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok()?;
        }
    }
    Some(UploadHead {
        method,
        target,
        content_type,
        content_length,
    })
}

/// Local address the device can reach us on, taken from a UDP socket
/// connected towards its service port.
async fn local_address_for(device_address: &str) -> Result<IpAddr, DabError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| DabError::new(500, format!("cannot determine local address: {e}")))?;
    socket
        .connect((device_address, RPC_PORT))
        .await
        .map_err(|e| DabError::new(500, format!("cannot determine local address: {e}")))?;
    let local = socket
        .local_addr()
        .map_err(|e| DabError::new(500, format!("cannot determine local address: {e}")))?;
    Ok(local.ip())
}

fn capture_guid() -> String {
    chrono::Utc::now().timestamp_subsec_nanos().to_string()
}

struct RdkDevice {
    device_id: String,
    address: String,
    rpc: RpcClient,
    http: reqwest::Client,
    settings: RwLock<JsonValue>,
}

impl RdkDevice {
    fn build(device_id: &str, device_address: &str) -> DeviceInstance {
        let device = Arc::new(Self {
            device_id: device_id.to_owned(),
            address: device_address.to_owned(),
            rpc: RpcClient::new(device_address),
            http: reqwest::Client::new(),
            settings: RwLock::new(default_settings()),
        });
        info!("rdk adapter bound to {}", device_address);

        InstanceBuilder::new(device_id)
            .operation(
                ops::DEVICE_INFO,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.device_info().await
                }),
            )
            .operation(
                ops::DISCOVERY,
                bind(&device, |dev, _cx, _payload| async move { dev.discovery() }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_LIST,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.settings_list().await
                }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_GET,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.settings_get().await
                }),
            )
            .operation(
                ops::SYSTEM_SETTINGS_SET,
                bind(&device, |dev, _cx, payload| async move {
                    dev.settings_set(&payload).await
                }),
            )
            .operation(
                ops::SYSTEM_RESTART,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.restart().await
                }),
            )
            .operation(
                ops::APPLICATION_LIST,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.app_list().await
                }),
            )
            .operation(
                ops::APPLICATION_LAUNCH,
                bind(&device, |dev, _cx, payload| async move {
                    dev.app_launch(&payload).await
                }),
            )
            .operation(
                ops::APPLICATION_LAUNCH_WITH_CONTENT,
                bind(&device, |dev, _cx, payload| async move {
                    dev.app_launch_with_content(&payload).await
                }),
            )
            .operation(
                ops::APPLICATION_GET_STATE,
                bind(&device, |dev, _cx, payload| async move {
                    let app_id = required_str(&payload, "appId")?;
                    dev.app_state(app_id).await
                }),
            )
            .operation(
                ops::APPLICATION_EXIT,
                bind(&device, |dev, _cx, payload| async move {
                    dev.app_exit(&payload).await
                }),
            )
            .operation(
                ops::INPUT_KEY_LIST,
                bind(&device, |_dev, _cx, _payload| async move {
                    let mut reply = JsonValue::new_object();
                    let list = reply.entry("keyCodes");
                    for name in keymap().keys() {
                        list.push(*name);
                    }
                    Ok(reply)
                }),
            )
            .operation(
                ops::INPUT_KEY_PRESS,
                bind(&device, |dev, _cx, payload| async move {
                    let key_code = required_str(&payload, "keyCode")?;
                    dev.key_press(key_code).await
                }),
            )
            .operation(
                ops::INPUT_KEY_LONG_PRESS,
                bind(&device, |dev, _cx, payload| async move {
                    dev.key_long_press(&payload).await
                }),
            )
            .operation(
                ops::OUTPUT_IMAGE,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.output_image().await
                }),
            )
            .operation(
                ops::HEALTH_CHECK_GET,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.health_check().await
                }),
            )
            .operation(
                ops::VOICE_LIST,
                bind(&device, |dev, _cx, _payload| async move {
                    dev.voice_list().await
                }),
            )
            .operation(
                ops::VOICE_SET,
                bind(&device, |dev, _cx, payload| async move {
                    dev.voice_set(&payload).await
                }),
            )
            .operation(
                ops::VOICE_SEND_AUDIO,
                bind(&device, |dev, _cx, payload| async move {
                    dev.voice_send_audio(&payload).await
                }),
            )
            .operation(
                ops::VOICE_SEND_TEXT,
                bind(&device, |dev, _cx, payload| async move {
                    dev.voice_send_text(&payload).await
                }),
            )
            .device_metrics({
                let device = device.clone();
                move || {
                    let device = device.clone();
                    async move { device.device_metrics().await }
                }
            })
            .app_metrics({
                let device = device.clone();
                move |app_id| {
                    let device = device.clone();
                    async move { device.app_metrics(&app_id).await }
                }
            })
            .build()
    }

    async fn device_info(&self) -> Result<JsonValue, DabError> {
        let info = self.rpc.call("DeviceInfo.1.systeminfo", Value::Null).await?;

        let mut reply = JsonValue::new_object();
        *reply.entry("deviceId") = self.device_id.as_str().into();
        if let Some(serial) = info.get("serialnumber").and_then(Value::as_str) {
            *reply.entry("serialNumber") = serial.into();
        }
        if let Some(version) = info.get("version").and_then(Value::as_str) {
            *reply.entry("firmwareVersion") = version.into();
        }
        if let Some(ram) = info.get("totalram").and_then(Value::as_i64) {
            *reply.entry("memory") = JsonValue::Int(ram);
        }
        *reply.entry("networkInterfaces") = JsonValue::from_elems(vec![
            JsonValue::ARRAY,
            JsonValue::from(json!({"connected": true, "ipAddress": self.address})),
        ]);
        Ok(reply)
    }

    fn discovery(&self) -> Result<JsonValue, DabError> {
        let mut reply = JsonValue::new_object();
        *reply.entry("ip") = self.address.as_str().into();
        *reply.entry("deviceId") = self.device_id.as_str().into();
        Ok(reply)
    }

    /// First connected audio port, the target of the volume and mute calls.
    async fn audio_port(&self) -> Result<String, DabError> {
        let reply = self
            .rpc
            .call(
                "org.rdk.DisplaySettings.1.getConnectedAudioPorts",
                Value::Null,
            )
            .await?;
        Ok(reply
            .get("connectedAudioPorts")
            .and_then(Value::as_array)
            .and_then(|ports| ports.first())
            .and_then(Value::as_str)
            .unwrap_or("HDMI0")
            .to_owned())
    }

    async fn video_display(&self) -> Result<String, DabError> {
        let reply = self
            .rpc
            .call(
                "org.rdk.DisplaySettings.1.getConnectedVideoDisplays",
                Value::Null,
            )
            .await?;
        reply
            .get("connectedVideoDisplays")
            .and_then(Value::as_array)
            .and_then(|displays| displays.first())
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| DabError::bad_request("Device doesn't have any connected video port"))
    }

    async fn settings_list(&self) -> Result<JsonValue, DabError> {
        let mut catalog = settings_catalog();
        *catalog.entry("outputResolution") = self.supported_resolutions().await?;
        Ok(catalog)
    }

    async fn supported_resolutions(&self) -> Result<JsonValue, DabError> {
        let display = self.video_display().await?;
        let reply = self
            .rpc
            .call(
                "org.rdk.DisplaySettings.1.getSupportedResolutions",
                json!({"videoDisplay": display}),
            )
            .await?;

        let mut list = JsonValue::new_array();
        for entry in reply
            .get("supportedResolutions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(resolution) = entry.as_str().and_then(parse_rdk_resolution) {
                list.push(resolution);
            }
        }
        Ok(list)
    }

    /// Current settings: the live-backed members are read from the device,
    /// the rest come from the cached document.
    async fn settings_get(&self) -> Result<JsonValue, DabError> {
        let mut settings = self.settings.read().await.clone();
        *settings.entry("language") = self.read_language().await?;
        *settings.entry("outputResolution") = self.read_resolution().await?;
        *settings.entry("audioVolume") = self.read_volume().await?;
        *settings.entry("mute") = self.read_mute().await?;
        *settings.entry("cec") = self.read_cec().await?;

        *self.settings.write().await = settings.clone();
        Ok(settings)
    }

    async fn read_language(&self) -> Result<JsonValue, DabError> {
        let reply = self
            .rpc
            .call("org.rdk.UserPreferences.1.getUILanguage", Value::Null)
            .await?;
        let language = reply
            .get("ui_language")
            .and_then(Value::as_str)
            .ok_or_else(|| DabError::new(500, "device returned no ui_language"))?;
        Ok(language.into())
    }

    async fn read_resolution(&self) -> Result<JsonValue, DabError> {
        let reply = self
            .rpc
            .call("org.rdk.FrameRate.1.getDisplayFrameRate", Value::Null)
            .await?;
        reply
            .get("framerate")
            .and_then(Value::as_str)
            .and_then(parse_display_framerate)
            .ok_or_else(|| DabError::new(500, "Unable to parse display frame rate"))
    }

    async fn read_volume(&self) -> Result<JsonValue, DabError> {
        let port = self.audio_port().await?;
        let reply = self
            .rpc
            .call(
                "org.rdk.DisplaySettings.1.getVolumeLevel",
                json!({"audioPort": port}),
            )
            .await?;
        // the service reports the level as a string
        let level = reply
            .get("volumeLevel")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<i64>().ok())
            .or_else(|| reply.get("volumeLevel").and_then(Value::as_i64))
            .ok_or_else(|| DabError::new(500, "Unable to parse volume level"))?;
        Ok(JsonValue::Int(level))
    }

    async fn read_mute(&self) -> Result<JsonValue, DabError> {
        let port = self.audio_port().await?;
        let reply = self
            .rpc
            .call(
                "org.rdk.DisplaySettings.1.getMuted",
                json!({"audioPort": port}),
            )
            .await?;
        let muted = reply
            .get("muted")
            .and_then(Value::as_bool)
            .or_else(|| {
                reply
                    .get("muted")
                    .and_then(Value::as_str)
                    .map(|m| m == "true")
            })
            .ok_or_else(|| DabError::new(500, "Unable to parse mute state"))?;
        Ok(muted.into())
    }

    async fn read_cec(&self) -> Result<JsonValue, DabError> {
        let reply = self
            .rpc
            .call("org.rdk.HdmiCec_2.1.getEnabled", Value::Null)
            .await?;
        let enabled = reply
            .get("enabled")
            .and_then(Value::as_bool)
            .ok_or_else(|| DabError::new(500, "Unable to parse cec state"))?;
        Ok(enabled.into())
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
                return Err(DabError::bad_request(format!(
                    "unknown setting \"{name}\""
                )));
            }
            self.push_setting(name, value).await?;
            *settings.entry(name) = value.clone();
        }
        Ok(settings.clone())
    }

    /// Forward the settings that map onto device services; the rest only
    /// live in the cached document. Mirrors the live-read split in
    /// `settings_get`.
    async fn push_setting(&self, name: &str, value: &JsonValue) -> Result<(), DabError> {
        match name {
            "language" => {
                let language = value
                    .string()
                    .map_err(|_| DabError::bad_request("language must be a string"))?;
                self.rpc
                    .call(
                        "org.rdk.UserPreferences.1.setUILanguage",
                        json!({"ui_language": language}),
                    )
                    .await?;
            }
            "audioVolume" => {
                let volume = value
                    .integer()
                    .map_err(|_| DabError::bad_request("audioVolume must be an integer"))?;
                let port = self.audio_port().await?;
                self.rpc
                    .call(
                        "org.rdk.DisplaySettings.1.setVolumeLevel",
                        json!({"audioPort": port, "volumeLevel": volume}),
                    )
                    .await?;
            }
            "mute" => {
                let muted = value
                    .boolean()
                    .map_err(|_| DabError::bad_request("mute must be a boolean"))?;
                let port = self.audio_port().await?;
                self.rpc
                    .call(
                        "org.rdk.DisplaySettings.1.setMuted",
                        json!({"audioPort": port, "muted": muted}),
                    )
                    .await?;
            }
            "cec" => {
                let enabled = value
                    .boolean()
                    .map_err(|_| DabError::bad_request("cec must be a boolean"))?;
                self.rpc
                    .call("org.rdk.HdmiCec_2.1.setEnabled", json!({"enabled": enabled}))
                    .await?;
            }
            "outputResolution" => {
                let width = required_int(value, "width")?;
                let height = required_int(value, "height")?;
                let frequency = match value.get("frequency") {
                    Some(f) => f
                        .integer()
                        .map_err(|_| DabError::bad_request("frequency must be an integer"))?,
                    None => 60,
                };
                if resolution_width(height) != Some(width) {
                    return Err(DabError::new(500, "Unsupported video format"));
                }
                let display = self.video_display().await?;
                self.rpc
                    .call(
                        "org.rdk.DisplaySettings.1.setCurrentResolution",
                        json!({
                            "videoDisplay": display,
                            "resolution": format!("{height}p{frequency}"),
                            "persist": true,
                        }),
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn restart(&self) -> Result<JsonValue, DabError> {
        self.rpc
            .call(
                "org.rdk.System.1.reboot",
                json!({"rebootReason": "DAB_RESTART_REQUEST"}),
            )
            .await?;
        Ok(JsonValue::new_object())
    }

    async fn app_list(&self) -> Result<JsonValue, DabError> {
        let result = self
            .rpc
            .call("org.rdk.RDKShell.1.getAvailableTypes", Value::Null)
            .await?;
        let types = result
            .get("types")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut reply = JsonValue::new_object();
        let list = reply.entry("applications");
        *list = JsonValue::new_array();
        for ty in types {
            if let Some(app_id) = ty.as_str() {
                list.push(JsonValue::member("appId", app_id));
            }
        }
        Ok(reply)
    }

    async fn app_launch(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let app_id = required_str(payload, "appId")?;
        self.rpc
            .call("org.rdk.RDKShell.1.launch", json!({"callsign": app_id}))
            .await?;
        self.rpc
            .call("org.rdk.RDKShell.1.setFocus", json!({"client": app_id}))
            .await?;
        self.wait_for_app_state(app_id, "FOREGROUND").await?;
        Ok(JsonValue::new_object())
    }

    async fn app_launch_with_content(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let app_id = required_str(payload, "appId")?;
        let content_id = required_str(payload, "contentId")?;
        self.rpc
            .call(
                "org.rdk.RDKShell.1.launch",
                json!({
                    "callsign": app_id,
                    "configuration": {"contentId": content_id},
                }),
            )
            .await?;
        self.rpc
            .call("org.rdk.RDKShell.1.setFocus", json!({"client": app_id}))
            .await?;
        self.wait_for_app_state(app_id, "FOREGROUND").await?;
        Ok(JsonValue::new_object())
    }

    async fn app_state(&self, app_id: &str) -> Result<JsonValue, DabError> {
        let result = self
            .rpc
            .call("org.rdk.RDKShell.1.getState", Value::Null)
            .await?;
        let state = result
            .get("state")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|entry| entry.get("callsign").and_then(Value::as_str) == Some(app_id))
            .map(|entry| match entry.get("state").and_then(Value::as_str) {
                Some("suspended") | Some("hibernated") => "BACKGROUND",
                _ => "FOREGROUND",
            })
            .unwrap_or("STOPPED");
        Ok(JsonValue::member("state", state))
    }

    /// Poll until the application reports `target_state`; launch and exit
    /// are asynchronous on the device, so the settled state is what callers
    /// of `application/get-state` must observe afterwards.
    async fn wait_for_app_state(
        &self,
        app_id: &str,
        target_state: &str,
    ) -> Result<JsonValue, DabError> {
        for _ in 0..APP_STATE_RETRIES {
            let state = self.app_state(app_id).await?;
            if state.get("state").and_then(|s| s.string().ok()) == Some(target_state) {
                return Ok(state);
            }
            tokio::time::sleep(APP_STATE_POLL).await;
        }
        Err(DabError::bad_request(
            "Timeout waiting for application state change.",
        ))
    }

    async fn app_exit(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let app_id = required_str(payload, "appId")?;
        let force = payload
            .get("force")
            .map(|f| f.boolean())
            .transpose()
            .map_err(|_| DabError::bad_request("parameter \"force\" must be a boolean"))?
            .unwrap_or(false);

        let state = self.app_state(app_id).await?;
        if state.get("state").and_then(|s| s.string().ok()) == Some("STOPPED") {
            return Ok(state);
        }

        let target_state = if force {
            self.rpc
                .call("org.rdk.RDKShell.1.destroy", json!({"callsign": app_id}))
                .await?;
            "STOPPED"
        } else {
            self.rpc
                .call("org.rdk.RDKShell.1.suspend", json!({"callsign": app_id}))
                .await?;
            "BACKGROUND"
        };
        self.wait_for_app_state(app_id, target_state).await
    }

    async fn key_press(&self, key_code: &str) -> Result<JsonValue, DabError> {
        let code = lookup_key(key_code)?;
        self.rpc
            .call("org.rdk.RDKShell.1.injectKey", json!({"keyCode": code}))
            .await?;
        Ok(JsonValue::new_object())
    }

    async fn key_long_press(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        const REQUEST_INTERVAL: Duration = Duration::from_millis(50);

        let key_code = required_str(payload, "keyCode")?;
        let duration_ms = required_int(payload, "durationMs")?;
        if duration_ms <= 0 {
            return Err(DabError::bad_request("durationMs must be positive"));
        }
        let code = lookup_key(key_code)?;

        let duration = Duration::from_millis(duration_ms as u64);
        let started = tokio::time::Instant::now();
        while started.elapsed() < duration {
            self.rpc
                .call("org.rdk.RDKShell.1.injectKey", json!({"keyCode": code}))
                .await?;
            tokio::time::sleep(REQUEST_INTERVAL).await;
        }
        Ok(JsonValue::new_object())
    }

    /// Screen capture: open the local upload listener, point the device's
    /// capture service at it, and wait for the PNG push.
    async fn output_image(&self) -> Result<JsonValue, DabError> {
        let guid = capture_guid();
        let local_address = local_address_for(&self.address).await?;
        let server = UploadServer::bind(local_address, UPLOAD_PORT, guid.clone()).await?;
        let upload_url = server.url()?;

        self.rpc
            .call(
                "org.rdk.ScreenCapture.1.uploadScreenCapture",
                json!({"url": upload_url, "callGUID": guid}),
            )
            .await?;

        let image = tokio::time::timeout(UPLOAD_TIMEOUT, server.receive())
            .await
            .map_err(|_| DabError::new(500, "timed out waiting for the screen capture upload"))??;

        Ok(JsonValue::member(
            "outputImage",
            format!("data:image/png;base64,{}", BASE64.encode(&image)),
        ))
    }

    async fn health_check(&self) -> Result<JsonValue, DabError> {
        let healthy = self.rpc.call("Controller.1.status", Value::Null).await.is_ok();
        Ok(JsonValue::member("healthy", healthy))
    }

    async fn voice_list(&self) -> Result<JsonValue, DabError> {
        let status = self
            .rpc
            .call("org.rdk.VoiceControl.1.voiceStatus", Value::Null)
            .await?;

        let mut systems = JsonValue::new_array();
        let url_ptt = status.get("urlPtt").and_then(Value::as_str).unwrap_or("");
        if url_ptt.starts_with("avs://") {
            let ready = status
                .get("ptt")
                .and_then(|ptt| ptt.get("status"))
                .and_then(Value::as_str)
                == Some("ready");
            let mut system = JsonValue::new_object();
            *system.entry("name") = "AmazonAlexa".into();
            *system.entry("enabled") = ready.into();
            systems.push(system);
        }
        Ok(JsonValue::member("voiceSystems", systems))
    }

    async fn voice_set(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let system = payload
            .get("voiceSystem")
            .ok_or_else(|| DabError::missing_parameter("voiceSystem"))?;
        let name = required_str(system, "name")?;
        if name != "AmazonAlexa" {
            return Err(DabError::bad_request(format!(
                "unsupported voice system \"{name}\""
            )));
        }
        let enable = system
            .get("enabled")
            .ok_or_else(|| DabError::missing_parameter("enabled"))?
            .boolean()
            .map_err(|_| DabError::bad_request("parameter \"enabled\" must be a boolean"))?;

        self.rpc
            .call(
                "org.rdk.VoiceControl.1.configureVoice",
                json!({"enable": enable, "enablePtt": enable}),
            )
            .await?;

        let mut reply = JsonValue::new_object();
        let state = reply.entry("voiceSystem");
        *state.entry("name") = name.into();
        *state.entry("enabled") = enable.into();
        Ok(reply)
    }

    async fn voice_send_audio(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let file_location = required_str(payload, "fileLocation")?;
        let _voice_system = optional_str(payload, "voiceSystem")?;

        let audio = self
            .http
            .get(file_location)
            .send()
            .await
            .map_err(|e| DabError::bad_request(format!("cannot fetch \"{file_location}\": {e}")))?
            .bytes()
            .await
            .map_err(|e| DabError::bad_request(format!("cannot fetch \"{file_location}\": {e}")))?;

        // scratch file lives exactly as long as the voice session request;
        // dropping it deletes it on every exit path
        let scratch = write_scratch(&audio)?;
        let path = scratch.path().to_string_lossy().into_owned();
        self.rpc
            .call(
                "org.rdk.VoiceControl.1.voiceSessionRequest",
                json!({"audioFile": path, "type": "ptt_audio_file"}),
            )
            .await?;
        Ok(JsonValue::new_object())
    }

    async fn voice_send_text(&self, payload: &JsonValue) -> Result<JsonValue, DabError> {
        let request_text = required_str(payload, "requestText")?;
        if let Some(system) = optional_str(payload, "voiceSystem")? {
            if system != "AmazonAlexa" {
                return Err(DabError::bad_request(format!(
                    "unsupported voice system \"{system}\""
                )));
            }
        }

        self.rpc
            .call(
                "org.rdk.VoiceControl.1.voiceSessionRequest",
                json!({"transcription": request_text, "type": "ptt_transcription"}),
            )
            .await?;
        Ok(JsonValue::new_object())
    }

    async fn device_metrics(&self) -> Result<JsonValue, DabError> {
        let info = self.rpc.call("DeviceInfo.1.systeminfo", Value::Null).await?;
        let mut sample = JsonValue::new_object();
        if let Some(free) = info.get("freeram").and_then(Value::as_i64) {
            *sample.entry("freeRam") = JsonValue::Int(free);
        }
        if let Some(uptime) = info.get("uptime").and_then(Value::as_i64) {
            *sample.entry("uptime") = JsonValue::Int(uptime);
        }
        *sample.entry("timestamp") = JsonValue::Int(chrono::Utc::now().timestamp_millis());
        Ok(sample)
    }

    async fn app_metrics(&self, app_id: &str) -> Result<JsonValue, DabError> {
        let state = self.app_state(app_id).await?;
        let mut sample = JsonValue::new_object();
        *sample.entry("appId") = app_id.into();
        *sample.entry("state") = state.get("state").cloned().unwrap_or_default();
        *sample.entry("timestamp") = JsonValue::Int(chrono::Utc::now().timestamp_millis());
        Ok(sample)
    }
}

fn lookup_key(key_code: &str) -> Result<i64, DabError> {
    keymap()
        .get(key_code)
        .copied()
        .ok_or_else(|| DabError::bad_request(format!("key code {key_code} not found")))
}

fn write_scratch(audio: &[u8]) -> Result<tempfile::NamedTempFile, DabError> {
    let mut scratch = tempfile::NamedTempFile::new()
        .map_err(|e| DabError::new(500, format!("cannot create scratch file: {e}")))?;
    scratch
        .write_all(audio)
        .map_err(|e| DabError::new(500, format!("cannot write scratch file: {e}")))?;
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn test_keymap_lookup() {
        assert_eq!(lookup_key("KEY_ENTER"), Ok(13));
        assert_eq!(lookup_key("KEY_UP"), Ok(38));
        let err = lookup_key("KEY_NOPE").unwrap_err();
        assert_eq!(err.code, 400);
        assert!(err.text.contains("KEY_NOPE"));
    }

    #[test]
    fn test_default_settings_document() {
        let settings = default_settings();
        assert_eq!(settings.get("audioVolume"), Some(&JsonValue::Int(20)));
        assert_eq!(
            settings
                .get("outputResolution")
                .and_then(|r| r.get("width")),
            Some(&JsonValue::Int(3840))
        );
        // every default has an entry in the published catalog
        let catalog = settings_catalog();
        for (name, _) in settings.entries() {
            assert!(catalog.has(name), "{name} missing from settings catalog");
        }
    }

    #[test]
    fn test_parse_display_framerate() {
        let resolution = parse_display_framerate("3840x2160x60").expect("parse");
        assert_eq!(resolution.get("width"), Some(&JsonValue::Int(3840)));
        assert_eq!(resolution.get("height"), Some(&JsonValue::Int(2160)));
        assert_eq!(resolution.get("frequency"), Some(&JsonValue::Int(60)));

        // the service sometimes reports a bracket-terminated value
        let resolution = parse_display_framerate("1920x1080x30]").expect("parse");
        assert_eq!(resolution.get("height"), Some(&JsonValue::Int(1080)));

        assert!(parse_display_framerate("notaframerate").is_none());
    }

    #[test]
    fn test_parse_rdk_resolution() {
        let resolution = parse_rdk_resolution("1080p60").expect("parse");
        assert_eq!(resolution.get("width"), Some(&JsonValue::Int(1920)));
        assert_eq!(resolution.get("height"), Some(&JsonValue::Int(1080)));
        assert_eq!(resolution.get("frequency"), Some(&JsonValue::Int(60)));

        // interlaced entries without a rate default to 60
        let resolution = parse_rdk_resolution("480i").expect("parse");
        assert_eq!(resolution.get("width"), Some(&JsonValue::Int(640)));
        assert_eq!(resolution.get("frequency"), Some(&JsonValue::Int(60)));

        assert!(parse_rdk_resolution("999p60").is_none());
        assert!(parse_rdk_resolution("garbage").is_none());
    }

    #[tokio::test]
    async fn test_upload_server_round_trip() {
        let server = UploadServer::bind("127.0.0.1".parse().expect("ip"), 0, "cap123".into())
            .await
            .expect("bind");
        let url = server.url().expect("url");
        let authority = url
            .strip_prefix("http://")
            .and_then(|rest| rest.split('/').next())
            .expect("authority")
            .to_owned();
        assert!(url.ends_with("/cap123"));

        let client = tokio::spawn(async move {
            let mut socket = TcpStream::connect(authority).await.expect("connect");
            let request = "POST /cap123 HTTP/1.1\r\nHost: upload\r\nContent-Type: image/png\r\nContent-Length: 7\r\n\r\nPNGDATA";
            socket.write_all(request.as_bytes()).await.expect("send");
            let mut response = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let read = socket.read(&mut chunk).await.expect("response");
                if read == 0 {
                    break;
                }
                response.extend_from_slice(&chunk[..read]);
                if find_body_start(&response).is_some() {
                    break;
                }
            }
            String::from_utf8_lossy(&response).into_owned()
        });

        let body = server.receive().await.expect("receive");
        assert_eq!(body, b"PNGDATA");

        let response = client.await.expect("client");
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    }

    #[tokio::test]
    async fn test_upload_server_rejects_wrong_target() {
        let server = UploadServer::bind("127.0.0.1".parse().expect("ip"), 0, "cap123".into())
            .await
            .expect("bind");
        let url = server.url().expect("url");
        let authority = url
            .strip_prefix("http://")
            .and_then(|rest| rest.split('/').next())
            .expect("authority")
            .to_owned();

        let client = tokio::spawn(async move {
            let mut socket = TcpStream::connect(authority).await.expect("connect");
            let request = "POST /elsewhere HTTP/1.1\r\nHost: upload\r\nContent-Type: image/png\r\nContent-Length: 3\r\n\r\nabc";
            socket.write_all(request.as_bytes()).await.expect("send");
            let mut response = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let read = socket.read(&mut chunk).await.expect("response");
                if read == 0 {
                    break;
                }
                response.extend_from_slice(&chunk[..read]);
                if find_body_start(&response).is_some() {
                    break;
                }
            }
            String::from_utf8_lossy(&response).into_owned()
        });

        let err = server.receive().await.unwrap_err();
        assert_eq!(err.code, 400);
        assert_eq!(err.text, "Invalid request received");

        let response = client.await.expect("client");
        assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    }

    #[test]
    fn test_parse_upload_head() {
        let head = "POST /cap HTTP/1.1\r\nHost: x\r\nContent-Type: image/png\r\nContent-Length: 42";
        let request = parse_upload_head(head).expect("head");
        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/cap");
        assert_eq!(request.content_type, "image/png");
        assert_eq!(request.content_length, 42);
    }

    #[test]
    fn test_voice_scratch_file_is_removed_on_drop() {
        let scratch = write_scratch(b"RIFF....WAVE").expect("scratch");
        let path = scratch.path().to_owned();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).expect("read back"), b"RIFF....WAVE");
        drop(scratch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_rdk_instance_supports_catalog() {
        let instance = RdkDevice::build("d1", "127.0.0.1");
        for op in [
            ops::OPERATIONS,
            ops::DEVICE_INFO,
            ops::DISCOVERY,
            ops::SYSTEM_SETTINGS_SET,
            ops::APPLICATION_LAUNCH_WITH_CONTENT,
            ops::INPUT_KEY_LONG_PRESS,
            ops::DEVICE_TELEMETRY_START,
            ops::APPLICATION_TELEMETRY_STOP,
            ops::VOICE_SEND_AUDIO,
        ] {
            assert!(instance.supports(op), "{op} should be supported");
        }
    }

    #[tokio::test]
    async fn test_discovery_is_local() {
        let instance = RdkDevice::build("tv", "10.1.2.3");
        let reply = instance
            .dispatch(ops::DISCOVERY, JsonValue::new_object())
            .await
            .expect("discovery");
        assert_eq!(reply.get("ip").and_then(|v| v.string().ok()), Some("10.1.2.3"));
        assert_eq!(reply.get("deviceId").and_then(|v| v.string().ok()), Some("tv"));
    }
}
