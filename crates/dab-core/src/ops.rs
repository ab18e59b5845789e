//! The published DAB operation catalog.
//!
//! These are the operation paths a broker may serve under
//! `dab/<deviceId>/<operation-path>`. The set is open: instances may register
//! paths outside this list and the dispatcher will route them the same way.

pub const OPERATIONS: &str = "operations";
pub const VERSION: &str = "version";
pub const DISCOVERY: &str = "discovery";

pub const DEVICE_INFO: &str = "device/info";
pub const DEVICE_TELEMETRY_START: &str = "device/telemetry/start";
pub const DEVICE_TELEMETRY_STOP: &str = "device/telemetry/stop";

pub const APPLICATION_LIST: &str = "application/list";
pub const APPLICATION_LAUNCH: &str = "application/launch";
pub const APPLICATION_LAUNCH_WITH_CONTENT: &str = "application/launch-with-content";
pub const APPLICATION_GET_STATE: &str = "application/get-state";
pub const APPLICATION_EXIT: &str = "application/exit";
pub const APPLICATION_TELEMETRY_START: &str = "application/telemetry/start";
pub const APPLICATION_TELEMETRY_STOP: &str = "application/telemetry/stop";

pub const SYSTEM_RESTART: &str = "system/restart";
pub const SYSTEM_SETTINGS_LIST: &str = "system/settings/list";
pub const SYSTEM_SETTINGS_GET: &str = "system/settings/get";
pub const SYSTEM_SETTINGS_SET: &str = "system/settings/set";

pub const INPUT_KEY_LIST: &str = "input/key/list";
pub const INPUT_KEY_PRESS: &str = "input/key/press";
pub const INPUT_KEY_LONG_PRESS: &str = "input/key/long-press";

pub const OUTPUT_IMAGE: &str = "output/image";
pub const HEALTH_CHECK_GET: &str = "health-check/get";

pub const VOICE_LIST: &str = "voice/list";
pub const VOICE_SET: &str = "voice/set";
pub const VOICE_SEND_AUDIO: &str = "voice/send-audio";
pub const VOICE_SEND_TEXT: &str = "voice/send-text";

/// Every catalog operation, in catalog order.
pub const CATALOG: &[&str] = &[
    OPERATIONS,
    VERSION,
    DISCOVERY,
    DEVICE_INFO,
    DEVICE_TELEMETRY_START,
    DEVICE_TELEMETRY_STOP,
    APPLICATION_LIST,
    APPLICATION_LAUNCH,
    APPLICATION_LAUNCH_WITH_CONTENT,
    APPLICATION_GET_STATE,
    APPLICATION_EXIT,
    APPLICATION_TELEMETRY_START,
    APPLICATION_TELEMETRY_STOP,
    SYSTEM_RESTART,
    SYSTEM_SETTINGS_LIST,
    SYSTEM_SETTINGS_GET,
    SYSTEM_SETTINGS_SET,
    INPUT_KEY_LIST,
    INPUT_KEY_PRESS,
    INPUT_KEY_LONG_PRESS,
    OUTPUT_IMAGE,
    HEALTH_CHECK_GET,
    VOICE_LIST,
    VOICE_SET,
    VOICE_SEND_AUDIO,
    VOICE_SEND_TEXT,
];

/// Version of the DAB protocol this broker implements.
pub const PROTOCOL_VERSION: &str = "2.0";
