use serde_json::{json, Value};

/// The one backend domain whose API surface this engine rewrites.
pub const GOVERNED_DOMAIN: &str = "service.mkey.163.com";

/// Client version the backend expects from the PC SDK. Requests without it
/// are rejected with an "unsupported client" error.
pub const CLIENT_VERSION: &str = "i4.7.0";

/// File name of the rewrite plugin loaded by the interception engine.
pub const PLUGIN_FILE_NAME: &str = "MITM_4_service_mkey_163_com.py";

/// Paths whose request bodies must never be mutated. The backend validates
/// signatures over these payloads; touching them breaks token exchange,
/// QR-code issuance and re-verification.
pub const EXEMPT_PATH_PATTERNS: [&str; 3] = [
    r"^/mpay/api/users/login/qrcode/exchange_token",
    r"^/mpay/api/qrcode",
    r"^/mpay/api/reverify",
];

pub(crate) const PC_CONFIG_PATTERN: &str = r"^/mpay/games/pc_config";
pub(crate) const LOGIN_METHODS_PATTERN: &str = r"^/mpay/games/.*/login_methods";
pub(crate) const QRCODE_CREATE_PATTERN: &str = r"^/mpay/api/qrcode/create_login";
pub(crate) const QRCODE_EXCHANGE_PATTERN: &str = r"^/mpay/api/users/login/qrcode/exchange_token";

/// Full set of platform indices a login channel may be offered on.
pub(crate) const ALL_SELECT_PLATFORMS: [u8; 5] = [0, 1, 2, 3, 4];

/// Fixed login-method descriptors injected into the `entrance` wrapper of the
/// login-methods response.
pub(crate) fn login_methods() -> Value {
    json!([
        {
            "name": "手机账号",
            "icon_url": "",
            "text_color": "",
            "hot": true,
            "type": 7,
            "icon_url_large": ""
        },
        {
            "name": "快速游戏",
            "icon_url": "",
            "text_color": "",
            "hot": true,
            "type": 2,
            "icon_url_large": ""
        },
        {
            "login_url": "",
            "name": "网易邮箱",
            "icon_url": "",
            "text_color": "",
            "hot": true,
            "type": 1,
            "icon_url_large": ""
        },
        {
            "login_url": "",
            "name": "扫码登录",
            "icon_url": "",
            "text_color": "",
            "hot": true,
            "type": 17,
            "icon_url_large": ""
        }
    ])
}
