/// URL path under which uploaded voice notes are served.
pub const VOICE_PATH: &str = "/uploads/voices";

/// Build the public URL of a voice attachment.
///
/// A configured base URL wins; otherwise the Host header of the WebSocket
/// upgrade request is used, falling back to a host-relative path.
pub fn voice_url(base_url: Option<&str>, host: Option<&str>, filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let url = match (base_url, host) {
        (Some(base), _) => format!("{base}{VOICE_PATH}/{filename}"),
        (None, Some(host)) if !host.is_empty() => format!("http://{host}{VOICE_PATH}/{filename}"),
        _ => format!("{VOICE_PATH}/{filename}"),
    };
    Some(url)
}
