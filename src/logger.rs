use once_cell::sync::OnceCell;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;

/// Runtime override, set at most once by the embedding application
static OVERRIDE: OnceCell<bool> = OnceCell::new();

/// Overrides the compile-time logging switch. Only the first call wins.
pub fn set_enabled(enabled: bool) -> bool {
    OVERRIDE.set(enabled).is_ok()
}

fn enabled() -> bool {
    if let Some(enabled) = OVERRIDE.get() {
        return *enabled;
    }
    // dev::ENABLE_LOGGING is always false in release builds
    crate::config::LOGGING_ENABLED && crate::config::dev::ENABLE_LOGGING
}

/// Timestamped log line
pub fn log(msg: &str) {
    if enabled() {
        let now = chrono::Local::now();
        println!("RUST: [{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), msg);
    }
}

/// Log a local ICE candidate as soon as it shows up
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if !enabled() {
        return;
    }
    if let Ok(init) = cand.to_json() {
        log(&format!(
            "Candidate {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        ));
    }
}
