use std::ffi::CStr;
use std::path::Path;
use crate::core::types::absolute;

/// Host name of this machine, "localhost" if it cannot be determined.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes and gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    buf[buf.len() - 1] = 0;
    CStr::from_bytes_until_nul(&buf)
        .ok()
        .and_then(|s| s.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "localhost".to_string())
}

/// `host:/absolute/path` identifying a result directory across machines.
pub fn dir_uri(dir: &Path) -> String {
    format!("{}:{}", hostname(), absolute(dir).display())
}
