use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::*;

/// Some hosts (and CDN fronts) reject requests from the default user
/// agents of plain HTTP libraries, so both transports send a browser one.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const ACCEPT: &str = "application/xml,text/xml;q=0.9,*/*;q=0.8";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch the feed bytes, first with ureq, then with a curl subprocess
/// when the primary request fails for any reason. Restricted network
/// environments sometimes block the in-process client but allow curl
/// through a proxy, so the fallback retries on its own (3 attempts,
/// 2s apart) before giving up.
pub fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    match fetch_ureq(url) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            debug!("ureq fetch failed ({:#}); falling back to curl", e);
            let bytes = fetch_curl("curl", url)?;
            debug!("curl fetch success: bytes={}", bytes.len());
            Ok(bytes)
        }
    }
}

fn fetch_ureq(url: &str) -> Result<Vec<u8>> {
    debug!("Fetching appcast via ureq: {}", url);
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(FETCH_TIMEOUT))
        .build();
    let agent: ureq::Agent = config.into();
    let mut response = agent
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", ACCEPT)
        .call()?;
    let status = response.status();
    let bytes = response.body_mut().read_to_vec()?;
    debug!("ureq fetch success: status={} bytes={}", status, bytes.len());
    Ok(bytes)
}

fn fetch_curl(curl_bin: &str, url: &str) -> Result<Vec<u8>> {
    debug!("Fetching appcast via {}: {}", curl_bin, url);
    let output = Command::new(curl_bin)
        .args(["-fLsS", "--retry", "3", "--retry-delay", "2", "-A", USER_AGENT])
        .arg(url)
        .output()
        .with_context(|| format!("Failed to spawn {}", curl_bin))?;
    if !output.status.success() {
        bail!(
            "curl fallback failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(target_family = "unix")]
    use std::io::Write;
    #[cfg(target_family = "unix")]
    use std::os::unix::fs::PermissionsExt;
    #[cfg(target_family = "unix")]
    use std::path::{Path, PathBuf};

    #[cfg(target_family = "unix")]
    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("curl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        drop(file);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn curl_fallback_returns_stdout_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), "printf '<rss/>'");
        let bytes = fetch_curl(stub.to_str().unwrap(), "https://x/appcast.xml").unwrap();
        assert_eq!(bytes, b"<rss/>");
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn curl_fallback_passes_retry_flags_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), r#"printf '%s\n' "$@""#);
        let out = fetch_curl(stub.to_str().unwrap(), "https://x/appcast.xml").unwrap();
        let argv: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(
            argv,
            vec![
                "-fLsS",
                "--retry",
                "3",
                "--retry-delay",
                "2",
                "-A",
                USER_AGENT,
                "https://x/appcast.xml",
            ]
        );
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn curl_fallback_propagates_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), "echo 'curl: (22) error' >&2; exit 22");
        let err = fetch_curl(stub.to_str().unwrap(), "https://x/appcast.xml").unwrap_err();
        assert!(err.to_string().contains("curl fallback failed"));
    }

    #[test]
    fn curl_fallback_fails_when_binary_is_missing() {
        assert!(fetch_curl("curl-binary-that-does-not-exist", "https://x/appcast.xml").is_err());
    }
}
