use crate::CoreError;
use std::io::Read;
use tracing::debug;
use wpa_schema::SnapshotSource;

/// Read a database snapshot from disk or over HTTP.
pub fn fetch_snapshot(source: &SnapshotSource) -> Result<Vec<u8>, CoreError> {
    match source {
        SnapshotSource::File(path) => std::fs::read(path)
            .map_err(|e| CoreError::Snapshot(format!("cannot read {path}: {e}"))),
        SnapshotSource::Url(url) => download(url),
    }
}

fn download(url: &str) -> Result<Vec<u8>, CoreError> {
    debug!("GET {url}");
    let agent = ureq::Agent::new_with_defaults();
    let resp = match agent.get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) => {
            return Err(CoreError::Snapshot(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(CoreError::Snapshot(format!("{url}: {e}"))),
    };

    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| CoreError::Snapshot(format!("{url}: {e}")))?;
    debug!("downloaded {} bytes from {url}", body.len());
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        std::fs::write(&path, "CREATE TABLE t (id INT);").unwrap();
        let data = fetch_snapshot(&SnapshotSource::File(path.to_string_lossy().into_owned()))
            .unwrap();
        assert_eq!(data, b"CREATE TABLE t (id INT);");
    }

    #[test]
    fn missing_file_is_snapshot_error() {
        let err = fetch_snapshot(&SnapshotSource::File("/nonexistent/dump.sql".to_owned()))
            .unwrap_err();
        assert!(matches!(err, CoreError::Snapshot(msg) if msg.contains("/nonexistent/dump.sql")));
    }

    #[test]
    fn unreachable_url_is_snapshot_error() {
        let err = fetch_snapshot(&SnapshotSource::Url("http://127.0.0.1:1/dump.sql".to_owned()))
            .unwrap_err();
        assert!(matches!(err, CoreError::Snapshot(_)));
    }
}
