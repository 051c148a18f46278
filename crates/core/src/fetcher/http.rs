//! Single download: request, stream to disk, rename into place.

use std::path::Path;

use reqwest::{header, Client, Url};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{FetchError, FetchedFile};
use crate::config::CookieConfig;

/// Parse `url` and derive the file name from its final path segment.
pub fn parse_target(url: &str) -> Result<(Url, String), FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            url,
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(FetchError::InvalidUrl(format!("{}: missing host", url)));
    }

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let name = urlencoding::decode(segment)
        .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?
        .into_owned();

    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(FetchError::InvalidUrl(format!(
            "{}: no usable file name in path",
            url
        )));
    }
    Ok((parsed, name))
}

/// `Cookie` header value for the cookies that apply to `url`.
pub fn cookie_header(url: &Url, cookies: &[CookieConfig]) -> Option<String> {
    let host = url.host_str().unwrap_or("");
    let path = url.path();
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| domain_matches(host, &c.domain) && path.starts_with(&c.path))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return true;
    }
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

/// Perform the GET and stream a 2xx body into `dir/name`.
///
/// The body is staged in a temp file private to `fetch_id`, so concurrent
/// fetches that share a file name never write the same inode. The last
/// rename wins.
///
/// Non-2xx responses come back as [`FetchError::Status`] so the caller can
/// still count them.
pub async fn download(
    client: &Client,
    url: &Url,
    name: &str,
    fetch_id: u64,
    cookies: &[CookieConfig],
    dir: &Path,
) -> Result<FetchedFile, FetchError> {
    let mut request = client.get(url.clone());
    if let Some(cookie) = cookie_header(url, cookies) {
        request = request.header(header::COOKIE, cookie);
    }

    let mut response = request.send().await.map_err(|e| FetchError::Request {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status_code = response.status().as_u16();
    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status_code,
        });
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error(dir, e))?;

    let final_path = dir.join(name);
    let part_path = dir.join(part_name(name, fetch_id));

    let result = write_body(&mut response, &part_path).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&part_path, &final_path)
        .await
        .map_err(|e| io_error(&final_path, e))?;

    debug!(url = %url, path = %final_path.display(), bytes, "Download complete");

    Ok(FetchedFile {
        url: url.to_string(),
        path: final_path,
        status_code,
        bytes,
    })
}

async fn write_body(response: &mut reqwest::Response, path: &Path) -> Result<u64, FetchError> {
    let url = response.url().to_string();
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| io_error(path, e))?;

    let mut bytes = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Request {
        url: url.clone(),
        message: e.to_string(),
    })? {
        file.write_all(&chunk).await.map_err(|e| io_error(path, e))?;
        bytes += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| io_error(path, e))?;
    Ok(bytes)
}

/// Hidden staging name for one fetch of `name`.
pub fn part_name(name: &str, fetch_id: u64) -> String {
    format!(".{}.{}.part", name, fetch_id)
}

fn io_error(path: &Path, e: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
