//! Storage node HTTP access
//!
//! Storage nodes serve file bytes over plain HTTP with WebDAV extensions:
//! HEAD to probe, GET with a byte range to read, PUT with `Content-Range`
//! to write, and MKCOL to create the directories a PUT needs.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::errors::{MogileFSError, Result};

/// HTTP client for storage node requests
///
/// No request timeout is applied by default; pass a configured
/// `reqwest::Client` to [`StorageClient::with_client`] to bound requests.
#[derive(Debug, Clone)]
pub struct StorageClient {
    http: Client,
}

impl StorageClient {
    /// Creates a storage client with default HTTP settings
    pub fn new() -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self { http })
    }

    /// Creates a storage client with a custom HTTP client
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// Probes a URL with HEAD and returns its content length (0 if absent)
    pub async fn head(&self, url: &str) -> Result<u64> {
        let res = self
            .request(Method::HEAD, url, HeaderMap::new(), Bytes::new())
            .await?;
        Ok(content_length(&res))
    }

    /// Creates or truncates the object with a zero-length PUT
    pub async fn truncate(&self, url: &str) -> Result<()> {
        self.put(url, Bytes::new()).await
    }

    /// Uploads the complete object
    pub async fn put(&self, url: &str, body: Bytes) -> Result<()> {
        self.request(Method::PUT, url, HeaderMap::new(), body).await?;
        Ok(())
    }

    /// Writes `body` at byte offset `start` with a `Content-Range` PUT
    ///
    /// An empty body has no byte range and sends nothing.
    pub async fn put_range(&self, url: &str, start: u64, body: Bytes) -> Result<()> {
        if body.is_empty() {
            return Ok(());
        }
        let end = start.checked_add(body.len() as u64 - 1).ok_or_else(|| {
            MogileFSError::InvalidArgument(format!("range at offset {} overflows", start))
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, header_value(format!("bytes {}-{}/*", start, end))?);
        self.request(Method::PUT, url, headers, body).await?;
        Ok(())
    }

    /// Reads bytes starting at `start`, up to and including `end` if given
    ///
    /// Without a range (`start == 0` and no `end`) the whole object is read.
    /// A server that ignores the range and answers 200 is sliced locally.
    pub async fn get(&self, url: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        let ranged = start > 0 || end.is_some();
        let mut headers = HeaderMap::new();
        if ranged {
            let spec = match end {
                Some(end) => format!("bytes={}-{}", start, end),
                None => format!("bytes={}-", start),
            };
            headers.insert(RANGE, header_value(spec)?);
        }

        let res = self.request(Method::GET, url, headers, Bytes::new()).await?;
        let partial = res.status() == StatusCode::PARTIAL_CONTENT;
        let body = res.bytes().await?;

        if !ranged || partial {
            return Ok(body);
        }

        let len = body.len() as u64;
        let from = start.min(len) as usize;
        let to = end.map_or(len, |e| e.saturating_add(1).min(len)) as usize;
        Ok(body.slice(from..to.max(from)))
    }

    /// Moves an object to a new URL with the WebDAV `MOVE` verb
    pub async fn move_to(&self, from: &str, to: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("Destination", header_value(to.to_string())?);
        let res = self
            .send(dav_method(b"MOVE")?, &check_url(from)?, &headers, Bytes::new())
            .await?;
        if res.status() != StatusCode::CREATED {
            return Err(http_error(res.status(), from));
        }
        Ok(())
    }

    /// Issues a request, requiring a success status
    ///
    /// A PUT rejected with 403 usually means the parent directories do not
    /// exist yet. They are created with MKCOL and the PUT is retried once.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let target = check_url(url)?;
        let res = self.send(method.clone(), &target, &headers, body.clone()).await?;
        if res.status().is_success() {
            return Ok(res);
        }

        if method == Method::PUT && res.status() == StatusCode::FORBIDDEN {
            debug!(url, "PUT forbidden, creating parent collections");
            if self.make_parent_collections(url).await? {
                let retry = self.send(method, &target, &headers, body).await?;
                if retry.status().is_success() {
                    return Ok(retry);
                }
                return Err(http_error(retry.status(), url));
            }
        }

        Err(http_error(res.status(), url))
    }

    /// Creates the directory chain above a fid path
    ///
    /// Fid paths look like `/dev1/0/000/000/0000000900.fid`; this issues
    /// MKCOL for `/dev1/0/`, `/dev1/0/000/` and `/dev1/0/000/000/`. 4xx
    /// answers mean the collection already exists. Returns true only when
    /// the deepest collection was created.
    pub async fn make_parent_collections(&self, url: &str) -> Result<bool> {
        let base = check_url(url)?;
        let parents = parent_collections(url, base.path())?;
        let mkcol = dav_method(b"MKCOL")?;

        let mut created = false;
        for (idx, parent) in parents.iter().enumerate() {
            let mut target = base.clone();
            target.set_path(parent);
            target.set_query(None);

            let res = self
                .send(mkcol.clone(), &target, &HeaderMap::new(), Bytes::new())
                .await?;
            let status = res.status();
            debug!(collection = %target, %status, "MKCOL");

            if status.is_success() {
                created = idx + 1 == parents.len();
            } else if !status.is_client_error() {
                return Err(http_error(status, target.as_str()));
            }
        }

        Ok(created)
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let mut builder = self.http.request(method.clone(), url.clone()).headers(headers.clone());
        if method == Method::PUT {
            builder = builder.header(CONTENT_LENGTH, body.len()).body(body);
        }
        Ok(builder.send().await?)
    }
}

/// Lists the collections that must exist above a fid path
fn parent_collections(url: &str, path: &str) -> Result<Vec<String>> {
    if !path.ends_with(".fid") {
        return Err(MogileFSError::InvalidPath(url.to_string()));
    }

    let mut elements: Vec<&str> = path.split('/').collect();
    elements.pop();
    if elements.len() != 5 {
        return Err(MogileFSError::InvalidPath(url.to_string()));
    }

    Ok((3..=elements.len())
        .map(|idx| format!("{}/", elements[..idx].join("/")))
        .collect())
}

fn check_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|_| MogileFSError::InvalidPath(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(MogileFSError::InvalidPath(url.to_string())),
    }
}

fn content_length(res: &Response) -> u64 {
    res.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn dav_method(name: &[u8]) -> Result<Method> {
    Method::from_bytes(name).map_err(|e| MogileFSError::InvalidArgument(e.to_string()))
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|e| MogileFSError::InvalidArgument(e.to_string()))
}

fn http_error(status: StatusCode, url: &str) -> MogileFSError {
    MogileFSError::Http {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_collections_for_fid_path() {
        let url = "http://s:7500/dev1/0/000/000/0000000900.fid";
        let parents = parent_collections(url, "/dev1/0/000/000/0000000900.fid").unwrap();
        assert_eq!(parents, vec!["/dev1/0/", "/dev1/0/000/", "/dev1/0/000/000/"]);
    }

    #[test]
    fn parent_collections_rejects_other_paths() {
        assert!(parent_collections("u", "/dev1/0/000/000/file.txt").is_err());
        assert!(parent_collections("u", "/dev1/0000000900.fid").is_err());
    }

    #[tokio::test]
    async fn put_range_with_empty_body_sends_nothing() {
        // Nothing listens on port 1, so any request would fail
        let storage = StorageClient::new().unwrap();
        let url = "http://127.0.0.1:1/dev1/0/000/000/0000000001.fid";

        storage.put_range(url, 0, Bytes::new()).await.unwrap();
        storage.put_range(url, 42, Bytes::new()).await.unwrap();
    }

    #[tokio::test]
    async fn put_range_rejects_overflowing_offset() {
        let storage = StorageClient::new().unwrap();
        let url = "http://127.0.0.1:1/dev1/0/000/000/0000000001.fid";

        let err = storage
            .put_range(url, u64::MAX, Bytes::from_static(b"ab"))
            .await
            .unwrap_err();
        assert!(matches!(err, MogileFSError::InvalidArgument(_)), "got {:?}", err);
    }

    #[test]
    fn check_url_schemes() {
        assert!(check_url("http://s/dev1/0/000/000/1.fid").is_ok());
        assert!(check_url("https://s/dev1/0/000/000/1.fid").is_ok());
        assert!(check_url("ftp://s/dev1/0/000/000/1.fid").is_err());
        assert!(check_url("/dev1/0/000/000/1.fid").is_err());
    }
}
